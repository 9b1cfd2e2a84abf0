//! Atomic operations (§4.4): a staged set of Writes that commits under
//! optimistic version-change detection rather than pessimistic locking.
//!
//! `AtomicOperation` borrows its parent [`Engine`] for its whole lifetime:
//! a sum-type-plus-trait shape rather than deep inheritance (§9) — there is
//! no `Store`/`AtomicOperation` class hierarchy, just a struct wrapping a
//! parent handle and a staged-writes vector.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::value::Value;
use crate::write::Write as Revision;

use super::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Open,
    Notified,
    Committed,
    Aborted,
}

/// Shared outside the borrowed `AtomicOperation` so the engine's watcher
/// registry can hold a notification target independent of the operation's
/// own lifetime.
#[derive(Default)]
pub(super) struct WatchHandle {
    notified: AtomicBool,
}

impl WatchHandle {
    pub(super) fn notify(&self) {
        self.notified.store(true, Ordering::SeqCst);
    }
}

/// A staged set of Writes, observing a snapshot of the watched keys it has
/// read, that commits atomically iff none of those keys changed underneath
/// it (§4.4, §8 invariant 5).
pub struct AtomicOperation<'e> {
    engine: &'e Engine,
    handle: Arc<WatchHandle>,
    watched_records: HashSet<(String, i64)>,
    watched_values: HashSet<(String, Vec<u8>)>,
    staged: Vec<Revision>,
    state: OperationState,
}

impl<'e> AtomicOperation<'e> {
    pub(super) fn new(engine: &'e Engine) -> Self {
        AtomicOperation {
            engine,
            handle: Arc::new(WatchHandle::default()),
            watched_records: HashSet::new(),
            watched_values: HashSet::new(),
            staged: Vec::new(),
            state: OperationState::Open,
        }
    }

    pub fn state(&self) -> OperationState {
        if self.state == OperationState::Open && self.handle.notified.load(Ordering::SeqCst) {
            return OperationState::Notified;
        }
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state() == OperationState::Open
    }

    /// Snapshot read through the overlay, registering `(key, record)` as
    /// watched for version-change notification. No lock is held once this
    /// call returns — reads never retain a lock across the operation's
    /// lifetime, which is what lets a later `add`/`remove` on the same key
    /// proceed without deadlocking (§4.4, §8 invariant 6).
    pub fn select(&mut self, record: i64, key: &str) -> Vec<Revision> {
        self.engine.register_record_watch(key, record, &self.handle);
        self.watched_records.insert((key.to_string(), record));
        let mut out = self.engine.select_merged(record, key, None);
        out.extend(self.staged.iter().filter(|w| w.record == record && w.key == key).cloned());
        out.sort_by_key(|w| w.version);
        out
    }

    /// Snapshot predicate read, registering every returned `(key, value)`
    /// pair as watched.
    pub fn find(&mut self, key: &str, op: crate::db::Operator, value: &Value) -> Vec<Revision> {
        let mut out = self.engine.find_merged(key, op, value, None);
        out.extend(self.staged.iter().filter(|w| w.key == key && op.matches(&w.value, value)).cloned());
        for w in &out {
            let bytes = w.value.encode_be();
            self.engine.register_value_watch(key, &bytes, &self.handle);
            self.watched_values.insert((key.to_string(), bytes));
        }
        out.sort_by_key(|w| w.version);
        out
    }

    /// Stages an ADD; not visible to any reader until `commit()` succeeds.
    pub fn add(&mut self, key: impl Into<String>, value: Value, record: i64) {
        self.staged.push(Revision::add(key, value, record, 0));
    }

    /// Stages a REMOVE; not visible to any reader until `commit()` succeeds.
    pub fn remove(&mut self, key: impl Into<String>, value: Value, record: i64) {
        self.staged.push(Revision::remove(key, value, record, 0));
    }

    /// Commits the staged writes iff no watched key changed since it was
    /// observed. Returns `false` (and transitions to `Aborted`) on conflict.
    ///
    /// No engine-wide lock is taken: the only serialization is the per-key
    /// locks below, acquired in canonical (sorted) order before the conflict
    /// re-check, so two commits racing over disjoint keys proceed in
    /// parallel and two commits racing over the same key see a consistent
    /// notified flag (whichever acquires the key's lock second observes
    /// whatever the first one's apply already notified).
    pub fn commit(mut self) -> bool {
        if self.state() != OperationState::Open {
            self.state = OperationState::Aborted;
            return false;
        }

        let mut keys: Vec<String> = self.staged.iter().map(|w| w.key.clone()).collect();
        keys.sort();
        keys.dedup();
        let locks: Vec<Arc<std::sync::Mutex<()>>> = keys.iter().map(|k| self.engine.key_lock(k)).collect();
        let _guards: Vec<_> = locks.iter().map(|l| lock_with_retry(l)).collect();

        if self.handle.notified.load(Ordering::SeqCst) {
            self.state = OperationState::Aborted;
            return false;
        }

        for write in std::mem::take(&mut self.staged) {
            if let Err(e) = self.engine.apply_write(write) {
                tracing::warn!("atomic operation commit failed mid-batch: {e}");
                self.state = OperationState::Aborted;
                return false;
            }
        }
        self.state = OperationState::Committed;
        true
    }

    /// Aborts without applying any staged write.
    pub fn abort(mut self) {
        self.staged.clear();
        self.state = OperationState::Aborted;
    }
}

impl Drop for AtomicOperation<'_> {
    fn drop(&mut self) {
        if self.state == OperationState::Open {
            self.state = OperationState::Aborted;
        }
        self.engine.unregister_watches(&self.watched_records, &self.watched_values, &self.handle);
    }
}

/// Bounded try-lock-and-restart loop (§4.4 deadlock avoidance): never
/// blocks indefinitely on a single key, so a cross-operation circular wait
/// resolves by one side backing off and retrying in canonical order.
pub(super) fn lock_with_retry(lock: &std::sync::Mutex<()>) -> std::sync::MutexGuard<'_, ()> {
    loop {
        if let Ok(guard) = lock.try_lock() {
            return guard;
        }
        std::thread::sleep(Duration::from_micros(50));
    }
}
