//! The Engine (ENG, §4.4): composes the Write Buffer and the block-indexed
//! Database into one versioned store. Writes land in the WB; reads overlay
//! the WB over the DB. A background transporter thread periodically drains
//! the WB into the DB by accepting each drained Revision into the three
//! block families, sealing a family's current block once it crosses its
//! size threshold.

pub mod atomic;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::buffer::{BufferError, WriteBuffer};
use crate::config::{ConfigError, EngineConfig};
use crate::db::{Db, DbError, Operator};
use crate::value::Value;
use crate::write::Write as Revision;

use atomic::{AtomicOperation, WatchHandle};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("write buffer error: {0}")]
    Buffer(#[from] BufferError),
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Usage error (§7): a call reached a closed `Engine`. Programmer error
    /// at the caller, surfaced immediately rather than retried.
    #[error("engine is closed")]
    Closed,
}

struct EngineInner {
    buffer: WriteBuffer,
    db: Db,
    version_counter: AtomicU64,
    watchers_by_record: Mutex<HashMap<(String, i64), Vec<Arc<WatchHandle>>>>,
    watchers_by_value: Mutex<HashMap<(String, Vec<u8>), Vec<Arc<WatchHandle>>>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    transport_batch_size: usize,
    transport_interval: Duration,
    stop_flag: Mutex<bool>,
    stop_signal: Condvar,
    closed: AtomicBool,
}

/// The Engine & Atomic Operations layer — the crate's top-level handle.
pub struct Engine {
    inner: Arc<EngineInner>,
    transporter: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        std::fs::create_dir_all(&config.buffer_dir)?;
        std::fs::create_dir_all(&config.database_dir)?;

        let buffer = WriteBuffer::open(&config.buffer_dir)?;
        let db = Db::open(&config.database_dir, config.block_seal_threshold)?;

        let seed = db.newest_version().max(buffer.max_version().unwrap_or(0)) + 1;
        info!(seed_version = seed, "engine opening");

        let inner = Arc::new(EngineInner {
            buffer,
            db,
            version_counter: AtomicU64::new(seed),
            watchers_by_record: Mutex::new(HashMap::new()),
            watchers_by_value: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            transport_batch_size: config.transport_batch_size,
            transport_interval: config.transport_interval,
            stop_flag: Mutex::new(false),
            stop_signal: Condvar::new(),
            closed: AtomicBool::new(false),
        });

        let transporter = spawn_transporter(Arc::clone(&inner));

        Ok(Engine {
            inner,
            transporter: Mutex::new(Some(transporter)),
        })
    }

    /// Returns `EngineError::Closed` once `close()` has run — checked at
    /// the top of every public method so a call on a closed engine fails
    /// immediately instead of touching unmapped block files (§7 UsageError:
    /// "operating on a closed Engine/operation ... surfaced to caller").
    fn check_open(&self) -> Result<(), EngineError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Stops the background transporter and flushes the DB's catalog.
    /// Idempotent; safe to call more than once — a second call is a no-op.
    pub fn close(&self) -> Result<(), EngineError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.inner.stop_flag.lock().unwrap() = true;
        self.inner.stop_signal.notify_all();
        if let Some(handle) = self.transporter.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.drain_transport()?;
        self.inner.db.stop()?;
        Ok(())
    }

    /// Appends a single ADD, assigning it the next version (§4.4: every
    /// mutating call outside an atomic operation is a single-statement write).
    pub fn add(&self, key: impl Into<String>, value: Value, record: i64) -> Result<Revision, EngineError> {
        self.check_open()?;
        self.apply(Revision::add(key, value, record, 0))
    }

    pub fn remove(&self, key: impl Into<String>, value: Value, record: i64) -> Result<Revision, EngineError> {
        self.check_open()?;
        self.apply(Revision::remove(key, value, record, 0))
    }

    /// All revisions of `key` on `record`, optionally as of version `ts`,
    /// merging the WB overlay over the DB (newest-last, by version).
    pub fn select(&self, record: i64, key: &str, ts: Option<u64>) -> Result<Vec<Revision>, EngineError> {
        self.check_open()?;
        Ok(self.select_merged(record, key, ts))
    }

    pub fn find(&self, key: &str, op: Operator, value: &Value, ts: Option<u64>) -> Result<Vec<Revision>, EngineError> {
        self.check_open()?;
        Ok(self.find_merged(key, op, value, ts))
    }

    /// Tokenized search (§4.3/§6): the DB's search family plus a direct
    /// scan of the still-unbuffered overlay for the same token.
    pub fn search(&self, key: &str, token: &str) -> Result<Vec<Revision>, EngineError> {
        self.check_open()?;
        let lowered = token.to_lowercase();
        let mut hits = self.inner.db.search(key, &lowered)?;
        for write in self.inner.buffer.view_record_by_key(key) {
            if write.value.search_tokens().contains(&lowered) {
                hits.push(write);
            }
        }
        hits.sort_by(|a, b| a.record.cmp(&b.record).then(a.version.cmp(&b.version)));
        hits.dedup_by(|a, b| a.record == b.record && a.version == b.version);
        Ok(hits)
    }

    pub fn trigger_sync(&self) -> Result<(), EngineError> {
        self.check_open()?;
        self.drain_transport()?;
        self.inner.db.trigger_sync()?;
        Ok(())
    }

    pub fn start_atomic_operation(&self) -> Result<AtomicOperation<'_>, EngineError> {
        self.check_open()?;
        Ok(AtomicOperation::new(self))
    }

    fn apply(&self, mut write: Revision) -> Result<Revision, EngineError> {
        self.check_open()?;
        let version = self.inner.version_counter.fetch_add(1, Ordering::SeqCst);
        write.version = version;
        let applied = self.inner.buffer.append(write)?;
        self.notify_watchers(&applied);
        Ok(applied)
    }

    pub(super) fn select_merged(&self, record: i64, key: &str, ts: Option<u64>) -> Vec<Revision> {
        let mut out = self.inner.db.select(record, key, ts).unwrap_or_default();
        out.extend(
            self.inner
                .buffer
                .view(key, record)
                .into_iter()
                .filter(|w| ts.map(|ts| w.version <= ts).unwrap_or(true)),
        );
        out.sort_by_key(|w| w.version);
        out.dedup_by(|a, b| a.version == b.version);
        out
    }

    pub(super) fn find_merged(&self, key: &str, op: Operator, value: &Value, ts: Option<u64>) -> Vec<Revision> {
        let mut out = self.inner.db.find(key, op, value, ts).unwrap_or_default();
        out.extend(
            self.inner
                .buffer
                .find(key, op, value)
                .into_iter()
                .filter(|w| ts.map(|ts| w.version <= ts).unwrap_or(true)),
        );
        out.sort_by_key(|w| w.version);
        out.dedup_by(|a, b| a.version == b.version);
        out
    }

    fn notify_watchers(&self, write: &Revision) {
        let record_key = (write.key.clone(), write.record);
        if let Some(handles) = self.inner.watchers_by_record.lock().unwrap().get(&record_key) {
            for h in handles {
                h.notify();
            }
        }
        let value_key = (write.key.clone(), write.value.encode_be());
        if let Some(handles) = self.inner.watchers_by_value.lock().unwrap().get(&value_key) {
            for h in handles {
                h.notify();
            }
        }
    }

    pub(super) fn register_record_watch(&self, key: &str, record: i64, handle: &Arc<WatchHandle>) {
        self.inner
            .watchers_by_record
            .lock()
            .unwrap()
            .entry((key.to_string(), record))
            .or_default()
            .push(Arc::clone(handle));
    }

    pub(super) fn register_value_watch(&self, key: &str, value_bytes: &[u8], handle: &Arc<WatchHandle>) {
        self.inner
            .watchers_by_value
            .lock()
            .unwrap()
            .entry((key.to_string(), value_bytes.to_vec()))
            .or_default()
            .push(Arc::clone(handle));
    }

    pub(super) fn unregister_watches(
        &self,
        records: &std::collections::HashSet<(String, i64)>,
        values: &std::collections::HashSet<(String, Vec<u8>)>,
        handle: &Arc<WatchHandle>,
    ) {
        let mut by_record = self.inner.watchers_by_record.lock().unwrap();
        for key in records {
            if let Some(v) = by_record.get_mut(key) {
                v.retain(|h| !Arc::ptr_eq(h, handle));
            }
        }
        let mut by_value = self.inner.watchers_by_value.lock().unwrap();
        for key in values {
            if let Some(v) = by_value.get_mut(key) {
                v.retain(|h| !Arc::ptr_eq(h, handle));
            }
        }
    }

    /// Returns (creating if necessary) the per-key lock used to serialize
    /// commits touching the same key in canonical order (§4.4). This is the
    /// only lock an atomic commit takes — there is no engine-wide commit
    /// lock, so commits touching disjoint key sets proceed concurrently.
    pub(super) fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.key_locks.lock().unwrap();
        Arc::clone(locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    pub(super) fn apply_write(&self, write: Revision) -> Result<Revision, EngineError> {
        self.apply(write)
    }

    fn drain_transport(&self) -> Result<(), EngineError> {
        loop {
            let batch = self.inner.buffer.transport(0, self.inner.transport_batch_size);
            if batch.is_empty() {
                return Ok(());
            }
            let count = batch.len();
            for revision in batch {
                self.inner.db.accept(revision)?;
            }
            self.inner.buffer.drain(count)?;
            if count < self.inner.transport_batch_size {
                return Ok(());
            }
        }
    }
}

fn spawn_transporter(inner: Arc<EngineInner>) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        let stop = inner.stop_flag.lock().unwrap();
        if *stop {
            return;
        }
        let (stop, _timeout) = inner.stop_signal.wait_timeout(stop, inner.transport_interval).unwrap();
        if *stop {
            return;
        }
        drop(stop);

        let batch = inner.buffer.transport(0, inner.transport_batch_size);
        if batch.is_empty() {
            continue;
        }
        let count = batch.len();
        let mut ok = true;
        for revision in batch {
            if let Err(e) = inner.db.accept(revision) {
                warn!("transport failed, will retry: {e}");
                ok = false;
                break;
            }
        }
        if ok {
            if let Err(e) = inner.buffer.drain(count) {
                warn!("buffer drain after transport failed: {e}");
            } else {
                debug!(count, "transported writes into database");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig as Config;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path) -> Engine {
        let config = Config::at_root(dir, "default");
        Engine::open(config).unwrap()
    }

    #[test]
    fn add_then_select_round_trips_through_overlay() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.add("name", Value::String("ada".into()), 1).unwrap();
        let out = engine.select(1, "name", None).unwrap();
        assert_eq!(out.len(), 1);
        engine.close().unwrap();
    }

    #[test]
    fn transport_moves_writes_into_database() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.add("age", Value::Integer(30), 1).unwrap();
        engine.trigger_sync().unwrap();
        let out = engine.select(1, "age", None).unwrap();
        assert_eq!(out.len(), 1);
        engine.close().unwrap();
    }

    #[test]
    fn atomic_operation_commits_when_uncontended() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        let mut op = engine.start_atomic_operation().unwrap();
        op.add("k", Value::Integer(1), 1);
        assert!(op.commit());
        assert_eq!(engine.select(1, "k", None).unwrap().len(), 1);
        engine.close().unwrap();
    }

    #[test]
    fn atomic_operation_aborts_after_concurrent_conflicting_write() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.add("k", Value::Integer(1), 1).unwrap();

        let mut op = engine.start_atomic_operation().unwrap();
        let _ = op.select(1, "k");
        engine.add("k", Value::Integer(2), 1).unwrap();

        op.add("k", Value::Integer(3), 1);
        assert!(!op.commit());
        engine.close().unwrap();
    }

    #[test]
    fn read_then_write_same_key_within_operation_does_not_deadlock() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        let mut op = engine.start_atomic_operation().unwrap();
        let _ = op.find("k", Operator::Equals, &Value::Integer(1));
        op.add("k", Value::Integer(1), 1);
        assert!(op.commit());
        engine.close().unwrap();
    }

    #[test]
    fn calls_on_a_closed_engine_surface_a_usage_error() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        engine.close().unwrap();

        assert!(matches!(
            engine.add("k", Value::Integer(1), 1),
            Err(EngineError::Closed)
        ));
        assert!(matches!(engine.select(1, "k", None), Err(EngineError::Closed)));
        assert!(matches!(
            engine.find("k", Operator::Equals, &Value::Integer(1), None),
            Err(EngineError::Closed)
        ));
        assert!(matches!(engine.search("k", "x"), Err(EngineError::Closed)));
        assert!(matches!(engine.trigger_sync(), Err(EngineError::Closed)));
        assert!(matches!(engine.start_atomic_operation(), Err(EngineError::Closed)));

        // Idempotent: closing an already-closed engine is a no-op, not an error.
        assert!(engine.close().is_ok());
    }
}
