//! The Write Buffer (WB, §4.2): an append-only, log-backed staging area
//! ahead of the Database. Every [`Revision`] the Engine accepts lands here
//! first, durably, before `transport` migrates it into the DB.
//!
//! Version assignment itself lives on the Engine (a single `AtomicU64`
//! shared with the DB's recovered high-water mark — see
//! `engine::Engine::open`) rather than here, so that a version is unique
//! across both WB and DB after a restart; the buffer simply persists and
//! indexes whatever already-versioned `Revision` it's handed. This is
//! documented as a resolved design choice in DESIGN.md.

use std::io;
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::value::Value;
use crate::wal::{Wal, WalError};
use crate::write::Write as Revision;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("write buffer durability error: {0}")]
    Durability(#[from] WalError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

struct Inner {
    wal: Wal<Revision>,
    /// Undrained writes, strictly version-ascending (append order).
    entries: Vec<Revision>,
}

/// Append-only, durable overlay of not-yet-transported Writes.
pub struct WriteBuffer {
    inner: Mutex<Inner>,
}

impl WriteBuffer {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, BufferError> {
        let dir = root.as_ref().join("buffer");
        std::fs::create_dir_all(&dir)?;
        let wal = Wal::<Revision>::open(dir.join("buffer.wal"), None)?;
        let mut entries = Vec::new();
        for record in wal.replay_iter()? {
            entries.push(record?);
        }
        Ok(WriteBuffer {
            inner: Mutex::new(Inner { wal, entries }),
        })
    }

    /// Persists an already-versioned revision durably and makes it visible
    /// to subsequent reads. Returns once the WAL record is fsync'd.
    pub fn append(&self, revision: Revision) -> Result<Revision, BufferError> {
        let mut inner = self.inner.lock().unwrap();
        inner.wal.append(&revision)?;
        inner.entries.push(revision.clone());
        Ok(revision)
    }

    /// All buffered revisions of `key` on `record`, version-ascending.
    pub fn view(&self, key: &str, record: i64) -> Vec<Revision> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|w| w.record == record && w.key == key)
            .cloned()
            .collect()
    }

    /// All buffered revisions for `record`, across every key, version-ascending.
    pub fn view_record(&self, record: i64) -> Vec<Revision> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|w| w.record == record)
            .cloned()
            .collect()
    }

    /// All buffered revisions of `key`, across every record, version-ascending.
    pub fn view_record_by_key(&self, key: &str) -> Vec<Revision> {
        self.inner.lock().unwrap().entries.iter().filter(|w| w.key == key).cloned().collect()
    }

    /// All buffered revisions of `key` whose value matches `op` against
    /// `value`, version-ascending.
    pub fn find(&self, key: &str, op: crate::db::Operator, value: &Value) -> Vec<Revision> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|w| w.key == key && op.matches(&w.value, value))
            .cloned()
            .collect()
    }

    /// `true` iff the folded ADD/REMOVE parity for `(key, value, record)`
    /// under the buffer overlay is odd — i.e. currently present (§4.2).
    pub fn verify(&self, key: &str, value: &Value, record: i64) -> bool {
        let count = self
            .inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|w| w.record == record && w.key == key && &w.value == value)
            .count();
        count % 2 == 1
    }

    /// Up to `limit` not-yet-transported revisions starting at `cursor`
    /// (an index into the undrained prefix), in version order.
    pub fn transport(&self, cursor: usize, limit: usize) -> Vec<Revision> {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().skip(cursor).take(limit).cloned().collect()
    }

    /// Number of undrained revisions currently buffered.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops the first `count` undrained revisions and rewrites the WAL
    /// with what remains, atomically (rename-on-write, via [`Wal::truncate`]
    /// semantics plus a fresh append pass) — called only after the DB has
    /// durably accepted those revisions.
    pub fn drain(&self, count: usize) -> Result<(), BufferError> {
        let mut inner = self.inner.lock().unwrap();
        if count == 0 {
            return Ok(());
        }
        let count = count.min(inner.entries.len());
        inner.entries.drain(0..count);
        inner.wal.truncate()?;
        let remaining = inner.entries.clone();
        for revision in &remaining {
            inner.wal.append(revision)?;
        }
        Ok(())
    }

    /// Highest version currently buffered, if any.
    pub fn max_version(&self) -> Option<u64> {
        self.inner.lock().unwrap().entries.last().map(|w| w.version)
    }
}
