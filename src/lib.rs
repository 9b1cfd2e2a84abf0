//! # juncturedb
//!
//! The storage core of Concourse: a self-describing, versioned,
//! transactional document-graph database. This crate implements the
//! durable write path and the three block families a Concourse environment
//! is built on — HTTP, auth, CLI import, and driver marshaling live outside
//! this crate.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            Engine                               │
//! │  ┌───────────────┐        ┌────────────────────────────────┐   │
//! │  │  Write Buffer  │ ─────► │      Database (3 families)     │   │
//! │  │  (WAL-backed)  │ drain  │  cpb (primary)  (record,key,v) │   │
//! │  │  append/view/  │        │  csb (secondary) (key,value,v) │   │
//! │  │  find/verify   │        │  ctb (search)   (key,token,v)  │   │
//! │  └───────┬────────┘        └────────────────┬───────────────┘   │
//! │          │   select/find/search overlay      │ sealed blocks    │
//! │          └──────────────────┬────────────────┘                 │
//! │                             ▼                                  │
//! │                    Atomic Operations                           │
//! │       (optimistic version-change detection, §4.4)              │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation is a [`write::Write`] — an ADD or REMOVE of a typed
//! [`value::Value`] against a `(key, record)` pair — persisted with a
//! globally unique, monotonically increasing version. The Engine composes
//! the Write Buffer (durable staging) and the Database (three independently
//! indexed, immutable block families) into one versioned store; atomic
//! operations stage a batch of writes and commit them only if none of the
//! keys the operation observed changed underneath it.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | The Engine & Atomic Operations layer — open, add, remove, select, find, search, atomic operations |
//! | [`buffer`] | The Write Buffer — append-only, log-backed staging ahead of the database |
//! | [`db`] | The block-indexed Database — three immutable, sealed block families plus catalog and cache |
//! | [`slbs`] | Sparse Long Bit-Set — a compact set of 64-bit record ids |
//! | [`value`] | Typed primitive values and their stable big-endian encoding |
//! | [`write`] | The Write/Revision record and its stable wire encoding |
//! | [`config`] | Engine configuration: directory layout, environment sanitization |
//! | [`encoding`] | Generic binary (de)serialization used by the WAL, blocks, and catalog |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`compaction`] | Compaction strategy selector |
//! | [`pool`] | A fixed-size connection pool boundary component |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Three-way block indexing** — the same Revisions are durably indexed
//!   by `(record, key)`, by `(key, value)`, and by `(key, token)`, so point
//!   lookups, predicate scans, and substring search each get a native sort
//!   order instead of a full scan.
//! - **Optimistic atomic operations** — a staged batch of writes commits
//!   only if none of the keys it read have changed, with exactly-once
//!   version-change notification and deadlock-free read-then-write.
//! - **Block-level CRC32 integrity and bloom filters** — every sealed block
//!   is checksummed and carries a bloom filter for fast negative lookups.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use juncturedb::config::EngineConfig;
//! use juncturedb::engine::Engine;
//! use juncturedb::value::Value;
//!
//! let config = EngineConfig::at_root("/tmp/my_concourse_env", "default");
//! let engine = Engine::open(config).unwrap();
//!
//! engine.add("name", Value::String("ada lovelace".into()), 1).unwrap();
//! let history = engine.select(1, "name", None).unwrap();
//! assert_eq!(history.len(), 1);
//!
//! engine.close().unwrap();
//! ```

pub mod buffer;
pub mod compaction;
pub mod config;
pub mod db;
pub mod encoding;
pub mod engine;
pub mod pool;
pub mod slbs;
pub mod value;
pub mod wal;
pub mod write;
