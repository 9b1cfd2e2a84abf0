//! Integration tests for the public `Engine` API.
//!
//! These tests exercise the full storage stack (write buffer → database
//! block families → catalog) through `juncturedb::engine::Engine` and its
//! companions only. No internal modules are referenced.
//!
//! ## Coverage areas
//! - **Lifecycle**: open, close, idempotent close, reopen
//! - **CRUD**: add, remove, select, overlay semantics
//! - **Find / search**: predicate operators, tokenized substring search
//! - **Persistence**: data survives close → reopen, across transport
//! - **Compaction**: block families compact without losing live data
//! - **Config validation**: `EngineConfig` constraint violations rejected
//! - **Concurrency**: multiple threads writing and reading the same engine
//!
//! ## See also
//! - [`integration_coverage`] — atomic operations, SLBS, pool, cache coherence
//! - [`integration_hardening`] — version-change notification, deadlock-free
//!   read-then-write, environment sanitization boundary values

use juncturedb::config::EngineConfig;
use juncturedb::db::Operator;
use juncturedb::engine::Engine;
use juncturedb::value::Value;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open(dir: &std::path::Path) -> Engine {
    Engine::open(EngineConfig::at_root(dir, "default")).unwrap()
}

/// A config that seals database blocks after a handful of writes, so a
/// modest test produces multiple sealed blocks per family.
fn small_block_config(dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::at_root(dir, "default");
    config.block_seal_threshold = 8;
    config
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Open a fresh engine and immediately close it.
///
/// # Expected behavior
/// Both operations succeed without error.
#[test]
fn open_close_empty() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.close().unwrap();
}

/// # Scenario
/// Calling `close()` twice must not panic or return an error.
///
/// # Expected behavior
/// Both calls return `Ok(())`.
#[test]
fn close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    engine.close().unwrap();
    engine.close().unwrap();
}

// ================================================================================================
// Basic CRUD / overlay
// ================================================================================================

/// # Scenario
/// Basic add/select round-trip for a single (key, record).
///
/// # Expected behavior
/// `select` returns exactly the one added revision.
#[test]
fn add_then_select_single() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    engine.add("name", Value::String("ada".into()), 1).unwrap();
    let out = engine.select(1, "name", None).unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value, Value::String("ada".into()));

    engine.close().unwrap();
}

/// # Scenario
/// Multiple adds to the same (key, record) all remain in the folded view,
/// ordered by version (§3: "folded view of Revisions").
///
/// # Expected behavior
/// `select` returns every revision, oldest version first.
#[test]
fn select_folds_every_revision_in_version_order() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    engine.add("name", Value::String("ada".into()), 1).unwrap();
    engine.add("name", Value::String("ada lovelace".into()), 1).unwrap();

    let out = engine.select(1, "name", None).unwrap();
    assert_eq!(out.len(), 2);
    assert!(out[0].version < out[1].version);
    assert_eq!(out[1].value, Value::String("ada lovelace".into()));

    engine.close().unwrap();
}

/// # Scenario
/// `remove` is folded into the view alongside `add`, not subtracted out of
/// it — §4.3 describes a Record view as a fold over Revisions, not a
/// key-value overwrite.
///
/// # Expected behavior
/// Both the ADD and the REMOVE revision for the value are present.
#[test]
fn remove_is_folded_alongside_add() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    engine.add("age", Value::Integer(30), 1).unwrap();
    engine.remove("age", Value::Integer(30), 1).unwrap();

    let out = engine.select(1, "age", None).unwrap();
    assert_eq!(out.len(), 2);

    engine.close().unwrap();
}

/// # Scenario
/// `select` with no prior writes for a (key, record) returns an empty view.
#[test]
fn select_nonexistent_record_is_empty() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    assert!(engine.select(999, "missing", None).unwrap().is_empty());
    engine.close().unwrap();
}

// ================================================================================================
// Find / search
// ================================================================================================

/// # Scenario
/// `find` with a range operator matches across records sharing a key.
///
/// # Expected behavior
/// Only the record whose value satisfies the predicate is returned.
#[test]
fn find_matches_by_operator_across_records() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    engine.add("age", Value::Integer(30), 1).unwrap();
    engine.add("age", Value::Integer(40), 2).unwrap();

    let found = engine.find("age", Operator::GreaterThan, &Value::Integer(35), None).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].record, 2);

    engine.close().unwrap();
}

/// # Scenario
/// `search` finds a lower-cased substring token inside a STRING value
/// (§6: tokens are produced by lowercasing and splitting on non-alphanumeric
/// boundaries).
///
/// # Expected behavior
/// A search for "rust" matches a bio containing "Rust".
#[test]
fn search_finds_token_case_insensitively() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    engine.add("bio", Value::String("Loves Rust programming".into()), 1).unwrap();

    let hits = engine.search("bio", "rust").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record, 1);

    engine.close().unwrap();
}

/// # Scenario
/// `Tag` values are equality-searchable via `find` but never tokenized for
/// `search` (§6).
#[test]
fn tag_values_are_not_tokenized() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    engine.add("category", Value::Tag("rust crate".into()), 1).unwrap();

    assert!(engine.search("category", "rust").unwrap().is_empty());
    let found = engine
        .find("category", Operator::Equals, &Value::Tag("rust crate".into()), None)
        .unwrap();
    assert_eq!(found.len(), 1);

    engine.close().unwrap();
}

/// # Scenario
/// A historical `select` with a `ts` argument returns only revisions at or
/// before that version (§4.3: "a timestamp argument returns the view as of
/// that version").
#[test]
fn historical_select_respects_as_of_version() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    let first = engine.add("name", Value::String("a".into()), 1).unwrap();
    engine.add("name", Value::String("b".into()), 1).unwrap();

    let as_of = engine.select(1, "name", Some(first.version)).unwrap();
    assert_eq!(as_of.len(), 1);
    assert_eq!(as_of[0].value, Value::String("a".into()));

    engine.close().unwrap();
}

// ================================================================================================
// Persistence
// ================================================================================================

/// # Scenario
/// Data written before `close()` is readable after reopening, both before
/// and after the background transporter has drained it into the database.
#[test]
fn persistence_across_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let engine = open(dir.path());
        engine.add("persist_key", Value::String("persist_value".into()), 1).unwrap();
        engine.close().unwrap();
    }
    {
        let engine = open(dir.path());
        let out = engine.select(1, "persist_key", None).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Value::String("persist_value".into()));
        engine.close().unwrap();
    }
}

/// # Scenario
/// Hundreds of writes, forced through `trigger_sync` into multiple sealed
/// blocks per family, survive close → reopen.
#[test]
fn persistence_many_writes_across_multiple_blocks() {
    let dir = TempDir::new().unwrap();
    let config = small_block_config(dir.path());

    {
        let engine = Engine::open(config.clone()).unwrap();
        for i in 0..200u32 {
            engine.add("k", Value::Integer(i as i32), i as i64).unwrap();
        }
        engine.trigger_sync().unwrap();
        engine.close().unwrap();
    }
    {
        let engine = Engine::open(config).unwrap();
        for i in 0..200u32 {
            let out = engine.select(i as i64, "k", None).unwrap();
            assert_eq!(out.len(), 1, "record {i} should survive reopen");
            assert_eq!(out[0].value, Value::Integer(i as i32));
        }
        engine.close().unwrap();
    }
}

// ================================================================================================
// Compaction
// ================================================================================================

/// # Scenario
/// Minor compaction merges sealed blocks within a family without losing
/// any live revision (§4.3 added: "must never change the result of
/// select/find/search for any retained version").
#[test]
fn compaction_preserves_every_revision() {
    use juncturedb::db::Db;

    let dir = TempDir::new().unwrap();
    let db_dir = dir.path().join("database");
    let db = Db::open(&db_dir, 4).unwrap();

    for i in 0..64i64 {
        db.accept(juncturedb::write::Write::add("k", Value::Integer(i as i32), i, i as u64 + 1))
            .unwrap();
    }
    db.trigger_sync().unwrap();

    db.minor_compact(0, 0.5, 1.5).unwrap();

    for i in 0..64i64 {
        let out = db.select(i, "k", None).unwrap();
        assert_eq!(out.len(), 1, "record {i} should survive compaction");
    }
}

// ================================================================================================
// Config validation
// ================================================================================================

/// # Scenario
/// `buffer_dir` and `database_dir` pointing at the same path is rejected.
#[test]
fn config_rejects_identical_directories() {
    let mut config = EngineConfig::at_root("/tmp/juncturedb-config-test", "default");
    config.database_dir = config.buffer_dir.clone();
    assert!(Engine::open(config).is_err());
}

/// # Scenario
/// An empty, sanitized-to-nothing `default_environment` with no usable
/// fallback is rejected at startup (§6, §8 scenario 8).
#[test]
fn config_rejects_unsanitizable_default_environment() {
    let config = EngineConfig::at_root("/tmp/juncturedb-config-test-2", "$$$");
    assert!(Engine::open(config).is_err());
}

// ================================================================================================
// Concurrency
// ================================================================================================

/// # Scenario
/// Four threads each add 50 disjoint records; all 200 are readable after
/// the threads join.
#[test]
fn concurrent_writes_and_reads() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(dir.path()));

    let mut handles = vec![];
    for t in 0..4i64 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..50i64 {
                let record = t * 1000 + i;
                engine.add("k", Value::Long(record), record).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for t in 0..4i64 {
        for i in 0..50i64 {
            let record = t * 1000 + i;
            let out = engine.select(record, "k", None).unwrap();
            assert_eq!(out.len(), 1, "missing record {record}");
        }
    }

    engine.close().unwrap();
}
