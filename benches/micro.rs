//! Micro-benchmarks for juncturedb core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- add       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use juncturedb::config::EngineConfig;
use juncturedb::db::Operator;
use juncturedb::engine::Engine;
use juncturedb::value::Value;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Opens a fresh engine with the default seal threshold, so everything
/// stays in the write buffer for the duration of a short benchmark.
fn open_default(dir: &std::path::Path) -> Engine {
    Engine::open(EngineConfig::at_root(dir, "default")).expect("open")
}

/// Opens an engine that seals database blocks after a handful of writes,
/// so sustained-write benchmarks exercise the transporter and compaction
/// path rather than staying purely in the buffer.
fn open_small_block(dir: &std::path::Path) -> Engine {
    let mut config = EngineConfig::at_root(dir, "default");
    config.block_seal_threshold = 64;
    config.transport_batch_size = 32;
    Engine::open(config).expect("open")
}

/// Pre-populates an engine with `count` sequential records under key
/// "field" and forces a sync, so reads hit sealed database blocks rather
/// than the write buffer overlay.
fn prepopulate(engine: &Engine, count: i64) {
    for i in 0..count {
        engine.add("field", Value::Long(i), i).unwrap();
    }
    engine.trigger_sync().unwrap();
}

// ================================================================================================
// Write benchmarks
// ================================================================================================

/// Benchmark group for `add` (write-path) operations.
///
/// # Sub-benchmarks
///
/// ## `buffer_only`
///
/// **Scenario:** Appends a single revision to a freshly opened engine,
/// with the seal threshold high enough that nothing is transported into
/// the database during measurement.
///
/// **What it measures:** The raw cost of the write buffer's WAL append
/// plus in-memory index insertion — the path every `add` takes before the
/// background transporter ever runs.
///
/// ## `sustained_with_transport`
///
/// **Scenario:** Continuously adds revisions against an engine configured
/// with a small block-seal threshold, so the background transporter is
/// actively draining the buffer during the benchmark.
///
/// **What it measures:** Sustained write throughput including the
/// amortized cost of transport and block sealing — closer to a
/// long-running workload than `buffer_only`.
fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");

    group.bench_function("buffer_only", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_default(dir.path());
        let mut seq = 0i64;

        b.iter(|| {
            engine.add("field", black_box(Value::Long(seq)), seq).unwrap();
            seq += 1;
        });

        engine.close().unwrap();
    });

    group.bench_function("sustained_with_transport", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_block(dir.path());
        let mut seq = 0i64;

        b.iter(|| {
            engine.add("field", black_box(Value::Long(seq)), seq).unwrap();
            seq += 1;
        });

        engine.close().unwrap();
    });

    group.finish();
}

// ================================================================================================
// Read benchmarks
// ================================================================================================

/// Benchmark group for `select` (point read) operations against data that
/// has already been transported into sealed database blocks.
fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");

    for &count in &[100u64, 10_000u64] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("populated", count), &count, |b, &count| {
            let dir = TempDir::new().unwrap();
            let engine = open_default(dir.path());
            prepopulate(&engine, count as i64);

            b.iter_batched(
                || (count / 2) as i64,
                |record| {
                    black_box(engine.select(record, "field", None).unwrap());
                },
                BatchSize::SmallInput,
            );

            engine.close().unwrap();
        });
    }

    group.finish();
}

/// Benchmark for `find` (predicate scan across records) via the secondary
/// family.
fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");

    group.bench_function("greater_than_over_10k_records", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_default(dir.path());
        prepopulate(&engine, 10_000);

        b.iter(|| {
            black_box(engine.find("field", Operator::GreaterThan, &Value::Long(9_000), None).unwrap());
        });

        engine.close().unwrap();
    });

    group.finish();
}

/// Benchmark for `search` (tokenized substring search) via the search
/// family.
fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    group.bench_function("token_over_1k_records", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_default(dir.path());
        for i in 0..1_000i64 {
            engine.add("bio", Value::String(format!("record number {i} likes rust")), i).unwrap();
        }
        engine.trigger_sync().unwrap();

        b.iter(|| {
            black_box(engine.search("bio", "rust").unwrap());
        });

        engine.close().unwrap();
    });

    group.finish();
}

// ================================================================================================
// Atomic operation benchmarks
// ================================================================================================

/// Benchmark for an uncontended atomic operation's full commit cycle:
/// open, one watched read, one staged write, commit.
fn bench_atomic_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic_operation");

    group.bench_function("read_then_write_commit_uncontended", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_default(dir.path());
        engine.add("field", Value::Long(0), 1).unwrap();

        b.iter(|| {
            let mut op = engine.start_atomic_operation().unwrap();
            let _ = op.select(1, "field");
            op.add("field", black_box(Value::Long(1)), 1);
            assert!(op.commit());
        });

        engine.close().unwrap();
    });

    group.finish();
}

criterion_group!(benches, bench_add, bench_select, bench_find, bench_search, bench_atomic_commit);
criterion_main!(benches);
