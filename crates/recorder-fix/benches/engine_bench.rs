//! Criterion benchmarks for recorder-fix.
//!
//! ## Benchmark groups
//!
//! 1. **reads**: entity listing, unique values and recent states on a
//!    synthetic recorder database.
//! 2. **delete**: the three-table deletion transaction, including the
//!    unscoped short-term pass.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/recorder-fix/Cargo.toml
//! # Run only the deletion group:
//! cargo bench --manifest-path crates/recorder-fix/Cargo.toml -- delete
//! ```

use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rusqlite::{params, Connection};

use recorder_fix::store::schema::FIXTURE_STATEMENTS;
use recorder_fix::RepairEngine;

const ENTITIES: i64 = 50;
const STATES_PER_ENTITY: i64 = 400;
const STATS_PER_ENTITY: i64 = 100;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Populate a recorder database with `ENTITIES` sensors, each with raw states
/// cycling through a handful of values plus long- and short-term aggregates.
fn populate(path: &Path) {
    let mut conn = Connection::open(path).unwrap();
    for stmt in FIXTURE_STATEMENTS {
        conn.execute_batch(stmt).unwrap();
    }

    let tx = conn.transaction().unwrap();
    for entity in 1..=ENTITIES {
        let entity_id = format!("sensor.bench_{entity:03}");
        tx.execute(
            "INSERT INTO states_meta(metadata_id, entity_id) VALUES (?1, ?2);",
            params![entity, entity_id],
        )
        .unwrap();
        tx.execute(
            "INSERT INTO statistics_meta(id, statistic_id) VALUES (?1, ?2);",
            params![entity, entity_id],
        )
        .unwrap();

        for i in 0..STATES_PER_ENTITY {
            let state = match i % 5 {
                0 => "unavailable".to_string(),
                n => format!("{}.5", 20 + n),
            };
            tx.execute(
                "INSERT INTO states(state, last_updated_ts, metadata_id) VALUES (?1, ?2, ?3);",
                params![state, 1_700_000_000.0 + (i * 30) as f64, entity],
            )
            .unwrap();
        }

        for i in 0..STATS_PER_ENTITY {
            let base = 20.0 + (i % 4) as f64;
            for table in ["statistics", "statistics_short_term"] {
                tx.execute(
                    &format!(
                        "INSERT INTO {table}(metadata_id, start_ts, state, min, max, mean) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6);"
                    ),
                    params![
                        entity,
                        1_700_000_000.0 + (i * 300) as f64,
                        base + 0.5,
                        base,
                        base + 1.0,
                        base + 0.5
                    ],
                )
                .unwrap();
            }
        }
    }
    tx.commit().unwrap();
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_reads(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("home-assistant_v2.db");
    populate(&path);
    let engine = RepairEngine::open(&path).unwrap();

    let mut group = c.benchmark_group("reads");
    group.bench_function("list_entities", |b| {
        b.iter(|| black_box(engine.list_entities().unwrap()))
    });
    group.bench_function("list_unique_values", |b| {
        b.iter(|| black_box(engine.list_unique_values("sensor.bench_025").unwrap()))
    });
    group.bench_function("list_recent_states_200", |b| {
        b.iter(|| black_box(engine.list_recent_states("sensor.bench_025", None).unwrap()))
    });
    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.db");
    populate(&template);

    let mut group = c.benchmark_group("delete");
    group.sample_size(20);
    for (name, value) in [("numeric", "21.5"), ("text_only", "unavailable")] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let copy = dir.path().join(format!("{name}.db"));
                    std::fs::copy(&template, &copy).unwrap();
                    RepairEngine::open(&copy).unwrap()
                },
                |engine| {
                    black_box(
                        engine
                            .delete_value_everywhere("sensor.bench_025", value)
                            .unwrap(),
                    )
                },
                BatchSize::PerIteration,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reads, bench_delete);
criterion_main!(benches);
