//! Performance benchmarks for duplex-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use duplex_engine::tree::map_resolved;
use duplex_engine::{
    ChildSyncResult, DesiredNode, EntityRecord, Id, LevelSpec, ReconciliationPlan, SyncReport,
};
use serde_json::json;

fn desired_items(size: usize) -> Vec<EntityRecord> {
    // Every other item is new
    (0..size)
        .map(|i| {
            if i % 2 == 0 {
                EntityRecord::from(json!({"id": i as i64, "name": format!("Item {}", i)}))
            } else {
                EntityRecord::from(json!({"name": format!("Item {}", i)}))
            }
        })
        .collect()
}

fn bench_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("planning");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("build_plan", size), size, |b, &size| {
            let existing: Vec<Id> = (0..size as i64).collect();
            let desired = desired_items(size);
            b.iter(|| ReconciliationPlan::build(black_box(&existing), black_box(desired.clone())))
        });

        group.bench_with_input(BenchmarkId::new("map_resolved", size), size, |b, &size| {
            let declared: Vec<Option<Id>> = (0..size as i64)
                .map(|i| if i % 2 == 0 { Some(i) } else { None })
                .collect();
            let result = ChildSyncResult {
                created: (0..size / 2)
                    .map(|i| EntityRecord::from(json!({"id": 10_000 + i as i64})))
                    .collect(),
                updated: (0..size as i64)
                    .step_by(2)
                    .map(|i| EntityRecord::from(json!({"id": i})))
                    .collect(),
                ..ChildSyncResult::default()
            };
            b.iter(|| map_resolved(black_box(&declared), black_box(&result)))
        });
    }

    group.finish();
}

fn bench_drift(c: &mut Criterion) {
    let mut group = c.benchmark_group("drift");

    for size in [100, 1000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("compare", size), size, |b, &size| {
            let primary: Vec<EntityRecord> = (0..size as i64)
                .map(|i| EntityRecord::from(json!({"id": i, "name": "x"})))
                .collect();
            // Secondary misses every tenth row
            let secondary: Vec<EntityRecord> =
                primary.iter().filter(|r| r.id.unwrap_or(0) % 10 != 0).cloned().collect();
            b.iter(|| {
                SyncReport::compare(
                    "Product",
                    black_box(primary.clone()),
                    black_box(secondary.clone()),
                )
            })
        });
    }

    group.finish();
}

fn bench_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload");

    let levels = vec![LevelSpec::new("points", "ClausePoint", "id_clause")
        .with_child(LevelSpec::new("logs", "ClauseLog", "id_clause_point"))];
    let payload = json!({
        "title": "Payment terms",
        "points": (0..50).map(|i| json!({
            "text": format!("Point {}", i),
            "logs": [{"note": "a"}, {"note": "b"}]
        })).collect::<Vec<_>>()
    });

    group.bench_function("desired_from_json", |b| {
        b.iter(|| DesiredNode::from_json(black_box(payload.clone()), black_box(&levels)))
    });

    group.bench_function("record_to_json", |b| {
        let record = EntityRecord::from(json!({"id": 1, "name": "Test", "price": 12.5}));
        b.iter(|| serde_json::to_string(black_box(&record)))
    });

    group.finish();
}

criterion_group!(benches, bench_planning, bench_drift, bench_payload);
criterion_main!(benches);
