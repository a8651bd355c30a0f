//! Microbenchmarks for the write paths.
//!
//! Run with: `cargo bench -p kairos -- write`

#![allow(missing_docs, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use kairos::aggregation::AggregationKind;
use kairos::{ChunkEncoding, DuplicatePolicy, SeriesOptions, Store};

const ENCODINGS: [ChunkEncoding; 2] = [ChunkEncoding::Uncompressed, ChunkEncoding::Compressed];

/// Creates a store with one series and, optionally, compaction rules.
fn setup_store(encoding: ChunkEncoding, rules: &[AggregationKind]) -> Store {
    let mut store = Store::new();
    store
        .create(
            "bench",
            SeriesOptions::new()
                .with_encoding(encoding)
                .with_duplicate_policy(DuplicatePolicy::Last),
        )
        .unwrap();

    for kind in rules {
        let dest = format!("bench_{kind}");
        store.create(&dest, SeriesOptions::new()).unwrap();
        store.add_rule("bench", &dest, *kind, 60_000).unwrap();
    }
    store
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("write/append");

    for encoding in ENCODINGS {
        let mut store = setup_store(encoding, &[]);
        let mut ts = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(encoding), &encoding, |b, _| {
            b.iter(|| {
                ts += 1_000;
                store
                    .add(black_box("bench"), black_box(ts), black_box(42.5))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_append_with_rules(c: &mut Criterion) {
    let rules = [AggregationKind::Avg, AggregationKind::Max, AggregationKind::StdP];
    let mut store = setup_store(ChunkEncoding::Compressed, &rules);
    let mut ts = 0u64;

    c.bench_function("write/append_3_rules", |b| {
        b.iter(|| {
            ts += 1_000;
            store
                .add(black_box("bench"), black_box(ts), black_box((ts % 97) as f64))
                .unwrap();
        });
    });
}

fn bench_upsert_out_of_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("write/upsert_past");

    for encoding in ENCODINGS {
        let mut store = setup_store(encoding, &[]);
        for i in 0..100_000u64 {
            store.add("bench", i * 10, 1.0).unwrap();
        }
        let mut i = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(encoding), &encoding, |b, _| {
            b.iter(|| {
                i = (i + 7_919) % 100_000;
                store
                    .upsert(black_box("bench"), black_box(i * 10), black_box(2.0), None)
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query/range_1000");

    for encoding in ENCODINGS {
        let mut store = setup_store(encoding, &[]);
        for i in 0..100_000u64 {
            store.add("bench", i * 10, i as f64).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(encoding), &encoding, |b, _| {
            b.iter(|| {
                let result = store
                    .query(black_box("bench"), black_box(500_000), black_box(509_990), false)
                    .unwrap();
                black_box(result.count())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append,
    bench_append_with_rules,
    bench_upsert_out_of_order,
    bench_query,
);
criterion_main!(benches);
