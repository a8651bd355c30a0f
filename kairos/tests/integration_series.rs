//! Integration tests for series write paths across both chunk encodings.

use kairos::chunk::{Chunk, ChunkEncoding};
use kairos::error::{ChunkError, KairosError};
use kairos::{DuplicatePolicy, EngineConfig, Sample, Series, SeriesOptions};

const ENCODINGS: [ChunkEncoding; 2] = [ChunkEncoding::Uncompressed, ChunkEncoding::Compressed];

fn small_series(encoding: ChunkEncoding) -> Series {
    let options = SeriesOptions::new()
        .with_chunk_size(256)
        .with_encoding(encoding);
    Series::new("series", &options, &EngineConfig::default()).unwrap()
}

fn all(series: &Series) -> Vec<Sample> {
    series.range(0, u64::MAX, false).collect()
}

/// Deterministic permutation of `0..n` for a prime `n`.
fn permuted(n: u64) -> impl Iterator<Item = u64> {
    (0..n).map(move |i| (i * 7919) % n)
}

#[test]
fn test_out_of_order_upserts_keep_order_and_disjoint_chunks() {
    for encoding in ENCODINGS {
        let mut series = small_series(encoding);
        for ts in 0..500 {
            series.add_sample(ts * 20, 1.0).unwrap();
        }
        // 499 is prime; fill the odd slots in scrambled order.
        for i in permuted(499) {
            series.upsert_sample(i * 20 + 10, 2.0, None).unwrap();
        }

        let samples = all(&series);
        assert_eq!(samples.len(), 999, "{encoding}");
        assert_eq!(series.total_samples(), 999);
        assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let mut previous_last = None;
        for (key, chunk) in series.chunks().iter() {
            let first = chunk.first_timestamp().unwrap();
            assert_eq!(key.timestamp(), first);
            if let Some(prev) = previous_last {
                assert!(prev < first, "{encoding}: overlapping chunks");
            }
            previous_last = chunk.last_timestamp();
        }
        assert_eq!(previous_last, Some(series.last_timestamp()));
    }
}

#[test]
fn test_reverse_iteration_mirrors_forward() {
    for encoding in ENCODINGS {
        let mut series = small_series(encoding);
        for ts in 0u32..300 {
            series.add_sample(u64::from(ts) * 3, f64::from(ts)).unwrap();
        }

        for (min, max) in [(0, u64::MAX), (17, 451), (450, 450), (1000, 2000), (1, 2)] {
            let forward: Vec<Sample> = series.range(min, max, false).collect();
            let mut reverse: Vec<Sample> = series.range(min, max, true).collect();
            reverse.reverse();
            assert_eq!(forward, reverse, "{encoding} [{min}, {max}]");
            assert!(forward.iter().all(|s| s.timestamp >= min && s.timestamp <= max));
        }
    }
}

#[test]
fn test_last_policy_round_trip() {
    for encoding in ENCODINGS {
        let mut series = small_series(encoding);
        for ts in 0..100 {
            series.add_sample(ts, 0.0).unwrap();
        }

        series.upsert_sample(42, 4.2, Some(DuplicatePolicy::Last)).unwrap();
        let found: Vec<Sample> = series.range(42, 42, false).collect();
        assert_eq!(found, vec![Sample::new(42, 4.2)]);
        assert_eq!(series.total_samples(), 100);
    }
}

#[test]
fn test_block_policy_is_idempotent() {
    for encoding in ENCODINGS {
        let mut series = small_series(encoding);
        for ts in 0..50 {
            series.add_sample(ts * 10, 1.0).unwrap();
        }
        let before = all(&series);

        for _ in 0..3 {
            let err = series.upsert_sample(250, 9.0, None).unwrap_err();
            assert!(matches!(
                err,
                KairosError::Chunk(ChunkError::DuplicateRejected { timestamp: 250 })
            ));
        }
        assert_eq!(all(&series), before);
        assert_eq!(series.total_samples(), 50);
    }
}

#[test]
fn test_policies_resolve_collisions() {
    let cases = [
        (DuplicatePolicy::First, 1.0),
        (DuplicatePolicy::Last, 3.0),
        (DuplicatePolicy::Min, 1.0),
        (DuplicatePolicy::Max, 3.0),
        (DuplicatePolicy::Sum, 4.0),
    ];
    for encoding in ENCODINGS {
        for (policy, expected) in cases {
            let mut series = small_series(encoding);
            series.add_sample(100, 1.0).unwrap();
            series.add_sample(200, 0.0).unwrap();
            series.upsert_sample(100, 3.0, Some(policy)).unwrap();

            let value = series.range(100, 100, false).next().map(|s| s.value);
            assert_eq!(value, Some(expected), "{encoding} {policy}");
        }
    }
}

#[test]
fn test_retention_trims_whole_chunks() {
    for encoding in ENCODINGS {
        let options = SeriesOptions::new()
            .with_chunk_size(64)
            .with_encoding(encoding)
            .with_retention(1_000);
        let mut series = Series::new("series", &options, &EngineConfig::default()).unwrap();
        for ts in 0..2_000 {
            series.add_sample(ts * 10, 1.0).unwrap();
        }
        // Trimming runs when a chunk opens; catch up with the final tip.
        series.trim();

        let floor = series.retention_floor();
        assert_eq!(floor, 19_990 - 1_000);
        // Only a chunk straddling the floor may hold older samples.
        let stale: Vec<u64> = series
            .chunks()
            .iter()
            .filter_map(|(_, chunk)| chunk.last_timestamp())
            .filter(|&last| last < floor)
            .collect();
        assert!(stale.is_empty(), "{encoding}: {stale:?}");
        assert_eq!(series.total_samples(), all(&series).len());

        let (first_valid, skipped) = series.first_valid_timestamp();
        assert_eq!(first_valid, Some(floor));
        assert_eq!(
            skipped,
            all(&series).iter().filter(|s| s.timestamp < floor).count()
        );
    }
}

#[test]
fn test_compressed_chunks_hold_more_samples() {
    let mut plain = small_series(ChunkEncoding::Uncompressed);
    let mut packed = small_series(ChunkEncoding::Compressed);
    for ts in 0..1_000 {
        plain.add_sample(ts * 1_000, 21.5).unwrap();
        packed.add_sample(ts * 1_000, 21.5).unwrap();
    }

    assert_eq!(all(&plain), all(&packed));
    assert!(packed.chunks().len() < plain.chunks().len());
    assert!(packed.chunks().size_bytes() < plain.chunks().size_bytes());
}

#[test]
fn test_special_values_survive_compression() {
    let mut series = small_series(ChunkEncoding::Compressed);
    let values = [0.0, -0.0, f64::MAX, f64::MIN_POSITIVE, f64::INFINITY, -1.5];
    for (ts, value) in (0u64..).zip(values) {
        series.add_sample(ts, value).unwrap();
    }
    series.add_sample(10, f64::NAN).unwrap();

    let stored = all(&series);
    for (sample, expected) in stored.iter().zip(values) {
        assert_eq!(sample.value.to_bits(), expected.to_bits());
    }
    assert!(stored[6].value.is_nan());
}
