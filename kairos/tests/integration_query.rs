//! Integration tests for the query functionality.

use kairos::error::{KairosError, QueryError, SeriesError};
use kairos::{ChunkEncoding, SeriesOptions, Store};

fn store_with_data(retention_ms: u64) -> Store {
    let mut store = Store::new();
    store
        .create(
            "cpu",
            SeriesOptions::new()
                .with_retention(retention_ms)
                .with_chunk_size(64)
                .with_encoding(ChunkEncoding::Uncompressed),
        )
        .unwrap();
    for i in 0..100u32 {
        store.add("cpu", u64::from(i) * 100, f64::from(i)).unwrap();
    }
    store
}

#[test]
fn test_query_integration() {
    let store = store_with_data(0);

    let result = store.query("cpu", 1_000, 2_000, false).unwrap();
    assert_eq!(result.requested_range(), (1_000, 2_000));
    assert_eq!(result.effective_range(), (1_000, 2_000));
    assert_eq!(result.available_range(), (Some(0), Some(9_900)));
    assert!(!result.may_be_incomplete());
    assert!(result.fully_covered());
    assert!(!result.is_reverse());

    let data = result.collect_all();
    assert_eq!(data.len(), 11);
    assert_eq!(data.first().map(|s| s.timestamp), Some(1_000));
    assert_eq!(data.last().map(|s| s.timestamp), Some(2_000));
}

#[test]
fn test_query_reverse() {
    let store = store_with_data(0);

    let result = store.query("cpu", 0, u64::MAX, true).unwrap();
    assert!(result.is_reverse());
    // An open-ended live query is not covered, yet nothing is missing.
    assert!(!result.fully_covered());
    assert!(!result.may_be_incomplete());
    let timestamps: Vec<u64> = result.map(|s| s.timestamp).collect();
    let mut expected: Vec<u64> = (0..100).map(|i| i * 100).collect();
    expected.reverse();
    assert_eq!(timestamps, expected);
}

#[test]
fn test_query_bounds_between_samples() {
    let store = store_with_data(0);

    assert_eq!(store.query("cpu", 150, 180, false).unwrap().count(), 0);
    assert_eq!(store.query("cpu", 150, 250, true).unwrap().count(), 1);
    assert_eq!(store.query("cpu", 10_000, 20_000, false).unwrap().count(), 0);
    assert_eq!(store.query("cpu", 9_900, 9_900, false).unwrap().count(), 1);
}

#[test]
fn test_query_hides_samples_below_retention_floor() {
    let store = store_with_data(1_000);
    let series = store.get("cpu").unwrap();

    // A chunk straddling the floor still holds expired samples.
    let floor = series.retention_floor();
    assert_eq!(floor, 8_900);
    assert!(series.first_timestamp().unwrap() < floor);

    let result = store.query("cpu", 0, u64::MAX, false).unwrap();
    assert!(result.may_be_incomplete());
    assert_eq!(result.effective_range(), (8_900, u64::MAX));
    let data = result.collect_all();
    assert_eq!(data.len(), 11);
    assert!(data.iter().all(|s| s.timestamp >= floor));
}

#[test]
fn test_query_fully_below_retention_floor() {
    let store = store_with_data(1_000);
    let result = store.query("cpu", 0, 5_000, false).unwrap();
    assert!(result.may_be_incomplete());
    assert_eq!(result.count(), 0);
}

#[test]
fn test_query_errors() {
    let store = store_with_data(0);

    let err = store.query("cpu", 2_000, 1_000, false).unwrap_err();
    assert!(matches!(
        err,
        KairosError::Query(QueryError::InvalidTimeRange {
            start: 2_000,
            end: 1_000
        })
    ));

    let err = store.query("mem", 0, 1, false).unwrap_err();
    assert!(matches!(
        err,
        KairosError::Series(SeriesError::SeriesNotFound { .. })
    ));
}

#[test]
fn test_query_empty_series() {
    let mut store = Store::new();
    store.create("empty", SeriesOptions::new()).unwrap();

    let result = store.query("empty", 0, u64::MAX, false).unwrap();
    assert_eq!(result.available_range(), (None, None));
    assert!(result.may_be_incomplete());
    assert_eq!(result.count(), 0);
}
