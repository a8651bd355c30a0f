//! Integration tests for store lifecycle operations.

use std::io::Write;

use kairos::aggregation::AggregationKind;
use kairos::error::{ConfigError, KairosError, SeriesError};
use kairos::index::MemoryLabelIndex;
use kairos::keyspace::{Keyspace, MemoryKeyspace};
use kairos::{ChunkEncoding, EngineConfig, LabelMatcher, Sample, Series, SeriesOptions, Store};
use tempfile::NamedTempFile;

#[test]
fn test_store_lifecycle() {
    let mut store = Store::new();
    store
        .create(
            "cpu.web1",
            SeriesOptions::new()
                .with_label("metric", "cpu")
                .with_label("host", "web1"),
        )
        .unwrap();
    store
        .create(
            "cpu.web2",
            SeriesOptions::new()
                .with_label("metric", "cpu")
                .with_label("host", "web2"),
        )
        .unwrap();
    store.create("cpu.5m", SeriesOptions::new()).unwrap();
    store
        .add_rule("cpu.web1", "cpu.5m", AggregationKind::Avg, 300_000)
        .unwrap();

    for i in 0..20u32 {
        let ts = u64::from(i) * 60_000;
        store.add("cpu.web1", ts, f64::from(i)).unwrap();
        store.add("cpu.web2", ts, f64::from(i) * 2.0).unwrap();
    }

    assert_eq!(store.series_count(), 3);
    assert_eq!(
        store.query_index(&LabelMatcher::new([("metric", "cpu")])),
        vec!["cpu.web1", "cpu.web2"]
    );
    // Buckets 0, 300k, 600k closed; 900k open.
    let averages: Vec<f64> = store
        .query("cpu.5m", 0, u64::MAX, false)
        .unwrap()
        .map(|s| s.value)
        .collect();
    assert_eq!(averages, vec![2.0, 7.0, 12.0]);

    // Rename the source and keep compacting.
    store.rename("cpu.web1", "cpu.host1").unwrap();
    assert_eq!(
        store.get("cpu.5m").unwrap().source_key(),
        Some("cpu.host1")
    );
    assert_eq!(
        store.query_index(&LabelMatcher::new([("host", "web1")])),
        vec!["cpu.host1"]
    );
    store.add("cpu.host1", 1_200_000, 0.0).unwrap();
    assert_eq!(store.query("cpu.5m", 0, u64::MAX, false).unwrap().count(), 4);

    // Delete the destination; the source forgets the rule.
    assert!(store.delete("cpu.5m"));
    assert!(store.get("cpu.host1").unwrap().rules().is_empty());
    assert_eq!(store.last_deleted().unwrap().total_samples(), 4);
    store.add("cpu.host1", 1_500_000, 0.0).unwrap();
    assert!(store.purge_deleted());
}

#[test]
fn test_delete_source_unlinks_destination() {
    let mut store = Store::new();
    store.create("src", SeriesOptions::new()).unwrap();
    store.create("dst", SeriesOptions::new()).unwrap();
    store
        .add_rule("src", "dst", AggregationKind::Sum, 10)
        .unwrap();

    assert!(store.delete("src"));
    assert_eq!(store.get("dst").unwrap().source_key(), None);

    // dst can take a new source.
    store.create("src2", SeriesOptions::new()).unwrap();
    store
        .add_rule("src2", "dst", AggregationKind::Sum, 10)
        .unwrap();
}

#[test]
fn test_store_over_prepopulated_keyspace() {
    let mut keyspace = MemoryKeyspace::new();
    let series = Series::new("b", &SeriesOptions::new(), &EngineConfig::default()).unwrap();
    keyspace.insert(series).unwrap();

    let mut store =
        Store::with_parts(EngineConfig::default(), keyspace, MemoryLabelIndex::new()).unwrap();
    store.create("a", SeriesOptions::new()).unwrap();
    store.add("b", 1, 1.0).unwrap();

    assert_eq!(store.keys(), vec!["a", "b"]);
    assert_eq!(store.get("b").unwrap().total_samples(), 1);
}

/// Keyspace refusing keys under a reserved prefix, as a host might.
#[derive(Default)]
struct ReservingKeyspace {
    inner: MemoryKeyspace,
}

impl Keyspace for ReservingKeyspace {
    fn resolve(&self, key: &str) -> Option<&Series> {
        self.inner.resolve(key)
    }

    fn resolve_mut(&mut self, key: &str) -> Option<&mut Series> {
        self.inner.resolve_mut(key)
    }

    fn insert(&mut self, series: Series) -> Result<(), SeriesError> {
        if series.key().starts_with("reserved.") {
            return Err(SeriesError::SeriesAlreadyExists {
                key: series.key().to_string(),
            });
        }
        self.inner.insert(series)
    }

    fn remove(&mut self, key: &str) -> Option<Series> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[test]
fn test_rejected_rename_unlinks_partners() {
    let mut store = Store::with_parts(
        EngineConfig::default(),
        ReservingKeyspace::default(),
        MemoryLabelIndex::new(),
    )
    .unwrap();
    for key in ["raw", "mid", "coarse"] {
        store.create(key, SeriesOptions::new()).unwrap();
    }
    store
        .add_rule("raw", "mid", AggregationKind::Sum, 10)
        .unwrap();
    store
        .add_rule("mid", "coarse", AggregationKind::Sum, 100)
        .unwrap();

    let err = store.rename("mid", "reserved.mid").unwrap_err();
    assert!(matches!(
        err,
        KairosError::Series(SeriesError::SeriesAlreadyExists { .. })
    ));

    assert_eq!(store.keys(), vec!["coarse", "raw"]);
    assert!(store.get("raw").unwrap().rules().is_empty());
    assert_eq!(store.get("coarse").unwrap().source_key(), None);

    // Both survivors accept new links and writes.
    store.add("raw", 5, 1.0).unwrap();
    store
        .add_rule("raw", "coarse", AggregationKind::Sum, 10)
        .unwrap();
}

#[test]
fn test_series_options_override_config() {
    let config = EngineConfig {
        retention_ms: 10_000,
        chunk_size_bytes: 1024,
        encoding: ChunkEncoding::Uncompressed,
        ..EngineConfig::default()
    };
    let mut store = Store::with_config(config).unwrap();
    store.create("default", SeriesOptions::new()).unwrap();
    store
        .create(
            "custom",
            SeriesOptions::new()
                .with_retention(0)
                .with_chunk_size(128)
                .with_encoding(ChunkEncoding::Compressed),
        )
        .unwrap();

    let default = store.info("default").unwrap();
    assert_eq!(default.retention_ms, 10_000);
    assert_eq!(default.chunk_size_bytes, 1024);
    assert_eq!(default.encoding, ChunkEncoding::Uncompressed);

    let custom = store.info("custom").unwrap();
    assert_eq!(custom.retention_ms, 0);
    assert_eq!(custom.chunk_size_bytes, 128);
    assert_eq!(custom.encoding, ChunkEncoding::Compressed);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = EngineConfig {
        chunk_size_bytes: 8,
        ..EngineConfig::default()
    };
    let err = Store::with_config(config).unwrap_err();
    assert!(matches!(err, KairosError::Config(ConfigError::Invalid { .. })));
}

#[test]
fn test_config_loaded_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "duplicate_policy": "sum", "compaction_rules": [{{ "aggregation": "count", "bucket_ms": 100 }}] }}"#
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    let mut store = Store::with_config(config).unwrap();
    store.create("hits", SeriesOptions::new()).unwrap();

    store.add("hits", 10, 1.0).unwrap();
    store.add("hits", 10, 1.0).unwrap();
    store.add("hits", 150, 1.0).unwrap();

    let hits: Vec<Sample> = store.query("hits", 0, 1000, false).unwrap().collect();
    assert_eq!(hits, vec![Sample::new(10, 2.0), Sample::new(150, 1.0)]);
    assert_eq!(
        store.query("hits_COUNT_100", 0, 1000, false).unwrap().collect_all(),
        vec![Sample::new(0, 1.0)]
    );
}

#[test]
fn test_create_validates_options() {
    let mut store = Store::new();
    let err = store
        .create("bad", SeriesOptions::new().with_chunk_size(2 * 1024 * 1024))
        .unwrap_err();
    assert!(matches!(
        err,
        KairosError::Series(SeriesError::InvalidChunkSize { .. })
    ));
    assert!(store.create("", SeriesOptions::new()).is_err());
    assert_eq!(store.series_count(), 0);
}

#[test]
fn test_info_serializes_to_json() {
    let mut store = Store::new();
    store
        .create("temp", SeriesOptions::new().with_label("room", "lab"))
        .unwrap();
    store.add("temp", 1000, 21.5).unwrap();

    let json = serde_json::to_value(store.info("temp").unwrap()).unwrap();
    assert_eq!(json["key"], "temp");
    assert_eq!(json["total_samples"], 1);
    assert_eq!(json["encoding"], "compressed");
    assert_eq!(json["last_timestamp"], 1000);
}
