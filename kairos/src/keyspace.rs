//! Host key store abstraction.
//!
//! The engine never holds references between series. Every cross-series
//! access (compaction writes, rule bookkeeping, rename and delete cleanup)
//! resolves a key through a [`Keyspace`] for the duration of one call.

use std::collections::BTreeMap;

use crate::error::SeriesError;
use crate::series::Series;

/// Resolves series keys to series handles.
pub trait Keyspace {
    /// Returns the series stored under `key`.
    fn resolve(&self, key: &str) -> Option<&Series>;

    /// Returns the series stored under `key` for mutation.
    fn resolve_mut(&mut self, key: &str) -> Option<&mut Series>;

    /// Stores `series` under its own key.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::SeriesAlreadyExists`] if the key is taken; the
    /// series is dropped in that case.
    fn insert(&mut self, series: Series) -> Result<(), SeriesError>;

    /// Removes and returns the series stored under `key`.
    fn remove(&mut self, key: &str) -> Option<Series>;

    /// Returns `true` if a series is stored under `key`.
    fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    /// Returns every stored key.
    fn keys(&self) -> Vec<String>;

    /// Number of stored series.
    fn len(&self) -> usize;

    /// Returns `true` if no series is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`Keyspace`] backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryKeyspace {
    series: BTreeMap<String, Series>,
}

impl MemoryKeyspace {
    /// Creates an empty keyspace.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keyspace for MemoryKeyspace {
    fn resolve(&self, key: &str) -> Option<&Series> {
        self.series.get(key)
    }

    fn resolve_mut(&mut self, key: &str) -> Option<&mut Series> {
        self.series.get_mut(key)
    }

    fn insert(&mut self, series: Series) -> Result<(), SeriesError> {
        if self.series.contains_key(series.key()) {
            return Err(SeriesError::SeriesAlreadyExists {
                key: series.key().to_string(),
            });
        }
        self.series.insert(series.key().to_string(), series);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Option<Series> {
        self.series.remove(key)
    }

    fn contains(&self, key: &str) -> bool {
        self.series.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.series.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, SeriesOptions};

    fn series(key: &str) -> Series {
        Series::new(key, &SeriesOptions::default(), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_insert_resolve_remove() {
        let mut keyspace = MemoryKeyspace::new();
        assert!(keyspace.is_empty());

        keyspace.insert(series("b")).unwrap();
        keyspace.insert(series("a")).unwrap();
        assert_eq!(keyspace.keys(), vec!["a", "b"]);
        assert!(keyspace.contains("a"));

        keyspace.resolve_mut("a").unwrap().add_sample(1, 1.0).unwrap();
        assert_eq!(keyspace.resolve("a").unwrap().total_samples(), 1);

        let removed = keyspace.remove("a").unwrap();
        assert_eq!(removed.key(), "a");
        assert!(keyspace.resolve("a").is_none());
        assert_eq!(keyspace.len(), 1);
    }

    #[test]
    fn test_insert_existing_key_fails() {
        let mut keyspace = MemoryKeyspace::new();
        keyspace.insert(series("cpu")).unwrap();

        let err = keyspace.insert(series("cpu")).unwrap_err();
        assert_eq!(
            err,
            SeriesError::SeriesAlreadyExists {
                key: "cpu".to_string()
            }
        );
    }
}
