//! Engine and per-series configuration.
//!
//! [`EngineConfig`] holds the defaults applied to every series created by a
//! [`Store`](crate::Store), plus the global compaction rules instantiated for
//! each new series. It is loaded from JSON:
//!
//! ```json
//! {
//!   "retention_ms": 86400000,
//!   "chunk_size_bytes": 4096,
//!   "duplicate_policy": "last",
//!   "encoding": "compressed",
//!   "compaction_rules": [
//!     { "aggregation": "avg", "bucket_ms": 60000, "retention_ms": 604800000 }
//!   ]
//! }
//! ```
//!
//! [`SeriesOptions`] carries the overrides for a single series.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationKind;
use crate::chunk::ChunkEncoding;
use crate::error::{ConfigError, Result, SeriesError};
use crate::sample::{DEFAULT_DUPLICATE_POLICY, DuplicatePolicy};

/// Default chunk size target in bytes.
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 4096;

/// Smallest accepted chunk size target in bytes.
pub const MIN_CHUNK_SIZE_BYTES: usize = 48;

/// Largest accepted chunk size target in bytes.
pub const MAX_CHUNK_SIZE_BYTES: usize = 1_048_576;

/// Checks that a chunk size target lies within the supported range.
///
/// # Errors
///
/// Returns [`SeriesError::InvalidChunkSize`] when `size` is out of range.
pub fn validate_chunk_size(size: usize) -> std::result::Result<(), SeriesError> {
    if (MIN_CHUNK_SIZE_BYTES..=MAX_CHUNK_SIZE_BYTES).contains(&size) {
        Ok(())
    } else {
        Err(SeriesError::InvalidChunkSize {
            size,
            min: MIN_CHUNK_SIZE_BYTES,
            max: MAX_CHUNK_SIZE_BYTES,
        })
    }
}

/// Engine-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Default retention in milliseconds; 0 keeps samples forever.
    pub retention_ms: u64,

    /// Default chunk size target in bytes.
    pub chunk_size_bytes: usize,

    /// Duplicate policy used when neither the write nor the series set one.
    pub duplicate_policy: DuplicatePolicy,

    /// Chunk encoding for new series.
    pub encoding: ChunkEncoding,

    /// Compaction rules created for every new series.
    pub compaction_rules: Vec<RuleTemplate>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_ms: 0,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            duplicate_policy: DEFAULT_DUPLICATE_POLICY,
            encoding: ChunkEncoding::default(),
            compaction_rules: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or any error
    /// of [`EngineConfig::from_json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the chunk size is out of range or
    /// a compaction rule has a zero bucket width.
    pub fn validate(&self) -> Result<()> {
        validate_chunk_size(self.chunk_size_bytes).map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;

        for rule in &self.compaction_rules {
            rule.validate()?;
        }

        Ok(())
    }
}

/// A compaction rule instantiated for every new series.
///
/// For a source `key`, the destination series is named
/// `{key}_{AGGREGATION}_{bucket_ms}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleTemplate {
    /// Aggregation applied to each bucket.
    pub aggregation: AggregationKind,

    /// Bucket width in milliseconds.
    pub bucket_ms: u64,

    /// Retention of the destination series; 0 keeps samples forever.
    #[serde(default)]
    pub retention_ms: u64,
}

impl RuleTemplate {
    /// Creates a template.
    pub fn new(aggregation: AggregationKind, bucket_ms: u64, retention_ms: u64) -> Self {
        Self {
            aggregation,
            bucket_ms,
            retention_ms,
        }
    }

    /// Validates the template.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bucket_ms` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: format!("compaction rule {} has a zero bucket width", self.aggregation),
            }
            .into());
        }
        Ok(())
    }

    /// Returns the key of the destination series derived from `source`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kairos::aggregation::AggregationKind;
    /// use kairos::config::RuleTemplate;
    ///
    /// let template = RuleTemplate::new(AggregationKind::Avg, 60_000, 0);
    /// assert_eq!(template.dest_key("cpu"), "cpu_AVG_60000");
    /// ```
    pub fn dest_key(&self, source: &str) -> String {
        format!("{source}_{}_{}", self.aggregation, self.bucket_ms)
    }
}

impl FromStr for RuleTemplate {
    type Err = ConfigError;

    /// Parses `AGGREGATION:BUCKET_MS[:RETENTION_MS]`, e.g. `avg:60000`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid {
            reason: format!("expected AGGREGATION:BUCKET_MS[:RETENTION_MS], got '{s}'"),
        };

        let mut parts = s.split(':');
        let aggregation = parts.next().ok_or_else(invalid)?.parse()?;
        let bucket_ms = parts
            .next()
            .and_then(|p| p.parse().ok())
            .filter(|&bucket: &u64| bucket > 0)
            .ok_or_else(invalid)?;
        let retention_ms = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(aggregation, bucket_ms, retention_ms))
    }
}

/// Per-series overrides applied at creation.
///
/// Unset fields fall back to the [`EngineConfig`].
///
/// # Examples
///
/// ```rust
/// use kairos::{DuplicatePolicy, SeriesOptions};
///
/// let options = SeriesOptions::new()
///     .with_retention(3_600_000)
///     .with_duplicate_policy(DuplicatePolicy::Last)
///     .with_label("host", "web-1");
/// assert_eq!(options.labels.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesOptions {
    /// Retention in milliseconds; 0 keeps samples forever.
    pub retention_ms: Option<u64>,
    /// Chunk size target in bytes.
    pub chunk_size_bytes: Option<usize>,
    /// Series-level duplicate policy.
    pub duplicate_policy: Option<DuplicatePolicy>,
    /// Chunk encoding.
    pub encoding: Option<ChunkEncoding>,
    /// Labels attached to the series.
    pub labels: Vec<(String, String)>,
}

impl SeriesOptions {
    /// Creates options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retention in milliseconds.
    #[must_use]
    pub fn with_retention(mut self, retention_ms: u64) -> Self {
        self.retention_ms = Some(retention_ms);
        self
    }

    /// Sets the chunk size target in bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size_bytes: usize) -> Self {
        self.chunk_size_bytes = Some(chunk_size_bytes);
        self
    }

    /// Sets the series-level duplicate policy.
    #[must_use]
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = Some(policy);
        self
    }

    /// Sets the chunk encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: ChunkEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Adds several labels.
    #[must_use]
    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}
