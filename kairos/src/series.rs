//! A single time series: chunk directory, write paths and compaction rules.
//!
//! # Write paths
//!
//! - [`Series::add_sample`] is the append fast path. It only accepts
//!   timestamps after the last one and fills the last chunk, opening a new
//!   chunk (and trimming expired ones) when it is full.
//! - [`Series::upsert_sample`] accepts any timestamp. It locates the chunk
//!   covering the timestamp, splits chunks that grew past
//!   `chunk_size_bytes × 1.2`, and resolves collisions with a duplicate
//!   policy.
//!
//! Both paths keep the directory invariant: every chunk is keyed by its first
//! timestamp, and the last chunk holds `last_timestamp`.
//!
//! # Compaction
//!
//! The series owns its outgoing [`CompactionRule`]s but never touches their
//! destinations. Writes return the [`DownstreamWrite`]s the rules produced;
//! the [`Store`](crate::Store) applies them.

use serde::Serialize;
use tracing::debug;

use crate::aggregation::AggregationKind;
use crate::chunk::{AddStatus, Chunk, ChunkEncoding, UpsertOutcome};
use crate::compaction::{CompactionRule, DownstreamWrite, WriteMode};
use crate::config::{EngineConfig, SeriesOptions, validate_chunk_size};
use crate::directory::{ChunkDirectory, ChunkKey};
use crate::error::{ChunkError, Result, SeriesError};
use crate::iter::SeriesIterator;
use crate::sample::{DuplicatePolicy, Sample};

/// Chunks are split once their size exceeds the target by this factor,
/// expressed as the ratio `SPLIT_NUMERATOR / SPLIT_DENOMINATOR` (1.2).
const SPLIT_NUMERATOR: usize = 6;
const SPLIT_DENOMINATOR: usize = 5;

/// An ordered sample history stored in time-ordered chunks.
#[derive(Debug)]
pub struct Series {
    key: String,
    chunks: ChunkDirectory,
    last_chunk: ChunkKey,
    chunk_size_bytes: usize,
    retention_ms: u64,
    duplicate_policy: Option<DuplicatePolicy>,
    default_policy: DuplicatePolicy,
    encoding: ChunkEncoding,
    labels: Vec<(String, String)>,
    source_key: Option<String>,
    rules: Vec<CompactionRule>,
    last_timestamp: u64,
    last_value: f64,
    total_samples: usize,
}

impl Series {
    /// Creates an empty series.
    ///
    /// Options left unset in `options` are taken from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::InvalidKey`], [`SeriesError::InvalidLabel`] or
    /// [`SeriesError::InvalidChunkSize`] for invalid options, and
    /// [`ChunkError::AllocationFailed`] if the first chunk cannot be
    /// allocated.
    pub fn new(
        key: impl Into<String>,
        options: &SeriesOptions,
        config: &EngineConfig,
    ) -> Result<Self> {
        let key = key.into();
        validate_key(&key)?;
        validate_labels(&options.labels)?;

        let chunk_size_bytes = options.chunk_size_bytes.unwrap_or(config.chunk_size_bytes);
        validate_chunk_size(chunk_size_bytes)?;

        let encoding = options.encoding.unwrap_or(config.encoding);
        let bootstrap = encoding.new_chunk(chunk_size_bytes)?;

        Ok(Self {
            key,
            chunks: ChunkDirectory::new(bootstrap),
            last_chunk: ChunkKey::ZERO,
            chunk_size_bytes,
            retention_ms: options.retention_ms.unwrap_or(config.retention_ms),
            duplicate_policy: options.duplicate_policy,
            default_policy: config.duplicate_policy,
            encoding,
            labels: options.labels.clone(),
            source_key: None,
            rules: Vec::new(),
            last_timestamp: 0,
            last_value: 0.0,
            total_samples: 0,
        })
    }

    /// Appends a sample after the last one.
    ///
    /// When the last chunk is full, expired chunks are trimmed and a new
    /// chunk keyed at `timestamp` becomes the last chunk. Compaction rules are
    /// not driven; see [`Series::append`].
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::OutOfOrder`] if the series is non-empty and
    /// `timestamp` is not after the last timestamp, and
    /// [`ChunkError::AllocationFailed`] if a new chunk cannot be allocated.
    pub fn add_sample(&mut self, timestamp: u64, value: f64) -> Result<()> {
        if !self.is_empty() && timestamp <= self.last_timestamp {
            return Err(ChunkError::OutOfOrder {
                timestamp,
                last_timestamp: self.last_timestamp,
            }
            .into());
        }

        let sample = Sample::new(timestamp, value);
        let last_key = self.last_chunk;
        let chunk = self.chunk_mut(last_key)?;
        let was_empty = chunk.is_empty();

        match chunk.add_sample(sample)? {
            AddStatus::Appended => {
                if was_empty {
                    self.rekey(last_key, ChunkKey::from_timestamp(timestamp));
                }
            }
            AddStatus::Full => {
                self.trim();
                let mut chunk = self.encoding.new_chunk(self.chunk_size_bytes)?;
                chunk.add_sample(sample)?;
                let key = ChunkKey::from_timestamp(timestamp);
                self.chunks.insert(key, chunk);
                self.last_chunk = key;
                debug!(
                    series = %self.key,
                    chunk = timestamp,
                    chunks = self.chunks.len(),
                    "opened new chunk"
                );
            }
        }

        self.last_timestamp = timestamp;
        self.last_value = value;
        self.total_samples += 1;
        Ok(())
    }

    /// Appends a sample and folds it into every compaction rule.
    ///
    /// # Errors
    ///
    /// Same as [`Series::add_sample`]; rules are only driven on success.
    pub fn append(&mut self, timestamp: u64, value: f64) -> Result<Vec<DownstreamWrite>> {
        self.add_sample(timestamp, value)?;
        let sample = Sample::new(timestamp, value);
        Ok(self
            .rules
            .iter_mut()
            .filter_map(|rule| rule.on_append(sample))
            .collect())
    }

    /// Inserts or overwrites a sample at any timestamp.
    ///
    /// The duplicate policy is `policy_override`, else the series policy,
    /// else the engine default. After the write, every compaction rule
    /// re-derives the bucket touched by `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::DuplicateRejected`] if the timestamp is occupied
    /// under [`DuplicatePolicy::Block`], and [`ChunkError::AllocationFailed`]
    /// if a chunk cannot grow or split. The series is unchanged on error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kairos::{DuplicatePolicy, EngineConfig, Series, SeriesOptions};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut series = Series::new("temp", &SeriesOptions::default(), &EngineConfig::default())?;
    /// series.add_sample(100, 1.0)?;
    /// series.add_sample(300, 3.0)?;
    ///
    /// series.upsert_sample(200, 2.0, None)?;
    /// series.upsert_sample(300, 4.0, Some(DuplicatePolicy::Sum))?;
    /// assert!(series.upsert_sample(100, 1.0, None).is_err());
    ///
    /// let values: Vec<f64> = series.range(0, u64::MAX, false).map(|s| s.value).collect();
    /// assert_eq!(values, vec![1.0, 2.0, 7.0]);
    /// assert_eq!(series.last_value(), 7.0);
    /// # Ok(())
    /// # }
    /// ```
    pub fn upsert_sample(
        &mut self,
        timestamp: u64,
        value: f64,
        policy_override: Option<DuplicatePolicy>,
    ) -> Result<Vec<DownstreamWrite>> {
        let policy = self.effective_policy(policy_override);
        let mut target = self.locate(timestamp)?;

        let split_above = self.chunk_size_bytes * SPLIT_NUMERATOR;
        let chunk = self.chunk_mut(target)?;
        if chunk.size_bytes() * SPLIT_DENOMINATOR > split_above && chunk.num_samples() >= 2 {
            target = self.split_chunk(target, timestamp)?;
        }

        let chunk = self.chunk_mut(target)?;
        let old_first = chunk.first_timestamp();
        let outcome = chunk.upsert_sample(Sample::new(timestamp, value), policy)?;
        let new_first = chunk.first_timestamp();

        let was_empty = self.is_empty();
        self.total_samples += outcome.added();
        let stored = match outcome {
            UpsertOutcome::Inserted => value,
            UpsertOutcome::Overwritten { value } => value,
        };
        if was_empty || timestamp >= self.last_timestamp {
            self.last_timestamp = timestamp;
            self.last_value = stored;
        }

        if let Some(first) = new_first
            && new_first != old_first
        {
            self.rekey(target, ChunkKey::from_timestamp(first));
        }

        let last_timestamp = self.last_timestamp;
        Ok(self
            .rules
            .iter_mut()
            .filter_map(|rule| rule.on_upsert(&self.chunks, timestamp, last_timestamp))
            .collect())
    }

    /// Absorbs a finalized bucket produced by an upstream rule.
    ///
    /// Retention is not checked: a compacted bucket is always older data by
    /// construction. Returns the writes produced by this series' own rules.
    ///
    /// # Errors
    ///
    /// Same as [`Series::append`] and [`Series::upsert_sample`].
    pub fn apply_compacted(&mut self, write: &DownstreamWrite) -> Result<Vec<DownstreamWrite>> {
        let Sample { timestamp, value } = write.sample;
        let append = match write.mode {
            WriteMode::Append => self.is_empty() || timestamp > self.last_timestamp,
            WriteMode::Finalize => self.is_empty(),
        };
        if append {
            self.append(timestamp, value)
        } else {
            self.upsert_sample(timestamp, value, Some(DuplicatePolicy::Last))
        }
    }

    /// Removes chunks that lie entirely before the retention floor.
    ///
    /// Returns the number of samples removed.
    pub fn trim(&mut self) -> usize {
        if self.retention_ms == 0 || self.is_empty() {
            return 0;
        }
        let removed = self.chunks.trim(self.retention_floor());
        self.total_samples -= removed;
        removed
    }

    /// Iterates samples within `[min, max]`.
    pub fn range(&self, min: u64, max: u64, reverse: bool) -> SeriesIterator<'_> {
        SeriesIterator::new(&self.chunks, min, max, reverse)
    }

    /// Oldest timestamp retention still allows, or 0 without retention.
    pub fn retention_floor(&self) -> u64 {
        if self.retention_ms == 0 {
            0
        } else {
            self.last_timestamp.saturating_sub(self.retention_ms)
        }
    }

    /// Returns the first timestamp at or after the retention floor, and the
    /// number of stored samples before it.
    ///
    /// Samples below the floor can survive in a chunk that straddles it until
    /// the whole chunk expires.
    pub fn first_valid_timestamp(&self) -> (Option<u64>, usize) {
        let floor = self.retention_floor();
        let skipped = match floor.checked_sub(1) {
            Some(below) => self.range(0, below, false).count(),
            None => 0,
        };
        let first = self.range(floor, u64::MAX, false).next().map(|s| s.timestamp);
        (first, skipped)
    }

    /// The series key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn set_key(&mut self, key: String) {
        self.key = key;
    }

    /// Returns `true` if the series holds no sample.
    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    /// Number of samples stored.
    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    /// Timestamp of the newest sample; 0 for an empty series.
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    /// Value of the newest sample; 0 for an empty series.
    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    /// Timestamp of the oldest stored sample.
    pub fn first_timestamp(&self) -> Option<u64> {
        self.chunks
            .iter()
            .find_map(|(_, chunk)| chunk.first_timestamp())
    }

    /// Retention in milliseconds; 0 keeps samples forever.
    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    /// Chunk size target in bytes.
    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_bytes
    }

    /// The series-level duplicate policy, if one was set.
    pub fn duplicate_policy(&self) -> Option<DuplicatePolicy> {
        self.duplicate_policy
    }

    /// The policy applied for a write carrying `policy_override`.
    pub fn effective_policy(&self, policy_override: Option<DuplicatePolicy>) -> DuplicatePolicy {
        policy_override
            .or(self.duplicate_policy)
            .unwrap_or(self.default_policy)
    }

    /// Chunk encoding, fixed at creation.
    pub fn encoding(&self) -> ChunkEncoding {
        self.encoding
    }

    /// The series labels.
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// The chunk directory.
    pub fn chunks(&self) -> &ChunkDirectory {
        &self.chunks
    }

    /// Key of the series compacting into this one.
    pub fn source_key(&self) -> Option<&str> {
        self.source_key.as_deref()
    }

    pub(crate) fn set_source_key(&mut self, source_key: Option<String>) {
        self.source_key = source_key;
    }

    /// Outgoing compaction rules, in creation order.
    pub fn rules(&self) -> &[CompactionRule] {
        &self.rules
    }

    /// Returns the rule feeding `dest_key`.
    pub fn rule(&self, dest_key: &str) -> Option<&CompactionRule> {
        self.rules.iter().find(|rule| rule.dest_key() == dest_key)
    }

    pub(crate) fn rule_mut(&mut self, dest_key: &str) -> Option<&mut CompactionRule> {
        self.rules.iter_mut().find(|rule| rule.dest_key() == dest_key)
    }

    pub(crate) fn add_rule(&mut self, rule: CompactionRule) {
        self.rules.push(rule);
    }

    pub(crate) fn remove_rule(&mut self, dest_key: &str) -> Option<CompactionRule> {
        let idx = self.rules.iter().position(|rule| rule.dest_key() == dest_key)?;
        Some(self.rules.remove(idx))
    }

    /// Memory held by the series: struct, labels, rules and chunks.
    pub fn memory_usage(&self) -> usize {
        let labels: usize = self
            .labels
            .iter()
            .map(|(k, v)| std::mem::size_of::<(String, String)>() + k.capacity() + v.capacity())
            .sum();
        let rules: usize = self.rules.iter().map(CompactionRule::memory_usage).sum();

        std::mem::size_of::<Self>()
            + self.key.capacity()
            + self.source_key.as_ref().map_or(0, String::capacity)
            + labels
            + rules
            + self.chunks.memory_usage()
    }

    /// Returns a snapshot of the series metadata.
    pub fn info(&self) -> SeriesInfo {
        SeriesInfo {
            key: self.key.clone(),
            total_samples: self.total_samples,
            memory_usage: self.memory_usage(),
            first_timestamp: self.first_timestamp(),
            last_timestamp: (!self.is_empty()).then_some(self.last_timestamp),
            retention_ms: self.retention_ms,
            chunk_count: self.chunks.len(),
            chunk_size_bytes: self.chunk_size_bytes,
            encoding: self.encoding,
            duplicate_policy: self.duplicate_policy,
            labels: self.labels.clone(),
            source_key: self.source_key.clone(),
            rules: self
                .rules
                .iter()
                .map(|rule| RuleInfo {
                    dest_key: rule.dest_key().to_string(),
                    aggregation: rule.kind(),
                    bucket_ms: rule.bucket_width(),
                })
                .collect(),
        }
    }

    /// Picks the chunk an upsert at `timestamp` belongs to.
    fn locate(&self, timestamp: u64) -> Result<ChunkKey> {
        let last_first = self
            .chunks
            .get(self.last_chunk)
            .ok_or(ChunkError::MissingChunk {
                key: self.last_chunk.timestamp(),
            })?
            .first_timestamp();

        if self.chunks.len() > 1
            && last_first.is_some_and(|first| timestamp < first)
            && let Some(key) = self
                .chunks
                .seek_le(timestamp)
                .or_else(|| self.chunks.first_key())
        {
            return Ok(key);
        }
        Ok(self.last_chunk)
    }

    /// Splits the chunk under `key` and returns the half `timestamp` belongs to.
    fn split_chunk(&mut self, key: ChunkKey, timestamp: u64) -> Result<ChunkKey> {
        let upper = self.chunk_mut(key)?.split()?;
        let Some(upper_first) = upper.first_timestamp() else {
            return Ok(key);
        };

        let upper_key = ChunkKey::from_timestamp(upper_first);
        self.chunks.insert(upper_key, upper);
        if self.last_chunk == key {
            self.last_chunk = upper_key;
        }
        debug!(
            series = %self.key,
            chunk = key.timestamp(),
            new_chunk = upper_first,
            "split oversized chunk"
        );

        Ok(if timestamp >= upper_first { upper_key } else { key })
    }

    /// Moves the chunk under `old` to `new`, following the last-chunk marker.
    fn rekey(&mut self, old: ChunkKey, new: ChunkKey) {
        if old == new {
            return;
        }
        let chunk = self
            .chunks
            .remove(old)
            .or_else(|| self.chunks.remove(ChunkKey::ZERO));
        if let Some(chunk) = chunk {
            self.chunks.insert(new, chunk);
        }
        if self.last_chunk == old {
            self.last_chunk = new;
        }
    }

    fn chunk_mut(&mut self, key: ChunkKey) -> Result<&mut (dyn Chunk + 'static)> {
        self.chunks
            .get_mut(key)
            .ok_or_else(|| ChunkError::MissingChunk { key: key.timestamp() }.into())
    }
}

/// Snapshot of a series' metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesInfo {
    /// Series key.
    pub key: String,
    /// Number of samples stored.
    pub total_samples: usize,
    /// Memory held by the series in bytes.
    pub memory_usage: usize,
    /// Oldest stored timestamp.
    pub first_timestamp: Option<u64>,
    /// Newest stored timestamp.
    pub last_timestamp: Option<u64>,
    /// Retention in milliseconds.
    pub retention_ms: u64,
    /// Number of chunks.
    pub chunk_count: usize,
    /// Chunk size target in bytes.
    pub chunk_size_bytes: usize,
    /// Chunk encoding.
    pub encoding: ChunkEncoding,
    /// Series-level duplicate policy.
    pub duplicate_policy: Option<DuplicatePolicy>,
    /// Labels.
    pub labels: Vec<(String, String)>,
    /// Series compacting into this one.
    pub source_key: Option<String>,
    /// Outgoing compaction rules.
    pub rules: Vec<RuleInfo>,
}

/// Summary of one outgoing compaction rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleInfo {
    /// Destination key.
    pub dest_key: String,
    /// Aggregation kind.
    pub aggregation: AggregationKind,
    /// Bucket width in milliseconds.
    pub bucket_ms: u64,
}

/// Checks that a series key is usable.
pub(crate) fn validate_key(key: &str) -> std::result::Result<(), SeriesError> {
    if key.is_empty() {
        return Err(SeriesError::InvalidKey {
            reason: "key cannot be empty".to_string(),
        });
    }
    if key.chars().any(char::is_whitespace) {
        return Err(SeriesError::InvalidKey {
            reason: format!("key '{key}' contains whitespace"),
        });
    }
    Ok(())
}

/// Checks that labels are non-empty and unique by name.
pub(crate) fn validate_labels(labels: &[(String, String)]) -> std::result::Result<(), SeriesError> {
    for (idx, (key, value)) in labels.iter().enumerate() {
        let invalid = |reason: &str| SeriesError::InvalidLabel {
            key: key.clone(),
            value: value.clone(),
            reason: reason.to_string(),
        };
        if key.is_empty() {
            return Err(invalid("label name cannot be empty"));
        }
        if value.is_empty() {
            return Err(invalid("label value cannot be empty"));
        }
        if labels[..idx].iter().any(|(k, _)| k == key) {
            return Err(invalid("duplicate label name"));
        }
    }
    Ok(())
}
