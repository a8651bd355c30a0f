//! Store module for the kairos time-series storage engine.
//!
//! This module provides the top-level API that ties all components together.
//! The Store owns the engine configuration, the keyspace holding every
//! series, the label index and the pending-deletion slot.
//!
//! # Design
//!
//! The Store acts as the central coordinator:
//! - Creates series and instantiates the configured global compaction rules
//! - Routes writes to the append or upsert path of a series
//! - Applies the [`DownstreamWrite`]s produced by compaction rules, following
//!   destinations that have rules of their own
//! - Keeps rule links consistent across delete and rename
//!
//! Series never reference each other. A compaction rule names its destination
//! by key and a destination names its source by key; the Store resolves both
//! through the [`Keyspace`] for the duration of one call.
//!
//! # Example Usage
//!
//! ```rust
//! use kairos::aggregation::AggregationKind;
//! use kairos::{SeriesOptions, Store};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::new();
//! store.create("temp", SeriesOptions::new().with_label("room", "lab"))?;
//! store.create("temp_avg", SeriesOptions::new())?;
//! store.add_rule("temp", "temp_avg", AggregationKind::Avg, 1_000)?;
//!
//! store.add("temp", 100, 10.0)?;
//! store.add("temp", 500, 20.0)?;
//! store.add("temp", 1_100, 5.0)?;
//!
//! let averages = store.query("temp_avg", 0, u64::MAX, false)?.collect_all();
//! assert_eq!(averages.len(), 1);
//! assert_eq!((averages[0].timestamp, averages[0].value), (0, 15.0));
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::aggregation::AggregationKind;
use crate::compaction::{CompactionRule, DownstreamWrite};
use crate::config::{EngineConfig, RuleTemplate, SeriesOptions};
use crate::error::{QueryError, Result, RuleError, SeriesError, WriteError};
use crate::index::{LabelIndex, LabelMatcher, MemoryLabelIndex};
use crate::keyspace::{Keyspace, MemoryKeyspace};
use crate::query::QueryResult;
use crate::sample::DuplicatePolicy;
use crate::series::{Series, SeriesInfo, validate_key};

/// Label added to destinations of global rules, naming the aggregation.
pub const AGGREGATION_LABEL: &str = "aggregation";

/// Label added to destinations of global rules, naming the bucket width.
pub const TIME_BUCKET_LABEL: &str = "time_bucket";

/// Top-level handle for kairos time-series storage.
///
/// # Thread Safety
///
/// The Store is designed for single-threaded access. `&mut Store` is the
/// exclusive handle every write requires; external synchronization must be
/// provided if used across multiple threads.
#[derive(Debug)]
pub struct Store<K: Keyspace = MemoryKeyspace, I: LabelIndex = MemoryLabelIndex> {
    /// Engine-wide defaults and global compaction rules.
    config: EngineConfig,
    /// Series storage.
    keyspace: K,
    /// Label index over every live series.
    index: I,
    /// The most recently deleted series, kept until the next deletion.
    last_deleted: Option<Series>,
}

impl Store {
    /// Creates an in-memory store with the default configuration.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            keyspace: MemoryKeyspace::new(),
            index: MemoryLabelIndex::new(),
            last_deleted: None,
        }
    }

    /// Creates an in-memory store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`](crate::error::ConfigError::Invalid)
    /// if the configuration does not validate.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        Self::with_parts(config, MemoryKeyspace::new(), MemoryLabelIndex::new())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Keyspace, I: LabelIndex> Store<K, I> {
    /// Creates a store over a caller-provided keyspace and label index.
    ///
    /// # Arguments
    ///
    /// * `config` - Engine defaults and global compaction rules
    /// * `keyspace` - Host key store holding the series
    /// * `index` - Label index kept in step with the keyspace
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`](crate::error::ConfigError::Invalid)
    /// if the configuration does not validate.
    pub fn with_parts(config: EngineConfig, keyspace: K, index: I) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            keyspace,
            index,
            last_deleted: None,
        })
    }

    /// Creates a new series.
    ///
    /// Every rule template of the engine configuration then creates a
    /// destination series named `"{key}_{AGG}_{bucket}"` and links it to the
    /// new series. A template whose destination key is already taken is
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::SeriesAlreadyExists`] if the key is taken, and
    /// any validation error of [`Series::new`].
    pub fn create(&mut self, key: &str, options: SeriesOptions) -> Result<()> {
        if self.keyspace.contains(key) {
            return Err(SeriesError::SeriesAlreadyExists {
                key: key.to_string(),
            }
            .into());
        }

        self.insert_series(Series::new(key, &options, &self.config)?)?;
        debug!(series = key, "created series");

        let templates = self.config.compaction_rules.clone();
        for template in &templates {
            self.create_from_template(key, &options.labels, template);
        }
        Ok(())
    }

    /// Adds a sample with the series' own duplicate policy.
    ///
    /// # Errors
    ///
    /// Same as [`Store::write`].
    pub fn add(&mut self, key: &str, timestamp: u64, value: f64) -> Result<()> {
        self.write(key, timestamp, value, None)
    }

    /// Writes a sample, routing it to the append or the upsert path.
    ///
    /// A timestamp after the newest sample (or any timestamp on an empty
    /// series) is appended and rolls compaction windows forward. Anything
    /// else is upserted with `policy_override`, else the series policy.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::SeriesNotFound`] for an unknown key,
    /// [`WriteError::TimestampTooOld`] if the timestamp lies before the
    /// retention window, and the chunk errors of the chosen path.
    pub fn write(
        &mut self,
        key: &str,
        timestamp: u64,
        value: f64,
        policy_override: Option<DuplicatePolicy>,
    ) -> Result<()> {
        let series = self.series_mut(key)?;

        if series.retention_ms() > 0 {
            let min_timestamp = series.last_timestamp().saturating_sub(series.retention_ms());
            if timestamp < min_timestamp {
                return Err(WriteError::TimestampTooOld {
                    timestamp,
                    min_timestamp,
                }
                .into());
            }
        }

        let writes = if !series.is_empty() && timestamp <= series.last_timestamp() {
            series.upsert_sample(timestamp, value, policy_override)?
        } else {
            series.append(timestamp, value)?
        };
        self.apply_downstream(key, writes);
        Ok(())
    }

    /// Upserts a sample at any timestamp.
    ///
    /// Retention is not checked. Compaction rules re-derive the bucket
    /// touched by the write.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::SeriesNotFound`] for an unknown key and the
    /// errors of [`Series::upsert_sample`].
    pub fn upsert(
        &mut self,
        key: &str,
        timestamp: u64,
        value: f64,
        policy_override: Option<DuplicatePolicy>,
    ) -> Result<()> {
        let writes = self
            .series_mut(key)?
            .upsert_sample(timestamp, value, policy_override)?;
        self.apply_downstream(key, writes);
        Ok(())
    }

    /// Queries samples of a series within `[start, end]`.
    ///
    /// The start is raised to the series' retention floor, hiding samples
    /// that survive in a partially expired chunk.
    ///
    /// # Arguments
    ///
    /// * `key` - Series to read
    /// * `start` - Start of the range, inclusive
    /// * `end` - End of the range, inclusive
    /// * `reverse` - Yield newest samples first
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`] if `start > end` and
    /// [`SeriesError::SeriesNotFound`] for an unknown key.
    pub fn query(&self, key: &str, start: u64, end: u64, reverse: bool) -> Result<QueryResult<'_>> {
        if start > end {
            return Err(QueryError::InvalidTimeRange { start, end }.into());
        }
        let series = self.series(key)?;

        let effective_start = start.max(series.retention_floor());
        let available = (
            series.first_timestamp(),
            (!series.is_empty()).then_some(series.last_timestamp()),
        );

        Ok(QueryResult::new(
            series.range(effective_start, end, reverse),
            available,
            (start, end),
            (effective_start, end),
        ))
    }

    /// Declares a compaction rule from `source` into `dest`.
    ///
    /// The rule starts empty: samples already in `source` are not compacted.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTimeBucket`] for a zero width,
    /// [`RuleError::SameSourceAndDestination`] if the keys are equal,
    /// [`SeriesError::SeriesNotFound`] for an unknown source,
    /// [`RuleError::DestinationNotFound`] for an unknown destination and
    /// [`RuleError::RuleAlreadyHasSource`] if `dest` is already compacted
    /// from a series.
    pub fn add_rule(
        &mut self,
        source: &str,
        dest: &str,
        kind: AggregationKind,
        bucket_ms: u64,
    ) -> Result<()> {
        let rule = CompactionRule::new(dest, kind, bucket_ms)?;
        if source == dest {
            return Err(RuleError::SameSourceAndDestination {
                key: source.to_string(),
            }
            .into());
        }
        self.series(source)?;

        let dest_series = self
            .keyspace
            .resolve_mut(dest)
            .ok_or_else(|| RuleError::DestinationNotFound {
                key: dest.to_string(),
            })?;
        if let Some(existing) = dest_series.source_key() {
            return Err(RuleError::RuleAlreadyHasSource {
                key: dest.to_string(),
                source_key: existing.to_string(),
            }
            .into());
        }
        dest_series.set_source_key(Some(source.to_string()));

        self.series_mut(source)?.add_rule(rule);
        debug!(source, dest, aggregation = %kind, bucket_ms, "added compaction rule");
        Ok(())
    }

    /// Removes the compaction rule from `source` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::SeriesNotFound`] for an unknown source and
    /// [`RuleError::RuleNotFound`] if no such rule exists.
    pub fn delete_rule(&mut self, source: &str, dest: &str) -> Result<()> {
        if self.series_mut(source)?.remove_rule(dest).is_none() {
            return Err(RuleError::RuleNotFound {
                source_key: source.to_string(),
                destination: dest.to_string(),
            }
            .into());
        }
        if let Some(dest_series) = self.keyspace.resolve_mut(dest) {
            dest_series.set_source_key(None);
        }
        debug!(source, dest, "deleted compaction rule");
        Ok(())
    }

    /// Deletes a series.
    ///
    /// The series moves to the pending-deletion slot, evicting the previous
    /// occupant. Its destinations lose their source link and its source
    /// loses the rule into it. Returns `false` if no series exists under
    /// `key`.
    pub fn delete(&mut self, key: &str) -> bool {
        let Some(series) = self.keyspace.remove(key) else {
            return false;
        };
        self.index.unindex(key, series.labels());

        if let Some(evicted) = self.last_deleted.replace(series) {
            debug!(series = evicted.key(), "evicted pending deletion");
        }
        let Some(staged) = self.last_deleted.as_ref() else {
            return true;
        };

        let source = staged.source_key().map(str::to_string);
        let destinations: Vec<String> = staged
            .rules()
            .iter()
            .map(|rule| rule.dest_key().to_string())
            .collect();
        self.unlink(key, source.as_deref(), &destinations);

        debug!(series = key, "deleted series");
        true
    }

    /// The most recently deleted series, if not yet purged.
    pub fn last_deleted(&self) -> Option<&Series> {
        self.last_deleted.as_ref()
    }

    /// Frees the pending-deletion slot.
    ///
    /// Returns `true` if a series was freed.
    pub fn purge_deleted(&mut self) -> bool {
        self.last_deleted.take().is_some()
    }

    /// Renames a series, keeping its rule links.
    ///
    /// The source's rule is retargeted to `new_key` and every destination
    /// names `new_key` as its source. Partners that no longer exist are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::SeriesNotFound`] if `old_key` is unknown,
    /// [`SeriesError::SeriesAlreadyExists`] if `new_key` is taken and
    /// [`SeriesError::InvalidKey`] if `new_key` is not a valid key. If the
    /// keyspace rejects the renamed series, its error is returned, the
    /// series is dropped and its rule links are removed.
    pub fn rename(&mut self, old_key: &str, new_key: &str) -> Result<()> {
        self.series(old_key)?;
        if self.keyspace.contains(new_key) {
            return Err(SeriesError::SeriesAlreadyExists {
                key: new_key.to_string(),
            }
            .into());
        }
        validate_key(new_key)?;

        let mut series = self
            .keyspace
            .remove(old_key)
            .ok_or_else(|| SeriesError::SeriesNotFound {
                key: old_key.to_string(),
            })?;
        self.index.unindex(old_key, series.labels());
        series.set_key(new_key.to_string());

        let source = series.source_key().map(str::to_string);
        let destinations: Vec<String> = series
            .rules()
            .iter()
            .map(|rule| rule.dest_key().to_string())
            .collect();

        // A rejected insert drops the series; its partners must not keep
        // naming either key.
        if let Err(err) = self.insert_series(series) {
            warn!(from = old_key, to = new_key, error = %err, "rename failed, series dropped");
            self.unlink(old_key, source.as_deref(), &destinations);
            return Err(err);
        }

        if let Some(source) = &source {
            match self
                .keyspace
                .resolve_mut(source)
                .and_then(|s| s.rule_mut(old_key))
            {
                Some(rule) => rule.set_dest_key(new_key),
                None => warn!(
                    series = new_key,
                    source = source.as_str(),
                    "source rule missing while renaming"
                ),
            }
        }
        for dest in &destinations {
            match self.keyspace.resolve_mut(dest) {
                Some(dest_series) => dest_series.set_source_key(Some(new_key.to_string())),
                None => warn!(
                    series = new_key,
                    dest = dest.as_str(),
                    "destination missing while renaming"
                ),
            }
        }

        debug!(from = old_key, to = new_key, "renamed series");
        Ok(())
    }

    /// Memory held by a series in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::SeriesNotFound`] for an unknown key.
    pub fn memory_usage(&self, key: &str) -> Result<usize> {
        Ok(self.series(key)?.memory_usage())
    }

    /// Metadata snapshot of a series.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::SeriesNotFound`] for an unknown key.
    pub fn info(&self, key: &str) -> Result<SeriesInfo> {
        Ok(self.series(key)?.info())
    }

    /// Keys of the series whose labels satisfy `matcher`, sorted.
    pub fn query_index(&self, matcher: &LabelMatcher) -> Vec<String> {
        self.index.query(matcher)
    }

    /// Returns the series stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Series> {
        self.keyspace.resolve(key)
    }

    /// Every live series key.
    pub fn keys(&self) -> Vec<String> {
        self.keyspace.keys()
    }

    /// Number of live series.
    pub fn series_count(&self) -> usize {
        self.keyspace.len()
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates and links the destination of one global rule template.
    fn create_from_template(
        &mut self,
        source: &str,
        labels: &[(String, String)],
        template: &RuleTemplate,
    ) {
        let dest = template.dest_key(source);
        if self.keyspace.contains(&dest) {
            warn!(
                source,
                dest = %dest,
                "compaction destination already exists, skipping global rule"
            );
            return;
        }

        let options = SeriesOptions::new()
            .with_retention(template.retention_ms)
            .with_labels(labels.iter().cloned())
            .with_label(AGGREGATION_LABEL, template.aggregation.as_str())
            .with_label(TIME_BUCKET_LABEL, template.bucket_ms.to_string());

        let created = Series::new(dest.as_str(), &options, &self.config)
            .and_then(|series| self.insert_series(series));
        if let Err(err) = created {
            warn!(source, dest = %dest, error = %err, "failed to create global rule destination");
            return;
        }

        if let Err(err) = self.add_rule(source, &dest, template.aggregation, template.bucket_ms) {
            warn!(source, dest = %dest, error = %err, "failed to link global rule");
        }
    }

    /// Applies compaction output, following destinations with rules of their own.
    ///
    /// Failures skip the affected write only. A destination that no longer
    /// exists has its dangling rule removed from the source.
    fn apply_downstream(&mut self, source: &str, writes: Vec<DownstreamWrite>) {
        let mut pending: VecDeque<(String, DownstreamWrite)> = writes
            .into_iter()
            .map(|write| (source.to_string(), write))
            .collect();

        while let Some((source, write)) = pending.pop_front() {
            let Some(dest) = self.keyspace.resolve_mut(&write.dest_key) else {
                warn!(
                    source = %source,
                    dest = %write.dest_key,
                    "compaction destination missing, removing rule"
                );
                if let Some(source_series) = self.keyspace.resolve_mut(&source) {
                    source_series.remove_rule(&write.dest_key);
                }
                continue;
            };

            match dest.apply_compacted(&write) {
                Ok(more) => pending.extend(
                    more.into_iter()
                        .map(|next| (write.dest_key.clone(), next)),
                ),
                Err(err) => warn!(
                    source = %source,
                    dest = %write.dest_key,
                    timestamp = write.sample.timestamp,
                    error = %err,
                    "compaction write rejected"
                ),
            }
        }
    }

    /// Indexes and stores a series.
    /// Drops the rule links between `key` and its partners.
    fn unlink(&mut self, key: &str, source: Option<&str>, destinations: &[String]) {
        for dest in destinations {
            if let Some(dest_series) = self.keyspace.resolve_mut(dest)
                && dest_series.source_key() == Some(key)
            {
                dest_series.set_source_key(None);
            }
        }
        if let Some(source) = source
            && let Some(source_series) = self.keyspace.resolve_mut(source)
        {
            source_series.remove_rule(key);
        }
    }

    fn insert_series(&mut self, series: Series) -> Result<()> {
        let key = series.key().to_string();
        let labels = series.labels().to_vec();
        self.keyspace.insert(series)?;
        self.index.index(&key, &labels);
        Ok(())
    }

    fn series(&self, key: &str) -> Result<&Series> {
        self.keyspace.resolve(key).ok_or_else(|| {
            SeriesError::SeriesNotFound {
                key: key.to_string(),
            }
            .into()
        })
    }

    fn series_mut(&mut self, key: &str) -> Result<&mut Series> {
        self.keyspace.resolve_mut(key).ok_or_else(|| {
            SeriesError::SeriesNotFound {
                key: key.to_string(),
            }
            .into()
        })
    }
}
