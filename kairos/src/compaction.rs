//! Compaction rules: incremental downsampling into destination series.
//!
//! A [`CompactionRule`] lives on its source series and folds every written
//! sample into a running [`Aggregator`] for the current bucket. Buckets are
//! aligned to multiples of the rule's width:
//!
//! ```text
//! width = 1000
//!
//! ts:      100   500  | 1100        | 2050
//! bucket:  [0 ...... 999] [1000 .. 1999] [2000 ...
//! ```
//!
//! Rules never touch the destination series themselves. They return
//! [`DownstreamWrite`]s which the store applies through the keyspace, so a
//! source never holds a reference to another series.

use tracing::{debug, warn};

use crate::aggregation::{AggregationKind, Aggregator};
use crate::directory::ChunkDirectory;
use crate::error::RuleError;
use crate::iter::SeriesIterator;
use crate::sample::Sample;

/// Returns the start of the bucket containing `timestamp`.
///
/// `width` must be greater than zero; [`CompactionRule::new`] enforces it.
pub(crate) fn window_start(timestamp: u64, width: u64) -> u64 {
    timestamp - timestamp % width
}

/// Aggregates the samples of `directory` within `[start, end]`.
///
/// Returns `None` if the range holds no sample.
pub fn aggregate_range(
    directory: &ChunkDirectory,
    kind: AggregationKind,
    start: u64,
    end: u64,
) -> Option<f64> {
    let mut aggregator = Aggregator::new(kind);
    for sample in SeriesIterator::new(directory, start, end, false) {
        aggregator.append(sample.value);
    }
    aggregator.finalize()
}

/// How a destination series should absorb a [`DownstreamWrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// A bucket closed because the source moved past it.
    Append,
    /// A closed bucket was recomputed after a late write.
    Finalize,
}

/// A finalized bucket value to be written into a destination series.
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamWrite {
    /// Key of the destination series.
    pub dest_key: String,
    /// Bucket start and aggregated value.
    pub sample: Sample,
    /// Write routing for the destination.
    pub mode: WriteMode,
}

/// A compaction rule attached to a source series.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionRule {
    dest_key: String,
    aggregator: Aggregator,
    bucket_width: u64,
    current_window_start: Option<u64>,
}

impl CompactionRule {
    /// Creates a rule feeding `dest_key` with `kind` over buckets of
    /// `bucket_width` milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTimeBucket`] if `bucket_width` is zero.
    pub fn new(
        dest_key: impl Into<String>,
        kind: AggregationKind,
        bucket_width: u64,
    ) -> Result<Self, RuleError> {
        if bucket_width == 0 {
            return Err(RuleError::InvalidTimeBucket);
        }
        Ok(Self {
            dest_key: dest_key.into(),
            aggregator: Aggregator::new(kind),
            bucket_width,
            current_window_start: None,
        })
    }

    /// Key of the destination series.
    pub fn dest_key(&self) -> &str {
        &self.dest_key
    }

    /// Points the rule at a renamed destination.
    pub fn set_dest_key(&mut self, dest_key: impl Into<String>) {
        self.dest_key = dest_key.into();
    }

    /// Aggregation applied to each bucket.
    pub fn kind(&self) -> AggregationKind {
        self.aggregator.kind()
    }

    /// Bucket width in milliseconds.
    pub fn bucket_width(&self) -> u64 {
        self.bucket_width
    }

    /// Start of the open bucket, unset until the first sample reaches the rule.
    pub fn current_window_start(&self) -> Option<u64> {
        self.current_window_start
    }

    /// The running context of the open bucket.
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Memory held by the rule.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.dest_key.capacity()
    }

    /// Folds a newly appended sample into the open bucket.
    ///
    /// When the sample belongs to a later bucket, the open bucket is
    /// finalized and returned as an [`WriteMode::Append`] write at its start,
    /// then a new bucket is opened with the sample.
    pub fn on_append(&mut self, sample: Sample) -> Option<DownstreamWrite> {
        let bucket = window_start(sample.timestamp, self.bucket_width);

        let Some(open) = self.current_window_start else {
            self.current_window_start = Some(bucket);
            self.aggregator.append(sample.value);
            return None;
        };

        let mut emitted = None;
        if bucket > open {
            emitted = self.aggregator.finalize().map(|value| DownstreamWrite {
                dest_key: self.dest_key.clone(),
                sample: Sample::new(open, value),
                mode: WriteMode::Append,
            });
            debug!(
                dest = %self.dest_key,
                window = open,
                next_window = bucket,
                "compaction window rolled over"
            );
            self.aggregator.reset();
            self.current_window_start = Some(bucket);
        }
        self.aggregator.append(sample.value);
        emitted
    }

    /// Re-derives the bucket touched by a write at `timestamp`.
    ///
    /// `last_timestamp` is the source's newest timestamp after the write.
    /// A write into the open bucket rebuilds the running context from the
    /// source's samples. When the write moved the tip into a later bucket,
    /// the previously open bucket is finalized first and returned as a
    /// [`WriteMode::Append`] write, the same as an append rollover.
    ///
    /// A write into a closed bucket recomputes that bucket and returns it as
    /// a [`WriteMode::Finalize`] write; the open context is left untouched.
    pub fn on_upsert(
        &mut self,
        directory: &ChunkDirectory,
        timestamp: u64,
        last_timestamp: u64,
    ) -> Option<DownstreamWrite> {
        let width = self.bucket_width;
        let open = window_start(last_timestamp, width);

        if timestamp >= open {
            let mut emitted = None;
            if let Some(previous) = self.current_window_start
                && previous < open
            {
                emitted = self.aggregator.finalize().map(|value| DownstreamWrite {
                    dest_key: self.dest_key.clone(),
                    sample: Sample::new(previous, value),
                    mode: WriteMode::Append,
                });
                debug!(
                    dest = %self.dest_key,
                    window = previous,
                    next_window = open,
                    "compaction window rolled over by upsert"
                );
            }

            let mut rebuilt = Aggregator::new(self.kind());
            for sample in SeriesIterator::new(directory, open, u64::MAX, false) {
                rebuilt.append(sample.value);
            }
            self.aggregator = rebuilt;
            self.current_window_start = Some(open);
            return emitted;
        }

        let bucket = window_start(timestamp, width);
        let end = bucket.saturating_add(width - 1);
        let Some(value) = aggregate_range(directory, self.kind(), bucket, end) else {
            warn!(
                dest = %self.dest_key,
                bucket,
                "closed bucket is empty, skipping compaction"
            );
            return None;
        };

        Some(DownstreamWrite {
            dest_key: self.dest_key.clone(),
            sample: Sample::new(bucket, value),
            mode: WriteMode::Finalize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, UncompressedChunk};
    use crate::directory::ChunkKey;

    fn directory(samples: &[(u64, f64)]) -> ChunkDirectory {
        let mut chunk = UncompressedChunk::new(4096).unwrap();
        for &s in samples {
            chunk.add_sample(Sample::from(s)).unwrap();
        }
        let mut dir = ChunkDirectory::new(Box::new(UncompressedChunk::new(16).unwrap()));
        dir.remove(ChunkKey::ZERO);
        dir.insert(ChunkKey::from_timestamp(samples[0].0), Box::new(chunk));
        dir
    }

    #[test]
    fn test_window_start() {
        assert_eq!(window_start(0, 1000), 0);
        assert_eq!(window_start(1000, 1000), 1000);
        assert_eq!(window_start(1999, 1000), 1000);
        assert_eq!(window_start(7, 1), 7);
    }

    #[test]
    fn test_append_rollover() {
        let mut rule = CompactionRule::new("cpu_avg", AggregationKind::Avg, 1000).unwrap();

        assert_eq!(rule.on_append(Sample::new(100, 10.0)), None);
        assert_eq!(rule.current_window_start(), Some(0));
        assert_eq!(rule.on_append(Sample::new(500, 20.0)), None);

        let write = rule.on_append(Sample::new(1100, 5.0)).unwrap();
        assert_eq!(write.dest_key, "cpu_avg");
        assert_eq!(write.sample, Sample::new(0, 15.0));
        assert_eq!(write.mode, WriteMode::Append);

        assert_eq!(rule.current_window_start(), Some(1000));
        assert_eq!(rule.aggregator().finalize(), Some(5.0));
    }

    #[test]
    fn test_append_skips_empty_windows() {
        let mut rule = CompactionRule::new("d", AggregationKind::Sum, 10).unwrap();
        rule.on_append(Sample::new(5, 1.0));

        let write = rule.on_append(Sample::new(95, 2.0)).unwrap();
        assert_eq!(write.sample, Sample::new(0, 1.0));
        assert_eq!(rule.current_window_start(), Some(90));
    }

    #[test]
    fn test_upsert_into_open_bucket_rebuilds() {
        let dir = directory(&[(100, 10.0), (1100, 5.0), (1200, 7.0)]);
        let mut rule = CompactionRule::new("d", AggregationKind::Sum, 1000).unwrap();
        rule.on_append(Sample::new(100, 10.0));
        rule.on_append(Sample::new(1100, 1.0));

        assert_eq!(rule.on_upsert(&dir, 1200, 1200), None);
        assert_eq!(rule.current_window_start(), Some(1000));
        assert_eq!(rule.aggregator().finalize(), Some(12.0));
    }

    #[test]
    fn test_upsert_into_closed_bucket_finalizes() {
        let dir = directory(&[(100, 10.0), (150, 30.0), (500, 20.0), (1100, 5.0)]);
        let mut rule = CompactionRule::new("d", AggregationKind::Max, 1000).unwrap();
        rule.on_append(Sample::new(1100, 5.0));

        let write = rule.on_upsert(&dir, 150, 1100).unwrap();
        assert_eq!(write.sample, Sample::new(0, 30.0));
        assert_eq!(write.mode, WriteMode::Finalize);

        // The open bucket is untouched.
        assert_eq!(rule.aggregator().finalize(), Some(5.0));
        assert_eq!(rule.current_window_start(), Some(1000));
    }

    #[test]
    fn test_closed_bucket_upper_bound_is_inclusive() {
        let dir = directory(&[(0, 1.0), (999, 2.0), (1000, 100.0), (2000, 0.0)]);
        assert_eq!(aggregate_range(&dir, AggregationKind::Sum, 0, 999), Some(3.0));

        let mut rule = CompactionRule::new("d", AggregationKind::Sum, 1000).unwrap();
        let write = rule.on_upsert(&dir, 999, 2000).unwrap();
        assert_eq!(write.sample, Sample::new(0, 3.0));
    }

    #[test]
    fn test_zero_bucket_width_is_rejected() {
        let err = CompactionRule::new("d", AggregationKind::Avg, 0).unwrap_err();
        assert_eq!(err, RuleError::InvalidTimeBucket);
    }

    #[test]
    fn test_upsert_past_tip_rolls_over_open_bucket() {
        let mut rule = CompactionRule::new("d", AggregationKind::Avg, 1000).unwrap();
        let mut dir = directory(&[(100, 10.0), (500, 20.0)]);
        assert_eq!(rule.on_upsert(&dir, 100, 100), None);
        assert_eq!(rule.on_upsert(&dir, 500, 500), None);
        assert_eq!(rule.current_window_start(), Some(0));

        dir = directory(&[(100, 10.0), (500, 20.0), (1100, 5.0)]);
        let write = rule.on_upsert(&dir, 1100, 1100).unwrap();
        assert_eq!(write.sample, Sample::new(0, 15.0));
        assert_eq!(write.mode, WriteMode::Append);
        assert_eq!(rule.current_window_start(), Some(1000));
        assert_eq!(rule.aggregator().finalize(), Some(5.0));

        // A write inside the open bucket emits nothing.
        dir = directory(&[(100, 10.0), (500, 20.0), (1100, 5.0), (1200, 7.0)]);
        assert_eq!(rule.on_upsert(&dir, 1200, 1200), None);
        assert_eq!(rule.aggregator().finalize(), Some(6.0));
    }
}
