//! Chunk storage for kairos series.
//!
//! A chunk holds the samples of one contiguous time sub-range of a series.
//! Every encoding implements the [`Chunk`] capability trait, so the series
//! layer never needs to know how samples are laid out in memory.
//!
//! # Encodings
//!
//! - [`UncompressedChunk`] - plain array of samples, 16 bytes per sample
//! - [`CompressedChunk`] - Gorilla delta-of-delta / XOR bit stream
//!
//! The encoding is chosen once when a series is created and never changes for
//! the lifetime of that series.
//!
//! # Invariants
//!
//! Within one chunk, samples are kept in strictly increasing timestamp order
//! and no timestamp appears twice. Operations that fail leave the chunk
//! unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, ConfigError};
use crate::sample::{DuplicatePolicy, Sample};

mod compressed;
mod gorilla;
mod uncompressed;

pub use compressed::CompressedChunk;
pub use uncompressed::UncompressedChunk;

/// Result of appending a sample to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStatus {
    /// The sample was stored at the end of the chunk.
    Appended,
    /// The chunk has no room left for appends; nothing was stored.
    Full,
}

/// Result of a successful upsert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpsertOutcome {
    /// The timestamp was free and a new sample was inserted.
    Inserted,
    /// The timestamp was occupied; the stored value is now `value`.
    Overwritten {
        /// Value stored after applying the duplicate policy.
        value: f64,
    },
}

impl UpsertOutcome {
    /// Number of samples the upsert added to the chunk (0 or 1).
    pub fn added(&self) -> usize {
        match self {
            Self::Inserted => 1,
            Self::Overwritten { .. } => 0,
        }
    }
}

/// Storage encoding for the chunks of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkEncoding {
    /// Plain array of samples.
    Uncompressed,
    /// Gorilla-compressed bit stream.
    #[default]
    Compressed,
}

impl ChunkEncoding {
    /// Allocates a new, empty chunk of this encoding.
    ///
    /// `size_bytes` is the capacity hint: appends report [`AddStatus::Full`]
    /// once the chunk's data would exceed it.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::AllocationFailed`] if the initial buffer cannot
    /// be reserved.
    pub fn new_chunk(self, size_bytes: usize) -> Result<Box<dyn Chunk>, ChunkError> {
        Ok(match self {
            Self::Uncompressed => Box::new(UncompressedChunk::new(size_bytes)?),
            Self::Compressed => Box::new(CompressedChunk::new(size_bytes)),
        })
    }

    /// Returns the canonical lower-case name of this encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uncompressed => "uncompressed",
            Self::Compressed => "compressed",
        }
    }
}

impl fmt::Display for ChunkEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkEncoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uncompressed" => Ok(Self::Uncompressed),
            "compressed" => Ok(Self::Compressed),
            _ => Err(ConfigError::UnknownEncoding {
                name: s.to_string(),
            }),
        }
    }
}

/// Capability interface shared by all chunk encodings.
///
/// Chunks are owned by a series' chunk directory as `Box<dyn Chunk>`;
/// dropping the box frees the chunk.
pub trait Chunk: fmt::Debug + Send + Sync {
    /// Appends a sample after the chunk's last sample.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::OutOfOrder`] if `sample.timestamp` is not
    /// strictly greater than the last stored timestamp.
    fn add_sample(&mut self, sample: Sample) -> Result<AddStatus, ChunkError>;

    /// Inserts or overwrites a sample at any position.
    ///
    /// Upserts ignore the append capacity; the series layer splits chunks
    /// that grow too large.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::DuplicateRejected`] if the timestamp is occupied
    /// and `policy` is [`DuplicatePolicy::Block`], or
    /// [`ChunkError::AllocationFailed`] if the chunk could not grow.
    fn upsert_sample(
        &mut self,
        sample: Sample,
        policy: DuplicatePolicy,
    ) -> Result<UpsertOutcome, ChunkError>;

    /// Moves the upper half of this chunk's samples into a new chunk.
    ///
    /// The caller must only split chunks holding at least two samples.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::AllocationFailed`] if the new chunk cannot be
    /// allocated; `self` is unchanged in that case.
    fn split(&mut self) -> Result<Box<dyn Chunk>, ChunkError>;

    /// Timestamp of the first sample, or `None` when empty.
    fn first_timestamp(&self) -> Option<u64>;

    /// Timestamp of the last sample, or `None` when empty.
    fn last_timestamp(&self) -> Option<u64>;

    /// Number of samples stored.
    fn num_samples(&self) -> usize;

    /// Size of the encoded sample data in bytes.
    fn size_bytes(&self) -> usize;

    /// Total memory held by the chunk, including its own struct.
    fn memory_usage(&self) -> usize;

    /// Creates an iterator over the chunk's samples.
    fn iter(&self, reverse: bool) -> ChunkIter<'_>;

    /// Returns the encoding of this chunk.
    fn encoding(&self) -> ChunkEncoding;

    /// Returns `true` if the chunk holds no samples.
    fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }
}

/// Iterator over the samples of a single chunk, forward or reverse.
pub struct ChunkIter<'a> {
    inner: Box<dyn Iterator<Item = Sample> + 'a>,
    reverse: bool,
}

impl<'a> ChunkIter<'a> {
    /// Wraps a double-ended sample source, yielding from the back when
    /// `reverse` is set.
    pub fn new<I>(inner: I, reverse: bool) -> Self
    where
        I: DoubleEndedIterator<Item = Sample> + 'a,
    {
        let inner: Box<dyn Iterator<Item = Sample> + 'a> = if reverse {
            Box::new(inner.rev())
        } else {
            Box::new(inner)
        };
        Self { inner, reverse }
    }

    /// Wraps a source that can only be read oldest first.
    pub fn forward<I>(inner: I) -> Self
    where
        I: Iterator<Item = Sample> + 'a,
    {
        Self {
            inner: Box::new(inner),
            reverse: false,
        }
    }

    /// Returns `true` if this iterator yields samples newest first.
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }
}

impl fmt::Debug for ChunkIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkIter")
            .field("reverse", &self.reverse)
            .finish_non_exhaustive()
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Inserts or overwrites `sample` in a sorted sample buffer.
///
/// Shared by both encodings: the uncompressed chunk edits its buffer in
/// place, the compressed chunk edits a decoded copy.
pub(crate) fn upsert_sorted(
    samples: &mut Vec<Sample>,
    sample: Sample,
    policy: DuplicatePolicy,
) -> Result<UpsertOutcome, ChunkError> {
    match samples.binary_search_by_key(&sample.timestamp, |s| s.timestamp) {
        Ok(idx) => {
            let value = policy.resolve(&samples[idx], &sample)?;
            samples[idx].value = value;
            Ok(UpsertOutcome::Overwritten { value })
        }
        Err(idx) => {
            samples
                .try_reserve(1)
                .map_err(|e| ChunkError::AllocationFailed {
                    reason: e.to_string(),
                })?;
            samples.insert(idx, sample);
            Ok(UpsertOutcome::Inserted)
        }
    }
}
