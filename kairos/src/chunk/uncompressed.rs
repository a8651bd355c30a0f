//! Array-of-samples chunk encoding.

use crate::error::ChunkError;
use crate::sample::{DuplicatePolicy, SAMPLE_SIZE, Sample};

use super::{AddStatus, Chunk, ChunkEncoding, ChunkIter, UpsertOutcome, upsert_sorted};

/// Chunk storing samples as a plain sorted array.
///
/// Append capacity is `size_bytes / 16` samples. Upserts may grow the chunk
/// past that capacity until the series splits it.
#[derive(Debug, Clone)]
pub struct UncompressedChunk {
    samples: Vec<Sample>,
    capacity: usize,
}

impl UncompressedChunk {
    /// Creates an empty chunk sized for `size_bytes` of sample data.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::AllocationFailed`] if the buffer cannot be
    /// reserved.
    pub fn new(size_bytes: usize) -> Result<Self, ChunkError> {
        let capacity = (size_bytes / SAMPLE_SIZE).max(1);
        Ok(Self {
            samples: reserve(capacity)?,
            capacity,
        })
    }

    /// Returns the stored samples in timestamp order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Returns `true` when the chunk has reached its append capacity.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }
}

fn reserve(capacity: usize) -> Result<Vec<Sample>, ChunkError> {
    let mut samples = Vec::new();
    samples
        .try_reserve_exact(capacity)
        .map_err(|e| ChunkError::AllocationFailed {
            reason: e.to_string(),
        })?;
    Ok(samples)
}

impl Chunk for UncompressedChunk {
    fn add_sample(&mut self, sample: Sample) -> Result<AddStatus, ChunkError> {
        if let Some(last) = self.samples.last()
            && sample.timestamp <= last.timestamp
        {
            return Err(ChunkError::OutOfOrder {
                timestamp: sample.timestamp,
                last_timestamp: last.timestamp,
            });
        }
        if self.is_full() {
            return Ok(AddStatus::Full);
        }
        self.samples.push(sample);
        Ok(AddStatus::Appended)
    }

    fn upsert_sample(
        &mut self,
        sample: Sample,
        policy: DuplicatePolicy,
    ) -> Result<UpsertOutcome, ChunkError> {
        upsert_sorted(&mut self.samples, sample, policy)
    }

    fn split(&mut self) -> Result<Box<dyn Chunk>, ChunkError> {
        let mid = self.samples.len() / 2;
        let mut upper = reserve(self.capacity.max(self.samples.len() - mid))?;
        upper.extend_from_slice(&self.samples[mid..]);
        self.samples.truncate(mid);
        Ok(Box::new(Self {
            samples: upper,
            capacity: self.capacity,
        }))
    }

    fn first_timestamp(&self) -> Option<u64> {
        self.samples.first().map(|s| s.timestamp)
    }

    fn last_timestamp(&self) -> Option<u64> {
        self.samples.last().map(|s| s.timestamp)
    }

    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn size_bytes(&self) -> usize {
        self.samples.len() * SAMPLE_SIZE
    }

    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.samples.capacity() * SAMPLE_SIZE
    }

    fn iter(&self, reverse: bool) -> ChunkIter<'_> {
        ChunkIter::new(self.samples.iter().copied(), reverse)
    }

    fn encoding(&self) -> ChunkEncoding {
        ChunkEncoding::Uncompressed
    }
}
