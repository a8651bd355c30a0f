//! Gorilla-compressed chunk encoding.

use crate::error::ChunkError;
use crate::sample::{DuplicatePolicy, Sample};

use super::gorilla::{Bits, Decoder, Encoder, encode_all};
use super::{AddStatus, Chunk, ChunkEncoding, ChunkIter, UpsertOutcome, upsert_sorted};

/// Chunk storing samples as a Gorilla bit stream.
///
/// Appends encode in place and report [`AddStatus::Full`] once the stream
/// would exceed `size_bytes × 8` bits. Upserts and splits decode the stream,
/// edit the sorted samples and re-encode.
#[derive(Debug, Clone)]
pub struct CompressedChunk {
    bits: Bits,
    encoder: Encoder,
    count: usize,
    first: Option<u64>,
    last: Option<u64>,
    budget_bits: usize,
}

impl CompressedChunk {
    /// Creates an empty chunk with a budget of `size_bytes` encoded bytes.
    pub fn new(size_bytes: usize) -> Self {
        Self {
            bits: Bits::new(),
            encoder: Encoder::default(),
            count: 0,
            first: None,
            last: None,
            budget_bits: size_bytes.saturating_mul(8),
        }
    }

    fn from_samples(samples: &[Sample], budget_bits: usize) -> Self {
        let (bits, encoder) = encode_all(samples);
        Self {
            bits,
            encoder,
            count: samples.len(),
            first: samples.first().map(|s| s.timestamp),
            last: samples.last().map(|s| s.timestamp),
            budget_bits,
        }
    }

    /// Decodes every sample into a buffer with room for one more.
    fn decode(&self) -> Result<Vec<Sample>, ChunkError> {
        let mut samples = Vec::new();
        samples
            .try_reserve_exact(self.count + 1)
            .map_err(|e| ChunkError::AllocationFailed {
                reason: e.to_string(),
            })?;
        samples.extend(Decoder::new(&self.bits, self.count));
        Ok(samples)
    }

    /// Returns the number of encoded bits.
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }
}

impl Chunk for CompressedChunk {
    fn add_sample(&mut self, sample: Sample) -> Result<AddStatus, ChunkError> {
        if let Some(last) = self.last
            && sample.timestamp <= last
        {
            return Err(ChunkError::OutOfOrder {
                timestamp: sample.timestamp,
                last_timestamp: last,
            });
        }

        let mark = self.bits.len();
        let snapshot = self.encoder;
        self.encoder.encode(sample, &mut self.bits);

        if self.count > 0 && self.bits.len() > self.budget_bits {
            self.bits.truncate(mark);
            self.encoder = snapshot;
            return Ok(AddStatus::Full);
        }

        self.count += 1;
        self.first.get_or_insert(sample.timestamp);
        self.last = Some(sample.timestamp);
        Ok(AddStatus::Appended)
    }

    fn upsert_sample(
        &mut self,
        sample: Sample,
        policy: DuplicatePolicy,
    ) -> Result<UpsertOutcome, ChunkError> {
        let mut samples = self.decode()?;
        let outcome = upsert_sorted(&mut samples, sample, policy)?;
        *self = Self::from_samples(&samples, self.budget_bits);
        Ok(outcome)
    }

    fn split(&mut self) -> Result<Box<dyn Chunk>, ChunkError> {
        let mut lower = self.decode()?;
        let upper = lower.split_off(lower.len() / 2);
        let upper = Self::from_samples(&upper, self.budget_bits);
        *self = Self::from_samples(&lower, self.budget_bits);
        Ok(Box::new(upper))
    }

    fn first_timestamp(&self) -> Option<u64> {
        self.first
    }

    fn last_timestamp(&self) -> Option<u64> {
        self.last
    }

    fn num_samples(&self) -> usize {
        self.count
    }

    fn size_bytes(&self) -> usize {
        self.bits.len().div_ceil(8)
    }

    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.bits.capacity().div_ceil(8)
    }

    fn iter(&self, reverse: bool) -> ChunkIter<'_> {
        let decoder = Decoder::new(&self.bits, self.count);
        if reverse {
            // The stream only decodes oldest first.
            let mut samples = Vec::with_capacity(self.count);
            samples.extend(decoder);
            ChunkIter::new(samples.into_iter(), true)
        } else {
            ChunkIter::forward(decoder)
        }
    }

    fn encoding(&self) -> ChunkEncoding {
        ChunkEncoding::Compressed
    }
}
