//! Ordered chunk directory of a series.
//!
//! The directory maps each chunk's first timestamp to the chunk itself. Keys
//! are stored as 8-byte big-endian arrays so that byte-wise ordering equals
//! numeric ordering:
//!
//! ```text
//! ChunkKey(1000) = [00 00 00 00 00 00 03 E8]
//! ChunkKey(4096) = [00 00 00 00 00 00 10 00]
//! ```
//!
//! A directory is never empty: it is created with one chunk keyed at 0, and
//! [`ChunkDirectory::trim`] never removes the final chunk.

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::debug;

use crate::chunk::Chunk;

/// Directory key of a chunk: its first timestamp in big-endian byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey([u8; 8]);

impl ChunkKey {
    /// Key of the bootstrap chunk of a fresh series.
    pub const ZERO: Self = Self([0; 8]);

    /// Encodes a timestamp as a directory key.
    pub fn from_timestamp(timestamp: u64) -> Self {
        Self(timestamp.to_be_bytes())
    }

    /// Decodes the timestamp this key was built from.
    pub fn timestamp(self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    /// Returns the raw big-endian bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl From<u64> for ChunkKey {
    fn from(timestamp: u64) -> Self {
        Self::from_timestamp(timestamp)
    }
}

/// Ordered map of chunk first-timestamp to chunk.
#[derive(Debug)]
pub struct ChunkDirectory {
    chunks: BTreeMap<ChunkKey, Box<dyn Chunk>>,
}

impl ChunkDirectory {
    /// Creates a directory holding `bootstrap` under [`ChunkKey::ZERO`].
    pub fn new(bootstrap: Box<dyn Chunk>) -> Self {
        let mut chunks = BTreeMap::new();
        chunks.insert(ChunkKey::ZERO, bootstrap);
        Self { chunks }
    }

    /// Inserts a chunk, returning any chunk previously stored under `key`.
    pub fn insert(&mut self, key: ChunkKey, chunk: Box<dyn Chunk>) -> Option<Box<dyn Chunk>> {
        self.chunks.insert(key, chunk)
    }

    /// Removes and returns the chunk stored under `key`.
    pub fn remove(&mut self, key: ChunkKey) -> Option<Box<dyn Chunk>> {
        self.chunks.remove(&key)
    }

    /// Returns the chunk stored under `key`.
    pub fn get(&self, key: ChunkKey) -> Option<&dyn Chunk> {
        self.chunks.get(&key).map(|chunk| &**chunk)
    }

    /// Returns the chunk stored under `key` mutably.
    pub fn get_mut(&mut self, key: ChunkKey) -> Option<&mut (dyn Chunk + 'static)> {
        self.chunks.get_mut(&key).map(|chunk| &mut **chunk)
    }

    /// Returns the greatest key that is `<= timestamp`.
    pub fn seek_le(&self, timestamp: u64) -> Option<ChunkKey> {
        self.chunks
            .range(..=ChunkKey::from_timestamp(timestamp))
            .next_back()
            .map(|(key, _)| *key)
    }

    /// Returns the smallest key.
    pub fn first_key(&self) -> Option<ChunkKey> {
        self.chunks.keys().next().copied()
    }

    /// Returns the largest key.
    pub fn last_key(&self) -> Option<ChunkKey> {
        self.chunks.keys().next_back().copied()
    }

    /// Number of chunks in the directory.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if the directory holds no chunk.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Walks chunks starting at `start` (inclusive).
    ///
    /// Forward walks visit ascending keys `>= start`; reverse walks visit
    /// descending keys `<= start`.
    pub fn walk(
        &self,
        start: ChunkKey,
        reverse: bool,
    ) -> Box<dyn Iterator<Item = (ChunkKey, &dyn Chunk)> + '_> {
        if reverse {
            Box::new(self.chunks.range(..=start).rev().map(visit))
        } else {
            Box::new(
                self.chunks
                    .range((Bound::Included(start), Bound::Unbounded))
                    .map(visit),
            )
        }
    }

    /// Iterates every chunk in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (ChunkKey, &dyn Chunk)> + '_ {
        self.chunks.iter().map(visit)
    }

    /// Removes leading chunks that lie entirely below `floor`.
    ///
    /// Walks chunks in ascending order and stops at the first one whose last
    /// timestamp is `>= floor`. The final chunk is never removed.
    ///
    /// # Returns
    ///
    /// The number of samples removed.
    pub fn trim(&mut self, floor: u64) -> usize {
        let mut removed_chunks = 0;
        let mut removed_samples = 0;

        while self.chunks.len() > 1 {
            let Some(entry) = self.chunks.first_entry() else {
                break;
            };
            match entry.get().last_timestamp() {
                Some(last) if last < floor => {
                    removed_samples += entry.remove().num_samples();
                    removed_chunks += 1;
                }
                _ => break,
            }
        }

        if removed_chunks > 0 {
            debug!(floor, removed_chunks, removed_samples, "trimmed expired chunks");
        }
        removed_samples
    }

    /// Total encoded size of all chunks in bytes.
    pub fn size_bytes(&self) -> usize {
        self.chunks.values().map(|c| c.size_bytes()).sum()
    }

    /// Total memory held by all chunks, including map entries.
    pub fn memory_usage(&self) -> usize {
        self.chunks
            .values()
            .map(|c| c.memory_usage() + std::mem::size_of::<(ChunkKey, Box<dyn Chunk>)>())
            .sum()
    }
}

fn visit<'a>((key, chunk): (&'a ChunkKey, &'a Box<dyn Chunk>)) -> (ChunkKey, &'a dyn Chunk) {
    (*key, &**chunk)
}
