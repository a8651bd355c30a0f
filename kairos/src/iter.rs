//! Range iteration across the chunks of a series.

use std::iter::FusedIterator;

use crate::chunk::{Chunk, ChunkIter};
use crate::directory::{ChunkDirectory, ChunkKey};
use crate::sample::Sample;

/// Iterator over the samples of a series within `[min, max]`.
///
/// The iterator seeks the chunk that can hold the starting bound, then walks
/// neighbouring chunks in the requested direction. It stops as soon as the
/// next chunk cannot intersect the range, so the cost is proportional to the
/// chunks touched rather than the size of the series.
///
/// # Examples
///
/// ```rust
/// use kairos::{Series, SeriesOptions, EngineConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = EngineConfig::default();
/// let mut series = Series::new("cpu", &SeriesOptions::default(), &config)?;
/// for ts in 1..=5 {
///     series.add_sample(ts * 10, ts as f64)?;
/// }
///
/// let forward: Vec<u64> = series.range(15, 40, false).map(|s| s.timestamp).collect();
/// assert_eq!(forward, vec![20, 30, 40]);
///
/// let reverse: Vec<u64> = series.range(15, 40, true).map(|s| s.timestamp).collect();
/// assert_eq!(reverse, vec![40, 30, 20]);
/// # Ok(())
/// # }
/// ```
pub struct SeriesIterator<'a> {
    chunks: Box<dyn Iterator<Item = (ChunkKey, &'a dyn Chunk)> + 'a>,
    current: Option<ChunkIter<'a>>,
    min: u64,
    max: u64,
    reverse: bool,
    done: bool,
}

impl<'a> SeriesIterator<'a> {
    /// Creates an iterator over `directory` bounded to `[min, max]`.
    ///
    /// An inverted range (`min > max`) yields nothing.
    pub fn new(directory: &'a ChunkDirectory, min: u64, max: u64, reverse: bool) -> Self {
        let bound = if reverse { max } else { min };
        let start = directory
            .seek_le(bound)
            .or_else(|| directory.first_key());

        let chunks: Box<dyn Iterator<Item = (ChunkKey, &'a dyn Chunk)> + 'a> = match start {
            Some(key) => directory.walk(key, reverse),
            None => Box::new(std::iter::empty()),
        };

        Self {
            chunks,
            current: None,
            min,
            max,
            reverse,
            done: min > max,
        }
    }

    /// Returns `true` if samples are yielded newest first.
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Opens the next chunk that can still intersect the range.
    fn advance_chunk(&mut self) -> bool {
        for (_, chunk) in self.chunks.by_ref() {
            let (Some(first), Some(last)) = (chunk.first_timestamp(), chunk.last_timestamp())
            else {
                continue;
            };
            let beyond = if self.reverse {
                last < self.min
            } else {
                first > self.max
            };
            if beyond {
                return false;
            }
            self.current = Some(chunk.iter(self.reverse));
            return true;
        }
        false
    }
}

impl Iterator for SeriesIterator<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some(current) = self.current.as_mut() else {
                if !self.advance_chunk() {
                    self.done = true;
                }
                continue;
            };

            let Some(sample) = current.next() else {
                self.current = None;
                continue;
            };

            let (before, after) = if self.reverse {
                (sample.timestamp > self.max, sample.timestamp < self.min)
            } else {
                (sample.timestamp < self.min, sample.timestamp > self.max)
            };
            if before {
                continue;
            }
            if after {
                self.done = true;
                self.current = None;
                break;
            }
            return Some(sample);
        }
        None
    }
}

impl FusedIterator for SeriesIterator<'_> {}

impl std::fmt::Debug for SeriesIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesIterator")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("reverse", &self.reverse)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
