//! Range query results.
//!
//! [`Store::query`](crate::Store::query) validates the requested range,
//! clamps its start to the series' retention floor and returns a
//! [`QueryResult`]: a lazy [`SeriesIterator`] plus metadata about what the
//! series could actually answer.
//!
//! # Example Usage
//!
//! ```rust
//! use kairos::{SeriesOptions, Store};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::default();
//! store.create("cpu", SeriesOptions::new().with_retention(3_000))?;
//! for ts in (0..=10_000).step_by(1_000) {
//!     store.add("cpu", ts, 1.0)?;
//! }
//!
//! let result = store.query("cpu", 0, 10_000, false)?;
//! assert!(result.may_be_incomplete());
//! assert!(!result.fully_covered());
//! assert_eq!(result.effective_range(), (7_000, 10_000));
//! assert_eq!(result.count(), 4);
//! # Ok(())
//! # }
//! ```

use crate::iter::SeriesIterator;
use crate::sample::Sample;

/// Result of a range query.
///
/// Implements `Iterator<Item = Sample>` while keeping the query metadata
/// available.
#[derive(Debug)]
pub struct QueryResult<'a> {
    /// The underlying iterator over the series.
    iterator: SeriesIterator<'a>,

    /// The time range actually stored in the series.
    available_range: (Option<u64>, Option<u64>),

    /// The time range that was requested.
    requested_range: (u64, u64),

    /// The range actually scanned, after clamping to retention.
    effective_range: (u64, u64),

    /// Whether the requested range lies within the stored range.
    fully_covered: bool,

    /// Whether samples of the requested range may be missing.
    may_be_incomplete: bool,
}

impl<'a> QueryResult<'a> {
    /// Creates a new query result.
    ///
    /// # Arguments
    ///
    /// * `iterator` - The series iterator over `effective_range`
    /// * `available_range` - The stored time range (oldest, newest)
    /// * `requested_range` - The time range that was requested
    /// * `effective_range` - The time range the iterator scans
    pub fn new(
        iterator: SeriesIterator<'a>,
        available_range: (Option<u64>, Option<u64>),
        requested_range: (u64, u64),
        effective_range: (u64, u64),
    ) -> Self {
        let (fully_covered, gap_before) = analyze_coverage(available_range, requested_range);
        Self {
            iterator,
            available_range,
            requested_range,
            effective_range,
            fully_covered,
            may_be_incomplete: gap_before || effective_range.0 > requested_range.0,
        }
    }

    /// Returns the time range stored in the series as `(oldest, newest)`.
    ///
    /// Both values are `None` for an empty series.
    pub fn available_range(&self) -> (Option<u64>, Option<u64>) {
        self.available_range
    }

    /// Returns the time range that was originally requested.
    pub fn requested_range(&self) -> (u64, u64) {
        self.requested_range
    }

    /// Returns the time range actually scanned.
    ///
    /// The start is raised to the retention floor when the request reaches
    /// further back than retention allows.
    pub fn effective_range(&self) -> (u64, u64) {
        self.effective_range
    }

    /// Returns `true` if samples are yielded newest first.
    pub fn is_reverse(&self) -> bool {
        self.iterator.is_reverse()
    }

    /// Returns `true` if the requested range lies within the stored range.
    ///
    /// A live query ending after the newest sample is not fully covered but
    /// is not incomplete either.
    pub fn fully_covered(&self) -> bool {
        self.fully_covered
    }

    /// Returns whether the query result may be incomplete.
    ///
    /// This is `true` when the requested range starts before the oldest
    /// stored sample or before the retention floor.
    pub fn may_be_incomplete(&self) -> bool {
        self.may_be_incomplete
    }

    /// Returns the number of samples the query yields, consuming it.
    pub fn count(self) -> usize {
        self.iterator.count()
    }

    /// Collects all samples into a vector.
    pub fn collect_all(self) -> Vec<Sample> {
        self.iterator.collect()
    }
}

impl Iterator for QueryResult<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        self.iterator.next()
    }
}

/// Determines how a requested range relates to the stored range.
///
/// # Returns
///
/// `(fully_covered, may_be_incomplete)` where:
/// - `fully_covered` - True if the requested range lies within the stored range
/// - `may_be_incomplete` - True if the request starts before the oldest sample
pub fn analyze_coverage(
    available: (Option<u64>, Option<u64>),
    requested: (u64, u64),
) -> (bool, bool) {
    match available {
        (Some(oldest), Some(newest)) => {
            let fully_covered = requested.0 >= oldest && requested.1 <= newest;
            // Ending after the newest sample is normal for live queries.
            (fully_covered, requested.0 < oldest)
        }
        _ => (false, true),
    }
}
