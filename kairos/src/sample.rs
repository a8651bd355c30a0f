//! Sample and duplicate-policy types shared by every storage layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, ConfigError};

/// Size in bytes of one uncompressed sample (timestamp + value).
pub const SAMPLE_SIZE: usize = std::mem::size_of::<Sample>();

/// Duplicate policy used when neither the write nor the series specify one.
pub const DEFAULT_DUPLICATE_POLICY: DuplicatePolicy = DuplicatePolicy::Block;

/// A single `(timestamp, value)` point of a time series.
///
/// Timestamps are milliseconds; values are IEEE-754 doubles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in milliseconds.
    pub timestamp: u64,
    /// Sample value.
    pub value: f64,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(timestamp: u64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(u64, f64)> for Sample {
    fn from((timestamp, value): (u64, f64)) -> Self {
        Self { timestamp, value }
    }
}

/// Conflict resolution applied when a write targets an occupied timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Reject the write.
    Block,
    /// Keep the new value.
    Last,
    /// Keep the stored value.
    First,
    /// Keep the smaller of the two values.
    Min,
    /// Keep the larger of the two values.
    Max,
    /// Add the new value to the stored one.
    Sum,
}

impl DuplicatePolicy {
    /// Resolves the value to store when `new` collides with `existing`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::DuplicateRejected`] under [`DuplicatePolicy::Block`],
    /// regardless of whether the two values are equal.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kairos::sample::{DuplicatePolicy, Sample};
    ///
    /// let existing = Sample::new(10, 3.0);
    /// let new = Sample::new(10, 5.0);
    ///
    /// assert_eq!(DuplicatePolicy::Sum.resolve(&existing, &new).unwrap(), 8.0);
    /// assert_eq!(DuplicatePolicy::Min.resolve(&existing, &new).unwrap(), 3.0);
    /// assert!(DuplicatePolicy::Block.resolve(&existing, &new).is_err());
    /// ```
    pub fn resolve(self, existing: &Sample, new: &Sample) -> Result<f64, ChunkError> {
        match self {
            Self::Block => Err(ChunkError::DuplicateRejected {
                timestamp: new.timestamp,
            }),
            Self::Last => Ok(new.value),
            Self::First => Ok(existing.value),
            Self::Min => Ok(existing.value.min(new.value)),
            Self::Max => Ok(existing.value.max(new.value)),
            Self::Sum => Ok(existing.value + new.value),
        }
    }

    /// Returns the canonical lower-case name of this policy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Last => "last",
            Self::First => "first",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "last" => Ok(Self::Last),
            "first" => Ok(Self::First),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            _ => Err(ConfigError::UnknownDuplicatePolicy {
                name: s.to_string(),
            }),
        }
    }
}
