//! Error types for the kairos time-series storage engine.

use thiserror::Error;

/// The main error type for all kairos operations.
///
/// This enum covers every error a caller can observe, from series creation
/// through writes, rule management, queries and configuration loading.
#[derive(Error, Debug)]
pub enum KairosError {
    /// Error raised by a chunk while storing samples.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Error raised by the series write path.
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// Error during series lifecycle operations (create, delete, rename).
    #[error("series error: {0}")]
    Series(#[from] SeriesError),

    /// Error while declaring or removing a compaction rule.
    #[error("rule error: {0}")]
    Rule(#[from] RuleError),

    /// Error during query operations (read path).
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error while loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur inside a single chunk.
///
/// A chunk that returns any of these errors has not been modified.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkError {
    /// The duplicate policy in effect is BLOCK and the timestamp is occupied.
    #[error("duplicate timestamp {timestamp} rejected by BLOCK policy")]
    DuplicateRejected {
        /// The occupied timestamp.
        timestamp: u64,
    },

    /// An append was attempted with a timestamp that does not follow the
    /// chunk's last sample.
    #[error("timestamp {timestamp} does not follow last timestamp {last_timestamp}")]
    OutOfOrder {
        /// The rejected timestamp.
        timestamp: u64,
        /// The chunk's current last timestamp.
        last_timestamp: u64,
    },

    /// Memory for a chunk buffer could not be reserved.
    #[error("chunk allocation failed: {reason}")]
    AllocationFailed {
        /// Description of the failed reservation.
        reason: String,
    },

    /// The chunk directory has no chunk under a key the series refers to.
    #[error("no chunk under directory key {key}")]
    MissingChunk {
        /// The directory key, as a timestamp.
        key: u64,
    },
}

/// Errors that can occur on the series write path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    /// The timestamp lies before the series' retention window.
    #[error("timestamp {timestamp} is older than retention (oldest allowed {min_timestamp})")]
    TimestampTooOld {
        /// The rejected timestamp.
        timestamp: u64,
        /// The oldest timestamp the series currently accepts.
        min_timestamp: u64,
    },
}

/// Errors that can occur during series lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    /// No series exists under the given key.
    #[error("series '{key}' not found")]
    SeriesNotFound {
        /// The missing key.
        key: String,
    },

    /// A series already exists under the given key.
    #[error("series '{key}' already exists")]
    SeriesAlreadyExists {
        /// The conflicting key.
        key: String,
    },

    /// The series key is not acceptable.
    #[error("invalid series key: {reason}")]
    InvalidKey {
        /// Why the key is invalid.
        reason: String,
    },

    /// Invalid label key or value.
    #[error("invalid label {key}={value}: {reason}")]
    InvalidLabel {
        /// The label key.
        key: String,
        /// The label value.
        value: String,
        /// Why the label is invalid.
        reason: String,
    },

    /// Chunk size target is outside the supported range.
    #[error("invalid chunk size {size} bytes (must be within {min}..={max})")]
    InvalidChunkSize {
        /// The requested size.
        size: usize,
        /// Smallest accepted size.
        min: usize,
        /// Largest accepted size.
        max: usize,
    },
}

/// Errors that can occur while declaring or removing compaction rules.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// The bucket width of a rule must be greater than zero.
    #[error("invalid time bucket: width must be greater than 0")]
    InvalidTimeBucket,

    /// The destination series of a rule does not exist.
    #[error("destination series '{key}' not found")]
    DestinationNotFound {
        /// The missing destination key.
        key: String,
    },

    /// The destination series is already compacted from another source.
    #[error("series '{key}' already has a source rule from '{source_key}'")]
    RuleAlreadyHasSource {
        /// The destination key.
        key: String,
        /// The source that already feeds the destination.
        source_key: String,
    },

    /// A series cannot be compacted into itself.
    #[error("source and destination must differ (both '{key}')")]
    SameSourceAndDestination {
        /// The offending key.
        key: String,
    },

    /// No rule links the given source to the given destination.
    #[error("no compaction rule from '{source_key}' to '{destination}'")]
    RuleNotFound {
        /// The source key.
        source_key: String,
        /// The destination key.
        destination: String,
    },
}

/// Errors that can occur during query operations (read path).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The time range is invalid (start > end).
    #[error("invalid time range: start {start} > end {end}")]
    InvalidTimeRange {
        /// The start time.
        start: u64,
        /// The end time.
        end: u64,
    },
}

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config '{path}': {source}")]
    Read {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid JSON for the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Description of what is invalid.
        reason: String,
    },

    /// An aggregation name was not recognised.
    #[error("unknown aggregation '{name}'")]
    UnknownAggregation {
        /// The unrecognised name.
        name: String,
    },

    /// A duplicate policy name was not recognised.
    #[error("unknown duplicate policy '{name}'")]
    UnknownDuplicatePolicy {
        /// The unrecognised name.
        name: String,
    },

    /// A chunk encoding name was not recognised.
    #[error("unknown chunk encoding '{name}'")]
    UnknownEncoding {
        /// The unrecognised name.
        name: String,
    },
}

/// Convenience type alias for Results with [`KairosError`].
pub type Result<T> = std::result::Result<T, KairosError>;
