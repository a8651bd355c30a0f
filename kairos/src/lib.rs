//! # kairos
//!
//! Chunked in-memory time-series storage engine with compaction rules.
//!
//! kairos stores ordered `(timestamp, value)` samples per series in
//! time-ordered chunks, supports out-of-order upserts under a duplicate
//! policy, bidirectional range queries, retention-based eviction, and
//! compaction rules that incrementally maintain downsampled series.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Gorilla-compressed or plain chunks, chosen per series at creation
//! - Out-of-order writes land in the covering chunk; oversized chunks split
//! - Compaction windows roll over on append and are re-derived on upsert
//! - Series link by key only; the host keyspace resolves every link
//! - No background threads, no I/O, no internal locking
//!
//! ## Quick Start
//!
//! ```rust
//! use kairos::aggregation::AggregationKind;
//! use kairos::{DuplicatePolicy, SeriesOptions, Store};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::new();
//!
//! // A raw series keeping one hour, and a per-minute maximum of it
//! store.create(
//!     "cpu.usage",
//!     SeriesOptions::new()
//!         .with_retention(3_600_000)
//!         .with_duplicate_policy(DuplicatePolicy::Last)
//!         .with_label("host", "web1"),
//! )?;
//! store.create("cpu.usage.max", SeriesOptions::new())?;
//! store.add_rule("cpu.usage", "cpu.usage.max", AggregationKind::Max, 60_000)?;
//!
//! store.add("cpu.usage", 1_000, 85.5)?;
//! store.add("cpu.usage", 61_000, 12.0)?;
//!
//! // Query data back
//! for sample in store.query("cpu.usage", 0, u64::MAX, false)? {
//!     println!("{}: {}", sample.timestamp, sample.value);
//! }
//! assert_eq!(store.query("cpu.usage.max", 0, u64::MAX, false)?.count(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`] - Top-level handle; creates series, routes writes, applies compaction
//! - [`Series`] - One series: chunk directory, write paths and outgoing rules
//! - [`EngineConfig`] / [`SeriesOptions`] - Engine defaults and per-series overrides
//! - [`QueryResult`] - Lazy iterator with range metadata
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`store`] - Store lifecycle, writes, rules, queries
//! - [`series`] - Series write paths and metadata
//! - [`chunk`] - Chunk trait and its plain and Gorilla encodings
//! - [`directory`] - Ordered chunk directory and retention trim
//! - [`iter`] - Bidirectional range iterator over a directory
//! - [`aggregation`] - Aggregation kinds and running contexts
//! - [`compaction`] - Compaction rules and downstream writes
//! - [`keyspace`] - Host key store abstraction
//! - [`index`] - Label index abstraction
//! - [`query`] - Query result type
//! - [`config`] - Engine configuration
//! - [`sample`] - Samples and duplicate policies
//! - [`error`] - Error types

pub mod aggregation;
pub mod chunk;
pub mod compaction;
pub mod config;
pub mod directory;
pub mod error;
pub mod index;
pub mod iter;
pub mod keyspace;
pub mod query;
pub mod sample;
pub mod series;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use chunk::ChunkEncoding;
pub use config::{EngineConfig, RuleTemplate, SeriesOptions};
pub use error::{KairosError, Result};
pub use index::LabelMatcher;
pub use query::QueryResult;
pub use sample::{DuplicatePolicy, Sample};
pub use series::{Series, SeriesInfo};
pub use store::Store;
