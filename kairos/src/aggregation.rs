//! Aggregation functions used by compaction rules.
//!
//! An [`Aggregator`] is a running context for one [`AggregationKind`]. It is
//! fed values one at a time with [`Aggregator::append`] and produces the
//! bucket value with [`Aggregator::finalize`]. Variance and standard
//! deviation use Welford's online algorithm, so every kind runs in constant
//! space.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The aggregation applied to each bucket of a compaction rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationKind {
    /// Smallest value.
    #[serde(rename = "min")]
    Min,
    /// Largest value.
    #[serde(rename = "max")]
    Max,
    /// Sum of values.
    #[serde(rename = "sum")]
    Sum,
    /// Arithmetic mean.
    #[serde(rename = "avg")]
    Avg,
    /// Number of values.
    #[serde(rename = "count")]
    Count,
    /// Earliest value.
    #[serde(rename = "first")]
    First,
    /// Latest value.
    #[serde(rename = "last")]
    Last,
    /// Difference between the largest and smallest value.
    #[serde(rename = "range")]
    Range,
    /// Population standard deviation.
    #[serde(rename = "std.p")]
    StdP,
    /// Sample standard deviation.
    #[serde(rename = "std.s")]
    StdS,
    /// Population variance.
    #[serde(rename = "var.p")]
    VarP,
    /// Sample variance.
    #[serde(rename = "var.s")]
    VarS,
}

impl AggregationKind {
    /// Every supported aggregation kind.
    pub const ALL: [Self; 12] = [
        Self::Min,
        Self::Max,
        Self::Sum,
        Self::Avg,
        Self::Count,
        Self::First,
        Self::Last,
        Self::Range,
        Self::StdP,
        Self::StdS,
        Self::VarP,
        Self::VarS,
    ];

    /// Returns the canonical upper-case name, as used in derived series keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Count => "COUNT",
            Self::First => "FIRST",
            Self::Last => "LAST",
            Self::Range => "RANGE",
            Self::StdP => "STD.P",
            Self::StdS => "STD.S",
            Self::VarP => "VAR.P",
            Self::VarS => "VAR.S",
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownAggregation {
                name: s.to_string(),
            })
    }
}

/// Welford running mean / second moment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        self.mean += delta / n;
        self.m2 += delta * (value - self.mean);
    }

    #[allow(clippy::cast_precision_loss)]
    fn variance(&self, sample: bool) -> Option<f64> {
        match self.count {
            0 => None,
            1 if sample => Some(0.0),
            n if sample => Some(self.m2 / (n - 1) as f64),
            n => Some(self.m2 / n as f64),
        }
    }
}

/// Running aggregation context, one variant per [`AggregationKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregator {
    /// Running minimum.
    Min(Option<f64>),
    /// Running maximum.
    Max(Option<f64>),
    /// Running sum.
    Sum(Option<f64>),
    /// Running sum and count.
    Avg {
        /// Sum of values.
        sum: f64,
        /// Number of values.
        count: u64,
    },
    /// Number of values seen.
    Count(u64),
    /// First value seen.
    First(Option<f64>),
    /// Last value seen.
    Last(Option<f64>),
    /// Running `(min, max)` pair.
    Range(Option<(f64, f64)>),
    /// Population standard deviation.
    StdP(Welford),
    /// Sample standard deviation.
    StdS(Welford),
    /// Population variance.
    VarP(Welford),
    /// Sample variance.
    VarS(Welford),
}

impl Aggregator {
    /// Creates an empty context for `kind`.
    pub fn new(kind: AggregationKind) -> Self {
        match kind {
            AggregationKind::Min => Self::Min(None),
            AggregationKind::Max => Self::Max(None),
            AggregationKind::Sum => Self::Sum(None),
            AggregationKind::Avg => Self::Avg { sum: 0.0, count: 0 },
            AggregationKind::Count => Self::Count(0),
            AggregationKind::First => Self::First(None),
            AggregationKind::Last => Self::Last(None),
            AggregationKind::Range => Self::Range(None),
            AggregationKind::StdP => Self::StdP(Welford::default()),
            AggregationKind::StdS => Self::StdS(Welford::default()),
            AggregationKind::VarP => Self::VarP(Welford::default()),
            AggregationKind::VarS => Self::VarS(Welford::default()),
        }
    }

    /// Returns the kind this context computes.
    pub fn kind(&self) -> AggregationKind {
        match self {
            Self::Min(_) => AggregationKind::Min,
            Self::Max(_) => AggregationKind::Max,
            Self::Sum(_) => AggregationKind::Sum,
            Self::Avg { .. } => AggregationKind::Avg,
            Self::Count(_) => AggregationKind::Count,
            Self::First(_) => AggregationKind::First,
            Self::Last(_) => AggregationKind::Last,
            Self::Range(_) => AggregationKind::Range,
            Self::StdP(_) => AggregationKind::StdP,
            Self::StdS(_) => AggregationKind::StdS,
            Self::VarP(_) => AggregationKind::VarP,
            Self::VarS(_) => AggregationKind::VarS,
        }
    }

    /// Folds one value into the context.
    pub fn append(&mut self, value: f64) {
        match self {
            Self::Min(min) => *min = Some(min.map_or(value, |m| m.min(value))),
            Self::Max(max) => *max = Some(max.map_or(value, |m| m.max(value))),
            Self::Sum(sum) => *sum = Some(sum.unwrap_or(0.0) + value),
            Self::Avg { sum, count } => {
                *sum += value;
                *count += 1;
            }
            Self::Count(count) => *count += 1,
            Self::First(first) => {
                first.get_or_insert(value);
            }
            Self::Last(last) => *last = Some(value),
            Self::Range(range) => {
                *range = Some(range.map_or((value, value), |(lo, hi)| {
                    (lo.min(value), hi.max(value))
                }));
            }
            Self::StdP(w) | Self::StdS(w) | Self::VarP(w) | Self::VarS(w) => w.push(value),
        }
    }

    /// Produces the aggregated value, or `None` if nothing was appended.
    ///
    /// Sample variance and sample standard deviation of a single value are
    /// reported as `0`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kairos::aggregation::{AggregationKind, Aggregator};
    ///
    /// let mut avg = Aggregator::new(AggregationKind::Avg);
    /// assert_eq!(avg.finalize(), None);
    ///
    /// avg.append(10.0);
    /// avg.append(20.0);
    /// assert_eq!(avg.finalize(), Some(15.0));
    /// ```
    #[allow(clippy::cast_precision_loss)]
    pub fn finalize(&self) -> Option<f64> {
        match *self {
            Self::Min(v) | Self::Max(v) | Self::Sum(v) | Self::First(v) | Self::Last(v) => v,
            Self::Avg { count: 0, .. } | Self::Count(0) => None,
            Self::Avg { sum, count } => Some(sum / count as f64),
            Self::Count(count) => Some(count as f64),
            Self::Range(range) => range.map(|(lo, hi)| hi - lo),
            Self::StdP(w) => w.variance(false).map(f64::sqrt),
            Self::StdS(w) => w.variance(true).map(f64::sqrt),
            Self::VarP(w) => w.variance(false),
            Self::VarS(w) => w.variance(true),
        }
    }

    /// Clears the context, keeping its kind.
    pub fn reset(&mut self) {
        *self = Self::new(self.kind());
    }
}
