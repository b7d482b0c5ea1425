//! Rollup query description types.
//!
//! These types say what a caller wants read out of a rollup row: which
//! aggregation was requested, how wide each rollup bucket is, and how many
//! buckets one storage row spans. They drive the accumulator's stream
//! selection and the iterator's timestamp reconstruction.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::MAX_OFFSET;
use crate::error::{ConfigError, Result};

/// Aggregation function that produced (or is requested from) a rollup cell.
///
/// `Avg` and `Dev` are never stored directly. They are computed downstream
/// from a `sum` stream and a `count` stream read side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    /// Sum of the raw samples in the bucket.
    Sum,
    /// Number of raw samples in the bucket.
    Count,
    /// Smallest raw sample in the bucket.
    Min,
    /// Largest raw sample in the bucket.
    Max,
    /// Arithmetic mean, derived from sum and count.
    Avg,
    /// Standard deviation, derived from sum and count.
    Dev,
}

impl Aggregator {
    /// Returns the lowercase name used in configuration and legacy qualifiers.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Dev => "dev",
        }
    }

    /// Returns `true` if reading this aggregation needs the count stream.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rollseq::schema::Aggregator;
    ///
    /// assert!(Aggregator::Avg.needs_count());
    /// assert!(Aggregator::Dev.needs_count());
    /// assert!(!Aggregator::Sum.needs_count());
    /// ```
    pub fn needs_count(self) -> bool {
        matches!(self, Self::Avg | Self::Dev)
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Aggregator {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "dev" => Ok(Self::Dev),
            _ => Err(ConfigError::UnknownAggregator {
                name: s.to_string(),
            }),
        }
    }
}

/// Resolution of the timestamps a sequence reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampResolution {
    /// Unix seconds.
    Seconds,
    /// Unix milliseconds.
    #[default]
    Milliseconds,
}

/// Granularity of a rollup table.
///
/// `interval` is the width of one bucket, `row_span` is the time covered by
/// one storage row. A cell's offset is its bucket index within the row, so
/// a row holds at most `row_span / interval` cells per stream.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use rollseq::schema::RollupInterval;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Hourly buckets, one row per day
/// let interval = RollupInterval::new(Duration::from_secs(3600), Duration::from_secs(86400))?;
/// assert_eq!(interval.intervals(), 24);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollupInterval {
    /// Width of a single rollup bucket.
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Time covered by one storage row.
    #[serde(with = "duration_serde")]
    pub row_span: Duration,
}

impl RollupInterval {
    /// Creates and validates a rollup interval.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInterval`] if the interval is invalid.
    pub fn new(interval: Duration, row_span: Duration) -> Result<Self> {
        let config = Self { interval, row_span };
        config.validate()?;
        Ok(config)
    }

    /// Builds an interval from strings such as `"1h"` and `"1d"`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInterval`] if either string does not
    /// parse or the resulting interval is invalid.
    pub fn parse(interval: &str, row_span: &str) -> Result<Self> {
        Self::new(parse_duration(interval)?, parse_duration(row_span)?)
    }

    /// Validates this interval.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInterval`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(invalid("interval cannot be zero"));
        }
        if self.interval.subsec_nanos() != 0 || self.row_span.subsec_nanos() != 0 {
            return Err(invalid("interval and row span must be whole seconds"));
        }
        if self.row_span < self.interval {
            return Err(invalid(format!(
                "row span ({:?}) must be >= interval ({:?})",
                self.row_span, self.interval
            )));
        }
        if self.row_span.as_secs() % self.interval.as_secs() != 0 {
            return Err(invalid(format!(
                "row span ({:?}) must be a multiple of the interval ({:?})",
                self.row_span, self.interval
            )));
        }

        let intervals = self.row_span.as_secs() / self.interval.as_secs();
        if intervals > u64::from(MAX_OFFSET) + 1 {
            return Err(invalid(format!(
                "{intervals} buckets per row exceed the {} encodable offsets",
                u32::from(MAX_OFFSET) + 1
            )));
        }

        Ok(())
    }

    /// Returns the bucket width in whole seconds.
    pub fn interval_secs(&self) -> u64 {
        self.interval.as_secs()
    }

    /// Returns the number of buckets in one row.
    #[allow(clippy::cast_possible_truncation)] // validate() bounds this by MAX_OFFSET + 1
    pub fn intervals(&self) -> usize {
        match self.interval.as_secs() {
            0 => 0,
            secs => (self.row_span.as_secs() / secs) as usize,
        }
    }
}

/// What a caller is reading from a rollup row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollupQuery {
    /// The requested aggregation.
    pub aggregator: Aggregator,

    /// Granularity of the rollup table being read.
    pub interval: RollupInterval,
}

impl RollupQuery {
    /// Creates a rollup query.
    pub fn new(aggregator: Aggregator, interval: RollupInterval) -> Self {
        Self {
            aggregator,
            interval,
        }
    }

    /// Returns `true` if the count stream must be read alongside the values.
    pub fn needs_count(&self) -> bool {
        self.aggregator.needs_count()
    }

    /// Returns the aggregator whose cells form the value stream.
    ///
    /// Derived aggregations read the `sum` cells; everything else reads the
    /// cells of the requested aggregator directly.
    pub fn primary_aggregator(&self) -> Aggregator {
        if self.needs_count() {
            Aggregator::Sum
        } else {
            self.aggregator
        }
    }
}

/// Parses a duration string such as `"30s"`, `"1m"`, `"1h"` or `"7d"`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidInterval`] for empty strings, non-numeric
/// amounts, and unknown units.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.len() < 2 || !s.is_char_boundary(s.len() - 1) {
        return Err(invalid(format!("cannot parse duration '{s}'")));
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str
        .parse()
        .map_err(|_| invalid(format!("cannot parse duration '{s}'")))?;

    let secs = match unit {
        "s" => Some(num),
        "m" => num.checked_mul(60),
        "h" => num.checked_mul(3600),
        "d" => num.checked_mul(86400),
        _ => {
            return Err(invalid(format!(
                "unknown duration unit '{unit}', use s, m, h, or d"
            )));
        }
    };

    secs.map(Duration::from_secs)
        .ok_or_else(|| invalid(format!("duration '{s}' is too large")))
}

fn invalid(reason: impl Into<String>) -> crate::error::RollseqError {
    ConfigError::InvalidInterval {
        reason: reason.into(),
    }
    .into()
}

/// Durations are serialized as whole seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
