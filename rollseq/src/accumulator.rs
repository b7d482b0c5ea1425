//! Row accumulator for rollup columns.
//!
//! A [`RowAccumulator`] is fed the cells of one rollup row, one at a time,
//! by a single scan consumer. It routes each cell to the value or count
//! stream, checks that offsets keep increasing, settles duplicates, and packs
//! qualifiers and values into flat byte buffers. [`RowAccumulator::freeze`]
//! then hands the buffers over to a shared, read-only [`RollupSeq`].
//!
//! # Append Rules
//!
//! For each stream, with `last` the last accepted offset:
//!
//! - `offset > last`: the cell is appended.
//! - `offset == last` with duplicate fixing on: a cell written later than the
//!   stored one is dropped; an earlier or equally old cell replaces it.
//! - anything else fails with [`AppendError::OutOfOrderOffset`].
//!
//! # Example
//!
//! ```rust
//! use rollseq::accumulator::RowAccumulator;
//! use rollseq::codec::{self, Qualifier};
//! use rollseq::column::Column;
//! use rollseq::config::RollupConfig;
//! use rollseq::schema::{Aggregator, RollupInterval, RollupQuery};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let query = RollupQuery::new(Aggregator::Sum, RollupInterval::parse("1h", "1d")?);
//! let mut acc = RowAccumulator::new(&query, &RollupConfig::default())?;
//!
//! let key = [0u8, 0, 1, 0x65, 0x53, 0xF1, 0x00];
//! let q = Qualifier::new(0, 1, true)?;
//! acc.set_first_column(&Column::new(key, codec::rollup_qualifier(0, q), [42u8], 1))?;
//!
//! let seq = acc.freeze()?;
//! assert_eq!(seq.size(), 1);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use crate::codec::{AGGREGATOR_MASK, QUALIFIER_WIDTH, Qualifier};
use crate::column::Column;
use crate::config::RollupConfig;
use crate::error::{AppendError, Result, Stream};
use crate::row_key::{RowKey, RowKeyLayout};
use crate::schema::{Aggregator, RollupInterval, RollupQuery, TimestampResolution};
use crate::seq::{RollupSeq, RowData, StreamData};

/// Legacy qualifier prefix of count cells.
const COUNT_PREFIX: &[u8] = b"count:";

/// How a qualifier encodes its aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnEncoding {
    /// One aggregator id byte followed by the offset/flags field.
    Current,
    /// An ASCII `"<aggregator>:"` prefix followed by the offset/flags field.
    Legacy {
        /// Length of the ASCII prefix, colon included.
        prefix_len: usize,
    },
}

impl ColumnEncoding {
    /// Position of the offset/flags field within the qualifier.
    pub fn field_start(self) -> usize {
        match self {
            Self::Current => 1,
            Self::Legacy { prefix_len } => prefix_len,
        }
    }
}

/// Where a column goes and how its qualifier is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Target stream.
    pub stream: Stream,
    /// Qualifier encoding.
    pub encoding: ColumnEncoding,
}

/// One stream's buffers plus its ordering sentinels.
#[derive(Debug)]
struct StreamBuffer {
    data: StreamData,
    last_offset: Option<u16>,
    last_timestamp: u64,
}

impl StreamBuffer {
    fn with_intervals(intervals: usize) -> Self {
        Self {
            data: StreamData::with_capacity(intervals * QUALIFIER_WIDTH, intervals),
            last_offset: None,
            last_timestamp: 0,
        }
    }

    fn append(
        &mut self,
        stream: Stream,
        qualifier: Qualifier,
        column: &Column,
        fix_duplicates: bool,
    ) -> Result<()> {
        let offset = qualifier.offset();
        if let Some(last) = self.last_offset
            && offset <= last
        {
            if offset != last || !fix_duplicates {
                return Err(AppendError::OutOfOrderOffset {
                    stream,
                    offset,
                    last,
                }
                .into());
            }

            if column.timestamp > self.last_timestamp {
                tracing::debug!(
                    %stream,
                    offset,
                    timestamp = column.timestamp,
                    kept = self.last_timestamp,
                    "skipping later duplicate rollup cell"
                );
                return Ok(());
            }

            self.data.pop();
            tracing::debug!(
                %stream,
                offset,
                timestamp = column.timestamp,
                replaced = self.last_timestamp,
                "replacing duplicate rollup cell"
            );
        }

        self.data.push(qualifier, &column.value);
        self.last_offset = Some(offset);
        self.last_timestamp = column.timestamp;
        Ok(())
    }
}

/// Accumulates the cells of one rollup row.
///
/// Construction is single-threaded: every mutating method takes `&mut self`.
/// Readers only ever see the data after [`RowAccumulator::freeze`].
#[derive(Debug)]
pub struct RowAccumulator {
    key: Option<RowKey>,
    layout: RowKeyLayout,
    interval: RollupInterval,
    resolution: TimestampResolution,
    fix_duplicates: bool,
    primary: Aggregator,
    agg_id: u8,
    count_id: Option<u8>,
    primary_prefix: Vec<u8>,
    values: StreamBuffer,
    counts: Option<StreamBuffer>,
}

impl RowAccumulator {
    /// Creates an empty accumulator for `query`.
    ///
    /// Buffers are pre-sized from the number of buckets in a row and grow by
    /// doubling if a row carries more cells than that.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ConfigError::UnknownAggregator`] if `config`
    /// has no id for the primary aggregator, or for `count` when the query
    /// needs the count stream. Invalid intervals are rejected as well.
    pub fn new(query: &RollupQuery, config: &RollupConfig) -> Result<Self> {
        query.interval.validate()?;
        config.key_layout.validate()?;

        let need_count = query.needs_count();
        let primary = query.primary_aggregator();
        let agg_id = config.id_for(primary)?;
        let count_id = if need_count {
            Some(config.id_for(Aggregator::Count)?)
        } else {
            None
        };

        let intervals = query.interval.intervals();
        let mut primary_prefix = primary.name().as_bytes().to_vec();
        primary_prefix.push(b':');

        Ok(Self {
            key: None,
            layout: config.key_layout,
            interval: query.interval.clone(),
            resolution: config.resolution,
            fix_duplicates: config.fix_duplicates,
            primary,
            agg_id,
            count_id,
            primary_prefix,
            values: StreamBuffer::with_intervals(intervals),
            counts: need_count.then(|| StreamBuffer::with_intervals(intervals)),
        })
    }

    /// Establishes the row from its first column and appends that column.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::RowAlreadySet`] if the row is already
    /// established, [`AppendError::MalformedRowKey`] for a short key, and any
    /// classification or append error for the column itself.
    pub fn set_first_column(&mut self, column: &Column) -> Result<()> {
        if self.key.is_some() {
            return Err(AppendError::RowAlreadySet.into());
        }

        self.key = Some(RowKey::new(column.row_key.clone(), self.layout)?);
        let class = self.classify(&column.qualifier)?;
        self.append(column, class)
    }

    /// Appends a further column of the established row.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::RowNotInitialized`] before
    /// [`set_first_column`](Self::set_first_column),
    /// [`AppendError::RowKeyMismatch`] if the column belongs to another row,
    /// and any classification or append error for the column itself.
    pub fn add_column(&mut self, column: &Column) -> Result<()> {
        let Some(key) = &self.key else {
            return Err(AppendError::RowNotInitialized.into());
        };
        if !key.matches(&column.row_key) {
            return Err(AppendError::RowKeyMismatch {
                expected: key.as_bytes().to_vec(),
                actual: column.row_key.clone(),
            }
            .into());
        }

        let class = self.classify(&column.qualifier)?;
        self.append(column, class)
    }

    /// Appends `column`, establishing the row first if needed.
    ///
    /// # Errors
    ///
    /// See [`set_first_column`](Self::set_first_column) and
    /// [`add_column`](Self::add_column).
    pub fn push_column(&mut self, column: &Column) -> Result<()> {
        if self.key.is_none() {
            self.set_first_column(column)
        } else {
            self.add_column(column)
        }
    }

    /// Decides which stream a qualifier belongs to and how it is encoded.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::UnrecognizedAggregator`] if the qualifier
    /// matches neither a configured id nor a legacy prefix.
    pub fn classify(&self, qualifier: &[u8]) -> Result<Classification> {
        if let Some(&first) = qualifier.first() {
            let id = first & AGGREGATOR_MASK;
            if id == self.agg_id {
                return Ok(Classification {
                    stream: Stream::Value,
                    encoding: ColumnEncoding::Current,
                });
            }
            if self.counts.is_some() && self.count_id == Some(id) {
                return Ok(Classification {
                    stream: Stream::Count,
                    encoding: ColumnEncoding::Current,
                });
            }
        }

        if has_prefix(qualifier, &self.primary_prefix) {
            return Ok(Classification {
                stream: Stream::Value,
                encoding: ColumnEncoding::Legacy {
                    prefix_len: self.primary_prefix.len(),
                },
            });
        }
        if self.counts.is_some() && has_prefix(qualifier, COUNT_PREFIX) {
            return Ok(Classification {
                stream: Stream::Count,
                encoding: ColumnEncoding::Legacy {
                    prefix_len: COUNT_PREFIX.len(),
                },
            });
        }

        Err(AppendError::UnrecognizedAggregator {
            qualifier: qualifier.to_vec(),
            expected: self.expected_aggregators(),
        }
        .into())
    }

    fn append(&mut self, column: &Column, class: Classification) -> Result<()> {
        let qualifier = Qualifier::from_bytes(&column.qualifier, class.encoding.field_start())?;
        qualifier.check_value(&column.value)?;

        let fix_duplicates = self.fix_duplicates;
        let buffer = match class.stream {
            Stream::Value => Some(&mut self.values),
            Stream::Count => self.counts.as_mut(),
        };
        let Some(buffer) = buffer else {
            return Err(AppendError::UnrecognizedAggregator {
                qualifier: column.qualifier.clone(),
                expected: "no count stream for this query".to_string(),
            }
            .into());
        };

        buffer.append(class.stream, qualifier, column, fix_duplicates)
    }

    fn expected_aggregators(&self) -> String {
        if self.counts.is_some() {
            format!("{} or count", self.primary)
        } else {
            self.primary.to_string()
        }
    }

    /// Returns `true` if the count stream is collected.
    pub fn need_count(&self) -> bool {
        self.counts.is_some()
    }

    /// Returns the established row key, if any.
    pub fn key(&self) -> Option<&RowKey> {
        self.key.as_ref()
    }

    /// Returns the number of cells in the value stream.
    pub fn datapoints(&self) -> usize {
        self.values.data.entries()
    }

    /// Returns the number of cells in the count stream.
    pub fn counts(&self) -> usize {
        self.counts.as_ref().map_or(0, |c| c.data.entries())
    }

    /// Ends accumulation and returns the shared read-only sequence.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::RowNotInitialized`] if no column was ever set.
    pub fn freeze(self) -> Result<RollupSeq> {
        let Some(key) = self.key else {
            return Err(AppendError::RowNotInitialized.into());
        };

        tracing::trace!(
            row = ?key,
            datapoints = self.values.data.entries(),
            counts = self.counts.as_ref().map_or(0, |c| c.data.entries()),
            "freezing rollup row"
        );

        Ok(RollupSeq::new(RowData {
            base_time: key.base_time(),
            key,
            interval: self.interval,
            resolution: self.resolution,
            values: self.values.data,
            counts: self.counts.map(|c| c.data),
        }))
    }
}

impl fmt::Display for RowAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "RowAccumulator(key={:?}", key.as_bytes())?,
            None => write!(f, "RowAccumulator(key=<none>")?,
        }
        write!(
            f,
            ", datapoints={}, counts={})",
            self.datapoints(),
            self.counts()
        )
    }
}

fn has_prefix(qualifier: &[u8], prefix: &[u8]) -> bool {
    qualifier.len() >= prefix.len() && qualifier[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, legacy_qualifier, rollup_qualifier};
    use crate::error::{ConfigError, RollseqError};

    const BASE_TIME: u32 = 1_699_999_200;

    fn row_key() -> Vec<u8> {
        let mut key = vec![0, 0, 1];
        key.extend_from_slice(&BASE_TIME.to_be_bytes());
        key.extend_from_slice(&[0, 0, 1, 0, 0, 1]);
        key
    }

    fn accumulator(aggregator: Aggregator, fix_duplicates: bool) -> RowAccumulator {
        let query = RollupQuery::new(aggregator, RollupInterval::parse("1h", "1d").unwrap());
        let config = RollupConfig {
            fix_duplicates,
            ..RollupConfig::default()
        };
        RowAccumulator::new(&query, &config).unwrap()
    }

    fn int_column(agg_id: u8, offset: u16, value: i64, timestamp: u64) -> Column {
        let bytes = codec::encode_integer(value);
        let q = Qualifier::new(offset, bytes.len(), true).unwrap();
        Column::new(row_key(), rollup_qualifier(agg_id, q), bytes, timestamp)
    }

    #[test]
    fn test_classification_order() {
        let acc = accumulator(Aggregator::Avg, false);
        let q = Qualifier::new(1, 1, true).unwrap();

        let class = acc.classify(&rollup_qualifier(0, q)).unwrap();
        assert_eq!(class.stream, Stream::Value);
        assert_eq!(class.encoding, ColumnEncoding::Current);

        let class = acc.classify(&rollup_qualifier(1, q)).unwrap();
        assert_eq!(class.stream, Stream::Count);

        let class = acc.classify(&legacy_qualifier("SUM", q)).unwrap();
        assert_eq!(class.stream, Stream::Value);
        assert_eq!(class.encoding, ColumnEncoding::Legacy { prefix_len: 4 });

        let class = acc.classify(&legacy_qualifier("count", q)).unwrap();
        assert_eq!(class.stream, Stream::Count);
        assert_eq!(class.encoding.field_start(), 6);

        let err = acc.classify(&rollup_qualifier(3, q)).unwrap_err();
        assert!(matches!(
            err,
            RollseqError::Append(AppendError::UnrecognizedAggregator { .. })
        ));
    }

    #[test]
    fn test_count_cells_rejected_without_count_stream() {
        let acc = accumulator(Aggregator::Sum, false);
        let q = Qualifier::new(1, 1, true).unwrap();

        assert!(acc.classify(&rollup_qualifier(1, q)).is_err());
        assert!(acc.classify(&legacy_qualifier("count", q)).is_err());
        assert!(acc.classify(&legacy_qualifier("sum", q)).is_ok());
    }

    #[test]
    fn test_missing_count_id_is_config_error() {
        let query = RollupQuery::new(Aggregator::Dev, RollupInterval::parse("1h", "1d").unwrap());
        let mut config = RollupConfig::default();
        config.aggregator_ids.remove("count");

        let err = RowAccumulator::new(&query, &config).unwrap_err();
        assert!(matches!(
            err,
            RollseqError::Config(ConfigError::UnknownAggregator { .. })
        ));
    }

    #[test]
    fn test_row_lifecycle_errors() {
        let mut acc = accumulator(Aggregator::Sum, false);
        assert!(matches!(
            acc.add_column(&int_column(0, 0, 1, 1)),
            Err(RollseqError::Append(AppendError::RowNotInitialized))
        ));

        acc.set_first_column(&int_column(0, 0, 1, 1)).unwrap();
        assert!(matches!(
            acc.set_first_column(&int_column(0, 1, 1, 1)),
            Err(RollseqError::Append(AppendError::RowAlreadySet))
        ));

        let mut other = int_column(0, 2, 1, 1);
        other.row_key[3] ^= 0xFF;
        assert!(matches!(
            acc.add_column(&other),
            Err(RollseqError::Append(AppendError::RowKeyMismatch { .. }))
        ));
    }

    #[test]
    fn test_duplicate_rollback_restores_width() {
        let mut acc = accumulator(Aggregator::Sum, true);
        acc.set_first_column(&int_column(0, 0, 5, 10)).unwrap();
        // 8-byte value at offset 1, then an earlier 1-byte rewrite of it
        acc.add_column(&int_column(0, 1, i64::MAX, 20)).unwrap();
        acc.add_column(&int_column(0, 1, 7, 15)).unwrap();

        assert_eq!(acc.datapoints(), 2);
        assert_eq!(acc.values.data.values, vec![5, 7]);
        assert_eq!(acc.values.last_timestamp, 15);
    }

    #[test]
    fn test_buffers_grow_past_presized_capacity() {
        let query = RollupQuery::new(Aggregator::Max, RollupInterval::parse("1h", "2h").unwrap());
        let mut acc = RowAccumulator::new(&query, &RollupConfig::default()).unwrap();

        // Two buckets per row, but writers may still emit higher offsets.
        acc.set_first_column(&int_column(3, 0, i64::MIN, 1)).unwrap();
        for offset in 1..50 {
            acc.add_column(&int_column(3, offset, i64::MIN, 1)).unwrap();
        }
        assert_eq!(acc.datapoints(), 50);
        assert_eq!(acc.values.data.values.len(), 50 * 8);
    }

    #[test]
    fn test_value_length_must_match_qualifier() {
        let mut acc = accumulator(Aggregator::Sum, false);
        let q = Qualifier::new(0, 4, true).unwrap();
        let column = Column::new(row_key(), rollup_qualifier(0, q), vec![1u8, 2], 1);
        assert!(matches!(
            acc.set_first_column(&column),
            Err(RollseqError::Codec(_))
        ));
    }

    #[test]
    fn test_freeze_requires_row() {
        let acc = accumulator(Aggregator::Sum, false);
        assert!(matches!(
            acc.freeze(),
            Err(RollseqError::Append(AppendError::RowNotInitialized))
        ));
    }

    #[test]
    fn test_display_summary() {
        let mut acc = accumulator(Aggregator::Avg, false);
        assert_eq!(acc.to_string(), "RowAccumulator(key=<none>, datapoints=0, counts=0)");
        acc.set_first_column(&int_column(1, 0, 2, 1)).unwrap();
        assert!(acc.to_string().ends_with("datapoints=0, counts=1)"));
    }
}
