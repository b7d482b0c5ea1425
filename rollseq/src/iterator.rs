//! Merging iterator over a frozen rollup row.
//!
//! When the row has a count stream, the iterator walks the value and count
//! streams in lockstep and yields a point only for offsets present in both.
//! A cell whose offset has no partner in the other stream is skipped with a
//! warning and counted in [`RollupIterator::skipped_entries`].
//!
//! Iteration is forward-only. [`RollupIterator::seek`] rewinds and scans
//! forward; [`RollupIterator::save_state`] and
//! [`RollupIterator::restore_state`] let a caller return to a position.
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
//! let query = RollupQuery::new(Aggregator::Avg, RollupInterval::parse("1h", "1d")?);
//! let mut acc = RowAccumulator::new(&query, &RollupConfig::default())?;
//! let key = [0u8, 0, 1, 0x65, 0x53, 0xF1, 0x00];
//! let q = Qualifier::new(0, 1, true)?;
//!
//! acc.push_column(&Column::new(key, codec::rollup_qualifier(0, q), [30u8], 1))?;
//! acc.push_column(&Column::new(key, codec::rollup_qualifier(1, q), [3u8], 1))?;
//!
//! let seq = acc.freeze()?;
//! let dp = seq.iter().next().unwrap();
//! assert_eq!(dp.long_value()?, 30);
//! assert_eq!(dp.value_count(), 3);
//! # Ok(())
//! # }
//! ```

use crate::codec::{QUALIFIER_WIDTH, Qualifier, RollupValue, normalize_timestamp};
use crate::error::{ReadError, Result};
use crate::seq::{RollupSeq, RowData, StreamData};

/// One decoded rollup bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollupDataPoint {
    timestamp: u64,
    offset: u16,
    value: RollupValue,
    count: Option<RollupValue>,
}

impl RollupDataPoint {
    /// Absolute timestamp of the bucket.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Bucket offset within the row.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// The aggregated value.
    pub fn value(&self) -> RollupValue {
        self.value
    }

    /// Returns `true` if the value is an integer.
    pub fn is_integer(&self) -> bool {
        self.value.is_integer()
    }

    /// Returns the value as an integer.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::TypeMismatch`] for float values.
    pub fn long_value(&self) -> Result<i64> {
        match self.value {
            RollupValue::Integer(v) => Ok(v),
            RollupValue::Float(_) => Err(ReadError::TypeMismatch {
                offset: self.offset,
                expected: "integer",
            }
            .into()),
        }
    }

    /// Returns the value as a float.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::TypeMismatch`] for integer values.
    pub fn double_value(&self) -> Result<f64> {
        match self.value {
            RollupValue::Float(v) => Ok(v),
            RollupValue::Integer(_) => Err(ReadError::TypeMismatch {
                offset: self.offset,
                expected: "float",
            }
            .into()),
        }
    }

    /// Returns the value widened to `f64`, whatever its type.
    pub fn to_double(&self) -> f64 {
        self.value.to_f64()
    }

    /// Number of samples behind the value.
    ///
    /// Rows read without a count stream report `1`. Negative counts read as
    /// `0` and float counts are truncated.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // saturating float cast
    pub fn value_count(&self) -> u64 {
        match self.count {
            None => 1,
            Some(RollupValue::Integer(v)) => u64::try_from(v).unwrap_or(0),
            Some(RollupValue::Float(v)) => v as u64,
        }
    }
}

/// Read positions into both streams.
///
/// Indices are byte positions just past the last consumed cell.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    qual_index: usize,
    value_index: usize,
    count_qual_index: usize,
    count_value_index: usize,
    current: Option<RollupDataPoint>,
    skipped: u64,
    /// Qualifier positions below these marks were already counted as skipped.
    value_skip_mark: usize,
    count_skip_mark: usize,
}

impl Cursor {
    /// Skips cells until both streams sit on the same offset or one runs out.
    fn sync(&mut self, data: &RowData) {
        let Some(counts) = &data.counts else {
            return;
        };

        while let (Some(value_q), Some(count_q)) = (
            data.values.qualifier_at(self.qual_index),
            counts.qualifier_at(self.count_qual_index),
        ) {
            if value_q.offset() == count_q.offset() {
                return;
            }

            let (at, mark) = if value_q.offset() > count_q.offset() {
                (self.count_qual_index, &mut self.count_skip_mark)
            } else {
                (self.qual_index, &mut self.value_skip_mark)
            };
            if at >= *mark {
                *mark = at + QUALIFIER_WIDTH;
                self.skipped += 1;
                tracing::warn!(
                    row = ?data.key,
                    value_offset = value_q.offset(),
                    count_offset = count_q.offset(),
                    "rollup value and count offsets diverge, skipping unpaired cell"
                );
            }

            if value_q.offset() > count_q.offset() {
                self.count_qual_index += QUALIFIER_WIDTH;
                self.count_value_index += count_q.width();
                if self.count_qual_index >= counts.qualifiers.len() {
                    tracing::warn!(row = ?data.key, "ran out of rollup counts");
                }
            } else {
                self.qual_index += QUALIFIER_WIDTH;
                self.value_index += value_q.width();
                if self.qual_index >= data.values.qualifiers.len() {
                    tracing::warn!(row = ?data.key, "ran out of rollup values");
                }
            }
        }
    }

    fn has_next(&mut self, data: &RowData) -> bool {
        self.sync(data);
        let values_left = self.qual_index < data.values.qualifiers.len();
        match &data.counts {
            Some(counts) => values_left && self.count_qual_index < counts.qualifiers.len(),
            None => values_left,
        }
    }

    /// Consumes and decodes the next pair of cells.
    fn advance(&mut self, data: &RowData) -> Option<RollupDataPoint> {
        if !self.has_next(data) {
            return None;
        }
        let q = data.values.qualifier_at(self.qual_index)?;
        let value = decode_at(&data.values, self.value_index, q)?;
        self.qual_index += QUALIFIER_WIDTH;
        self.value_index += q.width();

        let mut count = None;
        if let Some(counts) = &data.counts
            && let Some(cq) = counts.qualifier_at(self.count_qual_index)
        {
            count = decode_at(counts, self.count_value_index, cq);
            self.count_qual_index += QUALIFIER_WIDTH;
            self.count_value_index += cq.width();
        }

        let point = RollupDataPoint {
            timestamp: data.timestamp_of(q.offset()),
            offset: q.offset(),
            value,
            count,
        };
        self.current = Some(point);
        Some(point)
    }

    /// Places the count cursor just past every count cell at or before the
    /// last consumed value offset.
    fn realign_counts(&mut self, data: &RowData) {
        self.count_qual_index = 0;
        self.count_value_index = 0;

        let Some(counts) = &data.counts else {
            return;
        };
        let Some(last) = self
            .qual_index
            .checked_sub(QUALIFIER_WIDTH)
            .and_then(|at| data.values.qualifier_at(at))
        else {
            return;
        };

        while let Some(cq) = counts.qualifier_at(self.count_qual_index) {
            if cq.offset() > last.offset() {
                break;
            }
            self.count_qual_index += QUALIFIER_WIDTH;
            self.count_value_index += cq.width();
        }
    }
}

/// Decodes the value of `qualifier` stored at byte `start`.
fn decode_at(stream: &StreamData, start: usize, qualifier: Qualifier) -> Option<RollupValue> {
    let bytes = stream.values.get(start..start + qualifier.width())?;
    Some(RollupValue::from_checked(bytes, qualifier.is_integer()))
}

/// Cursor over the data points of a [`RollupSeq`].
///
/// Iterators are independent: each holds a handle on the shared row and its
/// own positions.
#[derive(Debug, Clone)]
pub struct RollupIterator {
    seq: RollupSeq,
    cursor: Cursor,
}

impl RollupIterator {
    pub(crate) fn new(seq: RollupSeq) -> Self {
        let mut iter = Self {
            seq,
            cursor: Cursor::default(),
        };
        iter.cursor.sync(iter.seq.data());
        iter
    }

    /// Returns the sequence being read.
    pub fn seq(&self) -> &RollupSeq {
        &self.seq
    }

    /// Returns `true` if another data point is available.
    ///
    /// May skip unpaired cells to line the streams up.
    pub fn has_next(&mut self) -> bool {
        self.cursor.has_next(self.seq.data())
    }

    /// Returns the data point most recently yielded, if any.
    pub fn current(&self) -> Option<RollupDataPoint> {
        self.cursor.current
    }

    /// Repositions the iterator on the first data point at or after
    /// `timestamp`.
    ///
    /// `timestamp` may be in seconds or milliseconds. Seeking past the end
    /// leaves the iterator exhausted.
    pub fn seek(&mut self, timestamp: u64) {
        let data = self.seq.data();
        let target = normalize_timestamp(timestamp, data.resolution);

        self.cursor = Cursor {
            skipped: self.cursor.skipped,
            value_skip_mark: self.cursor.value_skip_mark,
            count_skip_mark: self.cursor.count_skip_mark,
            ..Cursor::default()
        };
        while self.cursor.has_next(data) {
            match data.values.qualifier_at(self.cursor.qual_index) {
                Some(q) if data.timestamp_of(q.offset()) < target => {
                    self.cursor.advance(data);
                }
                _ => break,
            }
        }
        self.cursor.current = None;
    }

    /// Packs the value stream position into a single token.
    ///
    /// The qualifier index sits in the high 32 bits and the value index in
    /// the low 32 bits.
    pub fn save_state(&self) -> u64 {
        ((self.cursor.qual_index as u64) << 32) | (self.cursor.value_index as u64 & 0xFFFF_FFFF)
    }

    /// Restores a position taken by [`save_state`](Self::save_state).
    ///
    /// The count stream position is recomputed from the value position.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::OutOfBounds`] if the token does not describe a
    /// position within this row, or [`ReadError::MisalignedState`] if its
    /// value index disagrees with the widths of the qualifiers before it.
    pub fn restore_state(&mut self, state: u64) -> Result<()> {
        let data = self.seq.data();
        let qual_index = usize::try_from(state >> 32).unwrap_or(usize::MAX);
        let value_index = usize::try_from(state & 0xFFFF_FFFF).unwrap_or(usize::MAX);

        let qual_len = data.values.qualifiers.len();
        if qual_index > qual_len || qual_index % QUALIFIER_WIDTH != 0 {
            return Err(ReadError::OutOfBounds {
                index: qual_index,
                len: qual_len,
            }
            .into());
        }
        let value_len = data.values.values.len();
        if value_index > value_len {
            return Err(ReadError::OutOfBounds {
                index: value_index,
                len: value_len,
            }
            .into());
        }

        let expected: usize = (0..qual_index)
            .step_by(QUALIFIER_WIDTH)
            .filter_map(|at| data.values.qualifier_at(at))
            .map(Qualifier::width)
            .sum();
        if value_index != expected {
            return Err(ReadError::MisalignedState {
                qual_index,
                value_index,
                expected,
            }
            .into());
        }

        self.cursor.qual_index = qual_index;
        self.cursor.value_index = value_index;
        self.cursor.current = None;
        self.cursor.realign_counts(data);
        Ok(())
    }

    /// Returns the timestamp of the next data point without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::OutOfBounds`] if the iterator is exhausted.
    pub fn peek_next_timestamp(&mut self) -> Result<u64> {
        let data = self.seq.data();
        let next = if self.cursor.has_next(data) {
            data.values.qualifier_at(self.cursor.qual_index)
        } else {
            None
        };

        next.map(|q| data.timestamp_of(q.offset())).ok_or_else(|| {
            ReadError::OutOfBounds {
                index: self.cursor.qual_index,
                len: data.values.qualifiers.len(),
            }
            .into()
        })
    }

    /// Number of distinct unpaired cells skipped so far.
    ///
    /// A cell passed over again after a seek or restore is counted once.
    pub fn skipped_entries(&self) -> u64 {
        self.cursor.skipped
    }
}

impl Iterator for RollupIterator {
    type Item = RollupDataPoint;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(self.seq.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::RowAccumulator;
    use crate::codec::{self, rollup_qualifier};
    use crate::column::Column;
    use crate::config::RollupConfig;
    use crate::error::RollseqError;
    use crate::schema::{Aggregator, RollupInterval, RollupQuery};

    const BASE_TIME: u32 = 1_699_999_200;

    fn row_key() -> Vec<u8> {
        let mut key = vec![0, 0, 1];
        key.extend_from_slice(&BASE_TIME.to_be_bytes());
        key
    }

    fn int(id: u8, offset: u16, value: i64) -> Column {
        let bytes = codec::encode_integer(value);
        let q = Qualifier::new(offset, bytes.len(), true).unwrap();
        Column::new(row_key(), rollup_qualifier(id, q), bytes, 1)
    }

    fn build(aggregator: Aggregator, columns: &[Column]) -> RollupSeq {
        let query = RollupQuery::new(aggregator, RollupInterval::parse("1h", "1d").unwrap());
        let mut acc = RowAccumulator::new(&query, &RollupConfig::default()).unwrap();
        for c in columns {
            acc.push_column(c).unwrap();
        }
        acc.freeze().unwrap()
    }

    fn ts(offset: u64) -> u64 {
        (u64::from(BASE_TIME) + offset * 3600) * 1000
    }

    #[test]
    fn test_plain_iteration() {
        let seq = build(Aggregator::Max, &[int(3, 0, -5), int(3, 4, 300)]);
        let points: Vec<_> = seq.iter().collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].long_value().unwrap(), -5);
        assert_eq!(points[0].value_count(), 1);
        assert_eq!(points[1].timestamp(), ts(4));
        assert_eq!(points[1].offset(), 4);
    }

    #[test]
    fn test_divergent_streams_skip_unpaired() {
        let seq = build(
            Aggregator::Avg,
            &[
                int(0, 0, 10),
                int(0, 1, 20),
                int(0, 2, 30),
                int(1, 0, 2),
                int(1, 2, 6),
            ],
        );
        let mut iter = seq.iter();
        let first = iter.next().unwrap();
        assert_eq!((first.offset(), first.value_count()), (0, 2));
        let second = iter.next().unwrap();
        assert_eq!((second.offset(), second.long_value().unwrap()), (2, 30));
        assert_eq!(second.value_count(), 6);
        assert!(iter.next().is_none());
        assert_eq!(iter.skipped_entries(), 1);
    }

    #[test]
    fn test_trailing_counts_are_skipped() {
        let seq = build(
            Aggregator::Avg,
            &[int(0, 0, 10), int(1, 0, 1), int(1, 1, 1), int(1, 2, 1)],
        );
        let mut iter = seq.iter();
        assert!(iter.next().is_some());
        assert!(!iter.has_next());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_current_tracks_last_yielded() {
        let seq = build(Aggregator::Sum, &[int(0, 0, 1), int(0, 1, 2)]);
        let mut iter = seq.iter();
        assert!(iter.current().is_none());
        let dp = iter.next().unwrap();
        assert_eq!(iter.current(), Some(dp));
    }

    #[test]
    fn test_current_survives_sync_skips() {
        // Offset 1 has no count, so has_next() steps over it.
        let seq = build(
            Aggregator::Avg,
            &[int(0, 0, 10), int(0, 1, 2000), int(0, 2, 30), int(1, 0, 1), int(1, 2, 3)],
        );
        let mut iter = seq.iter();
        let first = iter.next().unwrap();
        assert!(iter.has_next());
        assert_eq!(iter.current(), Some(first));
        assert_eq!(iter.current().unwrap().long_value().unwrap(), 10);
    }

    #[test]
    fn test_seek_accepts_seconds_and_millis() {
        let seq = build(Aggregator::Sum, &[int(0, 0, 1), int(0, 2, 2), int(0, 5, 3)]);
        let mut iter = seq.iter();

        iter.seek(u64::from(BASE_TIME) + 3600);
        assert_eq!(iter.peek_next_timestamp().unwrap(), ts(2));
        assert!(iter.current().is_none());

        iter.seek(ts(5));
        assert_eq!(iter.next().unwrap().long_value().unwrap(), 3);

        iter.seek(ts(6));
        assert!(!iter.has_next());
        assert!(matches!(
            iter.peek_next_timestamp(),
            Err(RollseqError::Read(ReadError::OutOfBounds { .. }))
        ));
    }

    #[test]
    fn test_restore_rejects_bad_tokens() {
        let seq = build(Aggregator::Sum, &[int(0, 0, 1)]);
        let mut iter = seq.iter();
        assert!(iter.restore_state(1 << 32).is_err());
        assert!(iter.restore_state(4 << 32).is_err());
        assert!(iter.restore_state((2 << 32) | 9).is_err());
        assert!(iter.restore_state((2 << 32) | 1).is_ok());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_restore_rejects_misaligned_value_index() {
        let seq = build(Aggregator::Sum, &[int(0, 0, 1), int(0, 1, 1000)]);
        let mut iter = seq.iter();
        assert!(matches!(
            iter.restore_state(2 << 32),
            Err(RollseqError::Read(ReadError::MisalignedState {
                qual_index: 2,
                value_index: 0,
                expected: 1,
            }))
        ));
        assert!(matches!(
            iter.restore_state((4 << 32) | 2),
            Err(RollseqError::Read(ReadError::MisalignedState { expected: 3, .. }))
        ));

        iter.restore_state((2 << 32) | 1).unwrap();
        assert_eq!(iter.next().unwrap().long_value().unwrap(), 1000);
        iter.restore_state((4 << 32) | 3).unwrap();
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_seek_counts_each_unpaired_cell_once() {
        let seq = build(
            Aggregator::Avg,
            &[int(0, 1, 10), int(0, 2, 20), int(1, 0, 1), int(1, 1, 2), int(1, 2, 4)],
        );
        let mut iter = seq.iter();
        iter.seek(u64::from(BASE_TIME));
        let points: Vec<_> = iter.by_ref().collect();
        assert_eq!(points.len(), 2);
        assert_eq!(iter.skipped_entries(), 1);

        iter.seek(ts(0));
        assert_eq!(iter.by_ref().count(), 2);
        assert_eq!(iter.skipped_entries(), 1);
    }

    #[test]
    fn test_restore_counts_each_unpaired_cell_once() {
        let seq = build(
            Aggregator::Avg,
            &[int(0, 1, 10), int(0, 2, 20), int(1, 0, 1), int(1, 1, 2), int(1, 2, 4)],
        );
        let mut iter = seq.iter();
        let start = iter.save_state();
        assert_eq!(iter.next().unwrap().offset(), 1);
        let state = iter.save_state();
        assert_eq!(iter.by_ref().count(), 1);

        iter.restore_state(state).unwrap();
        assert_eq!(iter.next().unwrap().offset(), 2);
        iter.restore_state(start).unwrap();
        assert_eq!(iter.by_ref().count(), 2);
        assert_eq!(iter.skipped_entries(), 1);
    }

    #[test]
    fn test_restore_realigns_counts() {
        let seq = build(
            Aggregator::Avg,
            &[
                int(0, 0, 10),
                int(0, 1, 20),
                int(0, 3, 40),
                int(1, 0, 1),
                int(1, 2, 300),
                int(1, 3, 4),
            ],
        );
        let mut iter = seq.iter();
        iter.next().unwrap();
        let state = iter.save_state();
        let rest: Vec<_> = iter.by_ref().collect();
        assert_eq!(rest.len(), 1);

        let mut other = seq.iter();
        other.restore_state(state).unwrap();
        let replay: Vec<_> = other.collect();
        assert_eq!(replay, rest);
        assert_eq!(replay[0].value_count(), 4);
    }

    #[test]
    fn test_type_accessors() {
        let q = Qualifier::new(0, 8, false).unwrap();
        let float = Column::new(row_key(), rollup_qualifier(0, q), codec::encode_float(1.5), 1);
        let seq = build(Aggregator::Sum, &[float]);
        let dp = seq.iter().next().unwrap();

        assert!(!dp.is_integer());
        assert_eq!(dp.double_value().unwrap(), 1.5);
        assert_eq!(dp.to_double(), 1.5);
        assert!(matches!(
            dp.long_value(),
            Err(RollseqError::Read(ReadError::TypeMismatch {
                offset: 0,
                expected: "integer"
            }))
        ));
    }

    #[test]
    fn test_negative_count_reads_as_zero() {
        let seq = build(Aggregator::Avg, &[int(0, 0, 10), int(1, 0, -3)]);
        assert_eq!(seq.iter().next().unwrap().value_count(), 0);
    }
}
