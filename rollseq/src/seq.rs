//! Frozen rollup rows.
//!
//! [`RollupSeq`] is the read-only result of accumulating one row. The packed
//! buffers sit behind an [`Arc`], so cloning a sequence is cheap and any
//! number of [`RollupIterator`]s, on any number of threads, can read it at
//! once. Each iterator owns its own cursor.

use std::fmt;
use std::sync::Arc;

use crate::codec::{self, QUALIFIER_WIDTH, Qualifier};
use crate::error::{ReadError, Result, RollseqError};
use crate::iterator::{RollupDataPoint, RollupIterator};
use crate::row_key::RowKey;
use crate::schema::{RollupInterval, TimestampResolution};

/// Packed qualifiers and values of one stream.
#[derive(Debug, Default, Clone)]
pub(crate) struct StreamData {
    pub(crate) qualifiers: Vec<u8>,
    pub(crate) values: Vec<u8>,
}

impl StreamData {
    pub(crate) fn with_capacity(qualifiers: usize, values: usize) -> Self {
        Self {
            qualifiers: Vec::with_capacity(qualifiers),
            values: Vec::with_capacity(values),
        }
    }

    /// Number of cells in the stream.
    pub(crate) fn entries(&self) -> usize {
        self.qualifiers.len() / QUALIFIER_WIDTH
    }

    /// Qualifier at byte position `at`, if one is stored there.
    pub(crate) fn qualifier_at(&self, at: usize) -> Option<Qualifier> {
        Qualifier::from_bytes(&self.qualifiers, at).ok()
    }

    pub(crate) fn push(&mut self, qualifier: Qualifier, value: &[u8]) {
        grow(&mut self.qualifiers, QUALIFIER_WIDTH);
        grow(&mut self.values, value.len());
        self.qualifiers.extend_from_slice(&qualifier.to_bytes());
        self.values.extend_from_slice(value);
    }

    /// Drops the last cell, value bytes included.
    pub(crate) fn pop(&mut self) {
        let Some(at) = self.qualifiers.len().checked_sub(QUALIFIER_WIDTH) else {
            return;
        };
        if let Some(last) = self.qualifier_at(at) {
            self.qualifiers.truncate(at);
            let len = self.values.len().saturating_sub(last.width());
            self.values.truncate(len);
        }
    }
}

/// Doubles the capacity of `buf` whenever `additional` bytes do not fit.
fn grow(buf: &mut Vec<u8>, additional: usize) {
    let needed = buf.len() + additional;
    if needed > buf.capacity() {
        let target = (buf.capacity() * 2).max(needed);
        buf.reserve_exact(target - buf.len());
    }
}

/// Everything a frozen row needs for reading.
#[derive(Debug)]
pub(crate) struct RowData {
    pub(crate) key: RowKey,
    pub(crate) base_time: u64,
    pub(crate) interval: RollupInterval,
    pub(crate) resolution: TimestampResolution,
    pub(crate) values: StreamData,
    pub(crate) counts: Option<StreamData>,
}

impl RowData {
    pub(crate) fn timestamp_of(&self, offset: u16) -> u64 {
        codec::timestamp_of(self.base_time, &self.interval, offset, self.resolution)
    }
}

/// A decoded rollup row, shared read-only between iterators.
#[derive(Debug, Clone)]
pub struct RollupSeq {
    inner: Arc<RowData>,
}

impl RollupSeq {
    pub(crate) fn new(data: RowData) -> Self {
        Self {
            inner: Arc::new(data),
        }
    }

    pub(crate) fn data(&self) -> &RowData {
        &self.inner
    }

    /// Returns a new iterator positioned before the first data point.
    pub fn iter(&self) -> RollupIterator {
        RollupIterator::new(self.clone())
    }

    /// Returns the number of data points.
    ///
    /// Without a count stream this is the number of value cells. With one,
    /// only offsets present in both streams count, so the row is walked.
    pub fn size(&self) -> usize {
        if self.inner.counts.is_some() {
            self.iter().count()
        } else {
            self.inner.values.entries()
        }
    }

    /// Rollup rows hold no raw-resolution points.
    pub fn aggregated_size(&self) -> usize {
        0
    }

    /// Returns the timestamp of the `i`th data point.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::OutOfBounds`] if `i >= self.size()`.
    pub fn timestamp(&self, i: usize) -> Result<u64> {
        if self.inner.counts.is_some() {
            return self
                .iter()
                .nth(i)
                .map(|dp| dp.timestamp())
                .ok_or_else(|| self.out_of_bounds(i));
        }

        self.inner
            .values
            .qualifier_at(i.saturating_mul(QUALIFIER_WIDTH))
            .map(|q| self.inner.timestamp_of(q.offset()))
            .ok_or_else(|| self.out_of_bounds(i))
    }

    fn out_of_bounds(&self, index: usize) -> RollseqError {
        ReadError::OutOfBounds {
            index,
            len: self.size(),
        }
        .into()
    }

    /// Returns the row key.
    pub fn key(&self) -> &RowKey {
        &self.inner.key
    }

    /// Returns the row's base time in Unix seconds.
    pub fn base_time(&self) -> u64 {
        self.inner.base_time
    }

    /// Returns the metric UID from the row key.
    pub fn metric_uid(&self) -> &[u8] {
        self.inner.key.metric_uid()
    }

    /// Returns the `(tagk, tagv)` UID pairs from the row key.
    pub fn tag_uids(&self) -> Vec<(&[u8], &[u8])> {
        self.inner.key.tag_uids()
    }

    /// Returns `true` if values are paired with a count stream.
    pub fn need_count(&self) -> bool {
        self.inner.counts.is_some()
    }

    /// Returns the rollup interval of the row.
    pub fn interval(&self) -> &RollupInterval {
        &self.inner.interval
    }

    /// Returns the resolution timestamps are reported in.
    pub fn resolution(&self) -> TimestampResolution {
        self.inner.resolution
    }
}

impl IntoIterator for &RollupSeq {
    type Item = RollupDataPoint;
    type IntoIter = RollupIterator;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for RollupSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data();
        write!(
            f,
            "RollupSeq(key={:?}, base_time={}, interval={}s, values={}",
            data.key.as_bytes(),
            data.base_time,
            data.interval.interval_secs(),
            data.values.entries()
        )?;
        if let Some(counts) = &data.counts {
            write!(f, ", counts={}", counts.entries())?;
        }
        f.write_str(")")
    }
}
