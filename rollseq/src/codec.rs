//! Qualifier, value, and timestamp codec for rollup cells.
//!
//! Every rollup cell carries a qualifier naming its aggregator and position
//! and a packed big-endian value. This module contains the stateless
//! functions that read and write both.
//!
//! # Qualifier Format
//!
//! ```text
//! current:  [aggregator id: 1 byte][offset/flags: 2 bytes]
//! legacy:   ["sum:" | "count:" | "<agg>:"][offset/flags: 2 bytes]
//!
//! offset/flags (big-endian u16):
//!   bits 15..4  offset (bucket index within the row)
//!   bit  3      float flag
//!   bits 2..0   value width - 1
//! ```
//!
//! Only the 2-byte offset/flags field is kept once a cell is accepted; the
//! aggregator byte or legacy prefix is consumed by classification.
//!
//! # Values
//!
//! Integers are two's complement of 1 to 8 bytes and are sign-extended on
//! read. Floats are IEEE-754 of 4 or 8 bytes.

use std::fmt;

use crate::error::{CodecError, Result};
use crate::schema::{RollupInterval, TimestampResolution};

/// Number of flag bits below the offset.
pub const FLAG_BITS: u16 = 4;

/// Flag bit marking a floating point value.
pub const FLAG_FLOAT: u16 = 0x8;

/// Mask over the value width field (width - 1).
pub const LENGTH_MASK: u16 = 0x7;

/// Mask over all flag bits.
pub const FLAGS_MASK: u16 = 0xF;

/// Mask applied to the first qualifier byte to extract the aggregator id.
pub const AGGREGATOR_MASK: u8 = 0xFF;

/// Width in bytes of the stored offset/flags field.
pub const QUALIFIER_WIDTH: usize = 2;

/// Largest offset the 12-bit offset field can hold.
pub const MAX_OFFSET: u16 = 0x0FFF;

/// Timestamps with any of these bits set are in milliseconds.
pub const SECOND_MASK: u64 = 0xFFFF_FFFF_0000_0000;

/// A decoded 2-byte offset/flags field.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qualifier {
    raw: u16,
}

impl Qualifier {
    /// Builds a qualifier for a value of the given width and type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::OffsetOverflow`] if `offset` exceeds
    /// [`MAX_OFFSET`], and [`CodecError::InvalidValueWidth`] for integer
    /// widths outside `1..=8` or float widths other than 4 and 8.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rollseq::codec::Qualifier;
    ///
    /// let q = Qualifier::new(12, 8, false).unwrap();
    /// assert_eq!(q.offset(), 12);
    /// assert_eq!(q.width(), 8);
    /// assert!(!q.is_integer());
    /// ```
    pub fn new(offset: u16, width: usize, is_integer: bool) -> Result<Self> {
        if offset > MAX_OFFSET {
            return Err(CodecError::OffsetOverflow {
                offset: u32::from(offset),
                max: MAX_OFFSET,
            }
            .into());
        }
        check_width(width, is_integer)?;

        #[allow(clippy::cast_possible_truncation)] // width is 1..=8
        let mut flags = (width - 1) as u16;
        if !is_integer {
            flags |= FLAG_FLOAT;
        }
        Ok(Self {
            raw: (offset << FLAG_BITS) | flags,
        })
    }

    /// Wraps a raw big-endian field value.
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    /// Reads the 2-byte field starting at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] if fewer than two bytes remain.
    pub fn from_bytes(bytes: &[u8], at: usize) -> Result<Self> {
        match bytes.get(at..at.saturating_add(QUALIFIER_WIDTH)) {
            Some(&[hi, lo]) => Ok(Self::from_raw(u16::from_be_bytes([hi, lo]))),
            _ => Err(CodecError::Truncated {
                at,
                needed: QUALIFIER_WIDTH,
                len: bytes.len(),
            }
            .into()),
        }
    }

    /// Returns the raw field value.
    pub fn raw(self) -> u16 {
        self.raw
    }

    /// Returns the big-endian encoding of the field.
    pub fn to_bytes(self) -> [u8; QUALIFIER_WIDTH] {
        self.raw.to_be_bytes()
    }

    /// Returns the bucket index within the row.
    pub fn offset(self) -> u16 {
        self.raw >> FLAG_BITS
    }

    /// Returns the flag nibble.
    #[allow(clippy::cast_possible_truncation)] // masked to 4 bits
    pub fn flags(self) -> u8 {
        (self.raw & FLAGS_MASK) as u8
    }

    /// Returns the value width in bytes (1 to 8).
    pub fn width(self) -> usize {
        usize::from(self.raw & LENGTH_MASK) + 1
    }

    /// Returns `true` if the value is an integer.
    pub fn is_integer(self) -> bool {
        self.raw & FLAG_FLOAT == 0
    }

    /// Checks that `value` is a well-formed payload for this qualifier.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ValueLengthMismatch`] if the lengths differ and
    /// [`CodecError::InvalidValueWidth`] for float widths other than 4 and 8.
    pub fn check_value(self, value: &[u8]) -> Result<()> {
        if value.len() != self.width() {
            return Err(CodecError::ValueLengthMismatch {
                expected: self.width(),
                actual: value.len(),
            }
            .into());
        }
        check_width(self.width(), self.is_integer())
    }
}

impl fmt::Debug for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qualifier")
            .field("offset", &self.offset())
            .field("width", &self.width())
            .field("integer", &self.is_integer())
            .finish()
    }
}

/// A decoded cell value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RollupValue {
    /// Signed integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
}

impl RollupValue {
    /// Decodes `bytes` according to `qualifier`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload does not match the qualifier.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rollseq::codec::{Qualifier, RollupValue};
    ///
    /// let q = Qualifier::new(0, 2, true).unwrap();
    /// let value = RollupValue::decode(&[0xFF, 0x38], q).unwrap();
    /// assert_eq!(value, RollupValue::Integer(-200));
    /// ```
    pub fn decode(bytes: &[u8], qualifier: Qualifier) -> Result<Self> {
        qualifier.check_value(bytes)?;
        Ok(Self::from_checked(bytes, qualifier.is_integer()))
    }

    /// Decodes a payload whose width was already checked against its qualifier.
    #[allow(clippy::cast_possible_truncation)] // f32 payloads occupy the low 32 bits
    pub(crate) fn from_checked(bytes: &[u8], is_integer: bool) -> Self {
        let width = bytes.len().min(8);
        if width == 0 {
            return Self::Integer(0);
        }

        let mut buf = [0u8; 8];
        buf[8 - width..].copy_from_slice(&bytes[..width]);
        let raw = u64::from_be_bytes(buf);

        if is_integer {
            // Shift the sign bit to bit 63, then shift back arithmetically.
            let shift = 64 - 8 * width as u32;
            Self::Integer(((raw << shift) as i64) >> shift)
        } else if width == 4 {
            Self::Float(f64::from(f32::from_bits(raw as u32)))
        } else {
            Self::Float(f64::from_bits(raw))
        }
    }

    /// Returns `true` for integer values.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Integer(_))
    }

    /// Returns the value widened to `f64`.
    #[allow(clippy::cast_precision_loss)] // Same widening the query layer applies
    pub fn to_f64(self) -> f64 {
        match self {
            Self::Integer(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

impl fmt::Display for RollupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Reads the qualifier stored at `at`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if fewer than two bytes remain.
pub fn decode_qualifier(bytes: &[u8], at: usize) -> Result<Qualifier> {
    Qualifier::from_bytes(bytes, at)
}

/// Returns the value width declared by the qualifier stored at `at`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if fewer than two bytes remain.
pub fn value_width(bytes: &[u8], at: usize) -> Result<usize> {
    Ok(Qualifier::from_bytes(bytes, at)?.width())
}

/// Computes the absolute timestamp of bucket `offset` in a row.
///
/// `base_time` is the row's base time in Unix seconds, as stored in the row
/// key. The result is expressed in `resolution`.
///
/// # Examples
///
/// ```rust
/// use rollseq::codec::timestamp_of;
/// use rollseq::schema::{RollupInterval, TimestampResolution};
///
/// let hourly = RollupInterval::parse("1h", "1d").unwrap();
/// let ts = timestamp_of(1_700_000_000, &hourly, 2, TimestampResolution::Seconds);
/// assert_eq!(ts, 1_700_000_000 + 2 * 3600);
/// ```
pub fn timestamp_of(
    base_time: u64,
    interval: &RollupInterval,
    offset: u16,
    resolution: TimestampResolution,
) -> u64 {
    let secs = base_time.saturating_add(u64::from(offset).saturating_mul(interval.interval_secs()));
    match resolution {
        TimestampResolution::Seconds => secs,
        TimestampResolution::Milliseconds => secs.saturating_mul(1000),
    }
}

/// Converts a caller-supplied timestamp to `resolution`.
///
/// Timestamps without any bit in [`SECOND_MASK`] are taken as seconds,
/// everything else as milliseconds. Milliseconds round up to the next whole
/// second so the result never falls before the requested instant.
pub fn normalize_timestamp(timestamp: u64, resolution: TimestampResolution) -> u64 {
    let is_seconds = timestamp & SECOND_MASK == 0;
    match (resolution, is_seconds) {
        (TimestampResolution::Milliseconds, true) => timestamp.saturating_mul(1000),
        (TimestampResolution::Seconds, false) => timestamp.div_ceil(1000),
        _ => timestamp,
    }
}

/// Encodes an integer in the smallest of 1, 2, 4 or 8 bytes.
#[allow(clippy::cast_possible_truncation)] // each branch checks the range first
pub fn encode_integer(value: i64) -> Vec<u8> {
    if i64::from(value as i8) == value {
        vec![value as i8 as u8]
    } else if i64::from(value as i16) == value {
        (value as i16).to_be_bytes().to_vec()
    } else if i64::from(value as i32) == value {
        (value as i32).to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

/// Encodes an integer in exactly `width` bytes.
///
/// # Errors
///
/// Returns [`CodecError::InvalidValueWidth`] for widths outside `1..=8` and
/// [`CodecError::IntegerOverflow`] if `value` does not fit.
pub fn encode_integer_with_width(value: i64, width: usize) -> Result<Vec<u8>> {
    check_width(width, true)?;
    if width < 8 {
        let bits = 8 * width;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if value < min || value > max {
            return Err(CodecError::IntegerOverflow { value, width }.into());
        }
    }
    Ok(value.to_be_bytes()[8 - width..].to_vec())
}

/// Encodes a double precision float (8 bytes).
pub fn encode_float(value: f64) -> [u8; 8] {
    value.to_bits().to_be_bytes()
}

/// Encodes a single precision float (4 bytes).
pub fn encode_f32(value: f32) -> [u8; 4] {
    value.to_bits().to_be_bytes()
}

/// Builds a current-format qualifier: aggregator id followed by the field.
pub fn rollup_qualifier(aggregator_id: u8, qualifier: Qualifier) -> [u8; 3] {
    let [hi, lo] = qualifier.to_bytes();
    [aggregator_id & AGGREGATOR_MASK, hi, lo]
}

/// Builds a legacy qualifier: `"<aggregator>:"` followed by the field.
///
/// # Examples
///
/// ```rust
/// use rollseq::codec::{legacy_qualifier, Qualifier};
///
/// let q = Qualifier::new(1, 1, true).unwrap();
/// assert_eq!(legacy_qualifier("sum", q), b"sum:\x00\x10".to_vec());
/// ```
pub fn legacy_qualifier(aggregator: &str, qualifier: Qualifier) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(aggregator.len() + 1 + QUALIFIER_WIDTH);
    bytes.extend_from_slice(aggregator.as_bytes());
    bytes.push(b':');
    bytes.extend_from_slice(&qualifier.to_bytes());
    bytes
}

fn check_width(width: usize, is_integer: bool) -> Result<()> {
    let ok = if is_integer {
        (1..=8).contains(&width)
    } else {
        width == 4 || width == 8
    };
    if ok {
        Ok(())
    } else {
        Err(CodecError::InvalidValueWidth {
            width,
            kind: if is_integer { "integer" } else { "float" },
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RollseqError;

    #[test]
    fn test_qualifier_fields() {
        // offset 5, float, 8 bytes: 0x005F
        let q = Qualifier::from_bytes(&[0x00, 0x5F], 0).unwrap();
        assert_eq!(q.offset(), 5);
        assert_eq!(q.width(), 8);
        assert!(!q.is_integer());
        assert_eq!(q.flags(), 0xF);

        // offset 4095, integer, 1 byte
        let q = Qualifier::from_bytes(&[0xAA, 0xFF, 0xF0], 1).unwrap();
        assert_eq!(q.offset(), MAX_OFFSET);
        assert_eq!(q.width(), 1);
        assert!(q.is_integer());
    }

    #[test]
    fn test_qualifier_new_matches_decode() {
        let q = Qualifier::new(300, 4, true).unwrap();
        let decoded = decode_qualifier(&q.to_bytes(), 0).unwrap();
        assert_eq!(decoded, q);
        assert_eq!(value_width(&q.to_bytes(), 0).unwrap(), 4);
    }

    #[test]
    fn test_qualifier_rejects_bad_input() {
        assert!(matches!(
            Qualifier::new(MAX_OFFSET + 1, 1, true),
            Err(RollseqError::Codec(CodecError::OffsetOverflow { .. }))
        ));
        assert!(matches!(
            Qualifier::new(0, 2, false),
            Err(RollseqError::Codec(CodecError::InvalidValueWidth { width: 2, .. }))
        ));
        assert!(matches!(
            Qualifier::new(0, 0, true),
            Err(RollseqError::Codec(CodecError::InvalidValueWidth { width: 0, .. }))
        ));
        assert!(matches!(
            decode_qualifier(&[0x01, 0x00], 1),
            Err(RollseqError::Codec(CodecError::Truncated { at: 1, needed: 2, len: 2 }))
        ));
    }

    #[test]
    fn test_integer_widths_round_trip() {
        let cases: [(usize, i64); 8] = [
            (1, -128),
            (2, 32_767),
            (3, -8_388_608),
            (4, 2_147_483_647),
            (5, -549_755_813_888),
            (6, 140_737_488_355_327),
            (7, -36_028_797_018_963_968),
            (8, i64::MIN),
        ];
        for (width, value) in cases {
            let bytes = encode_integer_with_width(value, width).unwrap();
            assert_eq!(bytes.len(), width);
            let q = Qualifier::new(0, width, true).unwrap();
            assert_eq!(
                RollupValue::decode(&bytes, q).unwrap(),
                RollupValue::Integer(value),
                "width {width}"
            );
        }
    }

    #[test]
    fn test_encode_integer_minimal_width() {
        assert_eq!(encode_integer(0).len(), 1);
        assert_eq!(encode_integer(-128).len(), 1);
        assert_eq!(encode_integer(128).len(), 2);
        assert_eq!(encode_integer(70_000).len(), 4);
        assert_eq!(encode_integer(i64::MAX).len(), 8);

        assert!(matches!(
            encode_integer_with_width(128, 1),
            Err(RollseqError::Codec(CodecError::IntegerOverflow { .. }))
        ));
    }

    #[test]
    fn test_float_round_trip() {
        let q8 = Qualifier::new(0, 8, false).unwrap();
        let value = RollupValue::decode(&encode_float(-1234.5678), q8).unwrap();
        assert_eq!(value, RollupValue::Float(-1234.5678));

        let q4 = Qualifier::new(0, 4, false).unwrap();
        let value = RollupValue::decode(&encode_f32(0.25), q4).unwrap();
        assert_eq!(value, RollupValue::Float(0.25));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let q = Qualifier::new(0, 4, true).unwrap();
        assert!(matches!(
            RollupValue::decode(&[0, 1], q),
            Err(RollseqError::Codec(CodecError::ValueLengthMismatch {
                expected: 4,
                actual: 2
            }))
        ));
    }

    #[test]
    fn test_timestamp_of() {
        let interval = RollupInterval::parse("1h", "1d").unwrap();
        let base = 1_699_999_200;
        assert_eq!(
            timestamp_of(base, &interval, 0, TimestampResolution::Milliseconds),
            base * 1000
        );
        assert_eq!(
            timestamp_of(base, &interval, 3, TimestampResolution::Milliseconds),
            (base + 3 * 3600) * 1000
        );
        assert_eq!(
            timestamp_of(base, &interval, 3, TimestampResolution::Seconds),
            base + 3 * 3600
        );
    }

    #[test]
    fn test_normalize_timestamp() {
        let secs = 1_700_000_000u64;
        let ms = secs * 1000;
        assert_eq!(normalize_timestamp(secs, TimestampResolution::Milliseconds), ms);
        assert_eq!(normalize_timestamp(ms, TimestampResolution::Milliseconds), ms);
        assert_eq!(normalize_timestamp(ms, TimestampResolution::Seconds), secs);
        assert_eq!(normalize_timestamp(secs, TimestampResolution::Seconds), secs);
    }

    #[test]
    fn test_normalize_partial_second_rounds_up() {
        let ms = 1_699_999_200_500u64;
        assert_eq!(normalize_timestamp(ms, TimestampResolution::Seconds), 1_699_999_201);
        assert_eq!(normalize_timestamp(ms + 500, TimestampResolution::Seconds), 1_699_999_201);
    }

    #[test]
    fn test_qualifier_builders() {
        let q = Qualifier::new(2, 8, false).unwrap();
        assert_eq!(rollup_qualifier(7, q), [7, 0x00, 0x2F]);
        assert_eq!(legacy_qualifier("count", q), b"count:\x00\x2F".to_vec());
    }
}
