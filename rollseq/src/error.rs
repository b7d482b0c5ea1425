//! Error types for the rollseq rollup decoder.

use std::fmt;

use thiserror::Error;

/// The main error type for all rollseq operations.
///
/// Every failure is raised synchronously at the point of decode or append.
/// Nothing is retried internally; re-fetching a malformed row is up to the
/// caller that drives the scan.
#[derive(Error, Debug)]
pub enum RollseqError {
    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error decoding or encoding a qualifier or value.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Error while feeding columns into a row accumulator.
    #[error("append error: {0}")]
    Append(#[from] AppendError),

    /// Error while reading from a frozen sequence or iterator.
    #[error("read error: {0}")]
    Read(#[from] ReadError),
}

/// Which of the two parallel streams a column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// The primary aggregate stream (the requested aggregator, or `sum`).
    Value,
    /// The sample count stream, present for `avg` and `dev`.
    Count,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str("value"),
            Self::Count => f.write_str("count"),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to load config from '{path}': {source}")]
    Load {
        /// The config file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for this schema.
    #[error("failed to parse config from '{path}': {source}")]
    Parse {
        /// The config file path.
        path: String,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to save config to '{path}': {source}")]
    Save {
        /// The config file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// The underlying JSON serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// No id is configured for an aggregator.
    #[error("no rollup id configured for aggregator '{name}'")]
    UnknownAggregator {
        /// The aggregator name that could not be resolved.
        name: String,
    },

    /// Two aggregators share the same id.
    #[error("rollup id {id} is assigned to both '{first}' and '{second}'")]
    DuplicateAggregatorId {
        /// The shared id.
        id: u8,
        /// First aggregator using the id.
        first: String,
        /// Second aggregator using the id.
        second: String,
    },

    /// A rollup interval is unusable.
    #[error("invalid rollup interval: {reason}")]
    InvalidInterval {
        /// Why the interval was rejected.
        reason: String,
    },

    /// The row key layout is unusable.
    #[error("invalid row key layout: {reason}")]
    InvalidKeyLayout {
        /// Why the layout was rejected.
        reason: String,
    },
}

/// Errors raised while decoding or encoding qualifiers and values.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remain than the field needs.
    #[error("truncated field: need {needed} bytes at {at}, buffer has {len}")]
    Truncated {
        /// Position the read started at.
        at: usize,
        /// Bytes the field needs.
        needed: usize,
        /// Total buffer length.
        len: usize,
    },

    /// The width is not representable for the value type.
    #[error("invalid {kind} value width {width}")]
    InvalidValueWidth {
        /// The rejected width in bytes.
        width: usize,
        /// `"integer"` or `"float"`.
        kind: &'static str,
    },

    /// The value bytes do not match the width the qualifier declares.
    #[error("value is {actual} bytes but qualifier declares {expected}")]
    ValueLengthMismatch {
        /// Width from the qualifier.
        expected: usize,
        /// Actual value length.
        actual: usize,
    },

    /// The offset does not fit in the 12-bit offset field.
    #[error("offset {offset} exceeds the maximum encodable offset {max}")]
    OffsetOverflow {
        /// The rejected offset.
        offset: u32,
        /// The largest encodable offset.
        max: u16,
    },

    /// An integer does not fit the requested width.
    #[error("integer {value} does not fit in {width} bytes")]
    IntegerOverflow {
        /// The value being encoded.
        value: i64,
        /// The requested width.
        width: usize,
    },
}

/// Errors raised while appending columns to a row accumulator.
#[derive(Error, Debug)]
pub enum AppendError {
    /// `set_first_column` was called on an already established row.
    #[error("row was already set")]
    RowAlreadySet,

    /// A column was added before the row was established.
    #[error("row was never set")]
    RowNotInitialized,

    /// A column's key differs from the established row key.
    #[error("column key {actual:?} does not belong to row {expected:?}")]
    RowKeyMismatch {
        /// The established row key.
        expected: Vec<u8>,
        /// The offending column key.
        actual: Vec<u8>,
    },

    /// The row key is too short for the configured layout.
    #[error("row key is {len} bytes, layout needs at least {needed}")]
    MalformedRowKey {
        /// Actual key length.
        len: usize,
        /// Minimum key length for the layout.
        needed: usize,
    },

    /// The qualifier matches no known aggregator id or legacy prefix.
    #[error("column qualifier {qualifier:?} is not from aggregator {expected}")]
    UnrecognizedAggregator {
        /// The qualifier that could not be classified.
        qualifier: Vec<u8>,
        /// Description of the accepted aggregators.
        expected: String,
    },

    /// Offsets went backwards, or repeated with duplicate fixing disabled.
    #[error("{stream} offset {offset} is <= the last offset {last}")]
    OutOfOrderOffset {
        /// The stream the column was routed to.
        stream: Stream,
        /// The incoming offset.
        offset: u16,
        /// The last accepted offset.
        last: u16,
    },
}

/// Errors raised while reading decoded data points.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReadError {
    /// A typed accessor was used on a value of the other type.
    #[error("value at offset {offset} is not a {expected}")]
    TypeMismatch {
        /// Offset of the data point.
        offset: u16,
        /// The type the caller asked for.
        expected: &'static str,
    },

    /// A position past the end of the data was requested.
    #[error("index {index} is out of bounds (len {len})")]
    OutOfBounds {
        /// The requested index.
        index: usize,
        /// The number of available entries.
        len: usize,
    },

    /// A saved position whose value index does not match its qualifier index.
    #[error("value index {value_index} does not match qualifier index {qual_index} (expected {expected})")]
    MisalignedState {
        /// Qualifier byte position from the token.
        qual_index: usize,
        /// Value byte position from the token.
        value_index: usize,
        /// Value byte position implied by the qualifiers.
        expected: usize,
    },
}

/// Type alias for `Result<T, RollseqError>`.
pub type Result<T> = std::result::Result<T, RollseqError>;
