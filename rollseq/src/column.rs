//! Column cells as handed over by a scan.

use serde::{Deserialize, Serialize};

/// One cell of a rollup row, as read from the column store.
///
/// Byte fields serialize as JSON arrays of numbers so dumps can be fed to
/// the CLI without an extra encoding layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Full row key, including any salt prefix.
    pub row_key: Vec<u8>,
    /// Qualifier in current (`[id][field]`) or legacy (`"sum:"[field]`) form.
    pub qualifier: Vec<u8>,
    /// Packed big-endian value.
    pub value: Vec<u8>,
    /// Store write timestamp of the cell, used to settle duplicates.
    pub timestamp: u64,
}

impl Column {
    /// Creates a column.
    pub fn new(
        row_key: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        timestamp: u64,
    ) -> Self {
        Self {
            row_key: row_key.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            timestamp,
        }
    }
}
