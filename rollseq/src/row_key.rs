//! Row key layout and accessors.
//!
//! A rollup row key is laid out as:
//!
//! ```text
//! [salt][metric uid][base time: u32 BE seconds][tagk uid][tagv uid]...
//! ```
//!
//! This module only slices the key. Turning UIDs into metric and tag names
//! is the job of an external resolver.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppendError, ConfigError, Result};

/// Width of the base time field in bytes.
pub const TIMESTAMP_BYTES: usize = 4;

/// Field widths of a row key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RowKeyLayout {
    /// Width of the salt prefix (0 disables salting).
    pub salt_width: usize,
    /// Width of the metric UID.
    pub metric_width: usize,
    /// Width of each tag key UID.
    pub tagk_width: usize,
    /// Width of each tag value UID.
    pub tagv_width: usize,
}

impl Default for RowKeyLayout {
    fn default() -> Self {
        Self {
            salt_width: 0,
            metric_width: 3,
            tagk_width: 3,
            tagv_width: 3,
        }
    }
}

impl RowKeyLayout {
    /// Validates the layout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidKeyLayout`] if a UID width is zero.
    pub fn validate(&self) -> Result<()> {
        for (field, width) in [
            ("metric_width", self.metric_width),
            ("tagk_width", self.tagk_width),
            ("tagv_width", self.tagv_width),
        ] {
            if width == 0 {
                return Err(ConfigError::InvalidKeyLayout {
                    reason: format!("{field} cannot be zero"),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Position of the base time field.
    pub fn base_time_offset(&self) -> usize {
        self.salt_width + self.metric_width
    }

    /// Shortest key that still carries a base time.
    pub fn min_key_len(&self) -> usize {
        self.base_time_offset() + TIMESTAMP_BYTES
    }
}

/// An established row key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    bytes: Vec<u8>,
    layout: RowKeyLayout,
}

impl RowKey {
    /// Wraps `bytes` after checking it is long enough for `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::MalformedRowKey`] if the key is too short.
    pub fn new(bytes: Vec<u8>, layout: RowKeyLayout) -> Result<Self> {
        let needed = layout.min_key_len();
        if bytes.len() < needed {
            return Err(AppendError::MalformedRowKey {
                len: bytes.len(),
                needed,
            }
            .into());
        }
        Ok(Self { bytes, layout })
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the layout this key was parsed with.
    pub fn layout(&self) -> RowKeyLayout {
        self.layout
    }

    /// Returns the salt prefix.
    pub fn salt(&self) -> &[u8] {
        &self.bytes[..self.layout.salt_width]
    }

    /// Returns the metric UID.
    pub fn metric_uid(&self) -> &[u8] {
        &self.bytes[self.layout.salt_width..self.layout.base_time_offset()]
    }

    /// Returns the row's base time in Unix seconds.
    pub fn base_time(&self) -> u64 {
        let at = self.layout.base_time_offset();
        let mut buf = [0u8; TIMESTAMP_BYTES];
        buf.copy_from_slice(&self.bytes[at..at + TIMESTAMP_BYTES]);
        u64::from(u32::from_be_bytes(buf))
    }

    /// Returns the `(tagk, tagv)` UID pairs. A trailing partial pair is ignored.
    pub fn tag_uids(&self) -> Vec<(&[u8], &[u8])> {
        let pair = self.layout.tagk_width + self.layout.tagv_width;
        if pair == 0 {
            return Vec::new();
        }
        self.bytes[self.layout.min_key_len()..]
            .chunks_exact(pair)
            .map(|chunk| chunk.split_at(self.layout.tagk_width))
            .collect()
    }

    /// Returns `true` if `other` names the same row, ignoring the salt.
    pub fn matches(&self, other: &[u8]) -> bool {
        let salt = self.layout.salt_width;
        other.len() == self.bytes.len() && other[salt..] == self.bytes[salt..]
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKey({:?})", self.bytes)
    }
}
