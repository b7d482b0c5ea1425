//! # rollseq
//!
//! Decoder for pre-aggregated ("rollup") time-series rows.
//!
//! A rollup table stores one row per series and time span. Each column holds
//! one bucket of that span: a qualifier carrying the aggregator, the bucket
//! offset and the value format, plus a packed big-endian value. rollseq turns
//! the columns of one row into a sequence of data points that can be walked,
//! seeked and resumed.
//!
//! Derived statistics (`avg`, `dev`) are read from two streams, the `sum`
//! cells and the `count` cells, which are merged bucket by bucket. Buckets
//! missing from either stream are skipped rather than failing the row.
//!
//! ## Quick Start
//!
//! ```rust
//! use rollseq::{Aggregator, Column, RollupConfig, RollupInterval, RollupQuery, RowAccumulator};
//! use rollseq::codec::{self, Qualifier};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Hourly rollups, one row per day, averaged
//! let query = RollupQuery::new(Aggregator::Avg, RollupInterval::parse("1h", "1d")?);
//! let mut acc = RowAccumulator::new(&query, &RollupConfig::default())?;
//!
//! // [metric uid][base time]
//! let key = [0u8, 0, 1, 0x65, 0x53, 0xF1, 0x00];
//! for (offset, sum, count) in [(0u16, 10i64, 2i64), (1, 20, 4)] {
//!     let q = Qualifier::new(offset, 1, true)?;
//!     // Default ids: sum = 0, count = 1
//!     let sum_cell = Column::new(key, codec::rollup_qualifier(0, q), codec::encode_integer(sum), 1);
//!     let count_cell = Column::new(key, codec::rollup_qualifier(1, q), codec::encode_integer(count), 1);
//!     acc.push_column(&sum_cell)?;
//!     acc.push_column(&count_cell)?;
//! }
//!
//! let seq = acc.freeze()?;
//! for dp in &seq {
//!     println!("{}: {}", dp.timestamp(), dp.to_double() / dp.value_count() as f64);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`RowAccumulator`] - Collects the columns of one row, single-threaded
//! - [`RollupSeq`] - Frozen row, cheap to clone and safe to share
//! - [`RollupIterator`] - Per-reader cursor yielding [`RollupDataPoint`]s
//! - [`RollupConfig`] - Aggregator ids, key layout and duplicate handling
//!
//! ## Modules
//!
//! - [`accumulator`] - Column classification, ordering and duplicate rules
//! - [`seq`] - Shared read-only row
//! - [`iterator`] - Stream merging, seek, save and restore
//! - [`codec`] - Qualifier and value encoding, timestamps
//! - [`row_key`] - Row key layout
//! - [`column`] - Input cells
//! - [`schema`] - Aggregators and rollup intervals
//! - [`config`] - Reader configuration
//! - [`error`] - Error types

pub mod accumulator;
pub mod codec;
pub mod column;
pub mod config;
pub mod error;
pub mod iterator;
pub mod row_key;
pub mod schema;
pub mod seq;

// Re-export primary API types at crate root for convenience.
pub use accumulator::RowAccumulator;
pub use column::Column;
pub use config::RollupConfig;
pub use error::{Result, RollseqError};
pub use iterator::{RollupDataPoint, RollupIterator};
pub use schema::{Aggregator, RollupInterval, RollupQuery, TimestampResolution};
pub use seq::RollupSeq;
