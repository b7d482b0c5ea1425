//! Reader configuration.
//!
//! [`RollupConfig`] holds the settings that come from the surrounding
//! deployment rather than from an individual query: the aggregator id table
//! the rollup writer used, the row key layout, the duplicate-fix flag, and
//! the resolution timestamps are reported in.
//!
//! Configuration is plain JSON:
//!
//! ```json
//! {
//!   "aggregator_ids": { "sum": 0, "count": 1, "min": 2, "max": 3 },
//!   "key_layout": { "salt_width": 1, "metric_width": 3, "tagk_width": 3, "tagv_width": 3 },
//!   "fix_duplicates": true,
//!   "resolution": "milliseconds"
//! }
//! ```
//!
//! Every field is optional and falls back to [`RollupConfig::default`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::row_key::RowKeyLayout;
use crate::schema::{Aggregator, TimestampResolution};

/// Deployment-level settings for reading rollup rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    /// Aggregator name to the id stored in the first qualifier byte.
    pub aggregator_ids: BTreeMap<String, u8>,

    /// Layout of the row keys being read.
    pub key_layout: RowKeyLayout,

    /// Whether a repeated offset replaces the stored cell instead of failing.
    pub fix_duplicates: bool,

    /// Resolution of reported timestamps.
    pub resolution: TimestampResolution,
}

impl Default for RollupConfig {
    fn default() -> Self {
        let aggregator_ids = [
            (Aggregator::Sum, 0),
            (Aggregator::Count, 1),
            (Aggregator::Min, 2),
            (Aggregator::Max, 3),
        ]
        .into_iter()
        .map(|(agg, id)| (agg.name().to_string(), id))
        .collect();

        Self {
            aggregator_ids,
            key_layout: RowKeyLayout::default(),
            fix_duplicates: false,
            resolution: TimestampResolution::default(),
        }
    }
}

impl RollupConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid JSON for this type, and any
    /// error from [`RollupConfig::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: RollupConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded rollup config");
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] or [`ConfigError::Save`] if the
    /// configuration cannot be encoded or written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize { source: e })?;
        fs::write(path, content).map_err(|e| ConfigError::Save {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateAggregatorId`] if two aggregators
    /// share an id, or [`ConfigError::InvalidKeyLayout`] for a bad layout.
    pub fn validate(&self) -> Result<()> {
        let mut seen: BTreeMap<u8, &str> = BTreeMap::new();
        for (name, &id) in &self.aggregator_ids {
            if let Some(first) = seen.insert(id, name) {
                return Err(ConfigError::DuplicateAggregatorId {
                    id,
                    first: first.to_string(),
                    second: name.clone(),
                }
                .into());
            }
        }

        self.key_layout.validate()
    }

    /// Returns the id the rollup writer used for `aggregator`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownAggregator`] if none is configured.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rollseq::config::RollupConfig;
    /// use rollseq::schema::Aggregator;
    ///
    /// let config = RollupConfig::default();
    /// assert_eq!(config.id_for(Aggregator::Count).unwrap(), 1);
    /// assert!(config.id_for(Aggregator::Avg).is_err());
    /// ```
    pub fn id_for(&self, aggregator: Aggregator) -> Result<u8> {
        self.aggregator_ids
            .get(aggregator.name())
            .copied()
            .ok_or_else(|| {
                ConfigError::UnknownAggregator {
                    name: aggregator.name().to_string(),
                }
                .into()
            })
    }
}
