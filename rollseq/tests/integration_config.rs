//! Integration tests for loading and saving reader configuration.

use std::fs;

use rollseq::error::{ConfigError, RollseqError};
use rollseq::{Aggregator, RollupConfig, TimestampResolution};
use tempfile::tempdir;

#[test]
fn test_save_then_load() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("rollup.json");

    let mut config = RollupConfig {
        fix_duplicates: true,
        resolution: TimestampResolution::Seconds,
        ..RollupConfig::default()
    };
    config.aggregator_ids.insert("avg".to_string(), 9);
    config.key_layout.salt_width = 2;
    config.save(&path).unwrap();

    let loaded = RollupConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.id_for(Aggregator::Avg).unwrap(), 9);
}

#[test]
fn test_load_hand_written_file() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("rollup.json");
    fs::write(
        &path,
        r#"{
            "aggregator_ids": { "sum": 16, "count": 17 },
            "resolution": "seconds"
        }"#,
    )
    .unwrap();

    let config = RollupConfig::load(&path).unwrap();
    assert_eq!(config.id_for(Aggregator::Sum).unwrap(), 16);
    assert!(config.id_for(Aggregator::Min).is_err());
    assert_eq!(config.resolution, TimestampResolution::Seconds);
    assert!(!config.fix_duplicates);
}

#[test]
fn test_load_errors() {
    let temp_dir = tempdir().unwrap();

    let missing = temp_dir.path().join("missing.json");
    assert!(matches!(
        RollupConfig::load(&missing),
        Err(RollseqError::Config(ConfigError::Load { .. }))
    ));

    let garbage = temp_dir.path().join("garbage.json");
    fs::write(&garbage, "{ not json").unwrap();
    assert!(matches!(
        RollupConfig::load(&garbage),
        Err(RollseqError::Config(ConfigError::Parse { .. }))
    ));

    let duplicate = temp_dir.path().join("duplicate.json");
    fs::write(&duplicate, r#"{ "aggregator_ids": { "sum": 1, "count": 1 } }"#).unwrap();
    assert!(matches!(
        RollupConfig::load(&duplicate),
        Err(RollseqError::Config(ConfigError::DuplicateAggregatorId { id: 1, .. }))
    ));

    let bad_layout = temp_dir.path().join("layout.json");
    fs::write(&bad_layout, r#"{ "key_layout": { "tagv_width": 0 } }"#).unwrap();
    assert!(matches!(
        RollupConfig::load(&bad_layout),
        Err(RollseqError::Config(ConfigError::InvalidKeyLayout { .. }))
    ));
}
