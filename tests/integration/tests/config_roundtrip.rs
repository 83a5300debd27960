//! Config save/load roundtrip integration tests.
//!
//! These tests verify that configuration can be serialized, written to disk,
//! and loaded back with identical field values.

use execbox_core::config::{Config, LimitMode, LogFormat};
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("execbox.json5");

    let config = Config::default();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(
        loaded.execution.default_timeout_secs,
        config.execution.default_timeout_secs
    );
    assert_eq!(loaded.limits.strategy, config.limits.strategy);
    assert_eq!(loaded.worker.blocked_env, config.worker.blocked_env);
    assert_eq!(loaded.retention.window_secs, config.retention.window_secs);
}

#[test]
fn test_config_modify_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("execbox.json5");

    let mut config = Config::default();
    config.execution.max_timeout_secs = 60;
    config.limits.strategy = LimitMode::Off;
    config.precheck.blocked_imports = vec!["socket".to_string()];
    config.logging.format = LogFormat::Json;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.execution.max_timeout_secs, 60);
    assert_eq!(loaded.limits.strategy, LimitMode::Off);
    assert_eq!(loaded.precheck.blocked_imports, vec!["socket".to_string()]);
    assert_eq!(loaded.logging.format, LogFormat::Json);
}

#[test]
fn test_config_save_leaves_no_temp_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("execbox.json5");
    Config::default().save(&path).unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_config_load_nonexistent() {
    let result = Config::load(Path::new("/nonexistent/execbox.json5"));
    assert!(result.is_err());
}

#[test]
fn test_config_parse_invalid() {
    let result = Config::parse("not valid json");
    assert!(result.is_err());
}

#[test]
fn test_configured_blocklist_reaches_precheck() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("execbox.json5");
    std::fs::write(&path, "{ precheck: { blocked_imports: ['socket'] } }").unwrap();

    let config = Config::load(&path).unwrap();
    let precheck = execbox_sandbox::Precheck::from_config(&config.precheck).unwrap();
    assert!(precheck.check("import socket").is_err());
    assert!(precheck.check("import subprocess").is_err());
    assert!(precheck.check("import json").is_ok());
}
