// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config file loading and persistence
//!
//! The config lives at `~/.dork/config.toml` unless `DORK_CONFIG` points
//! elsewhere. A missing file means defaults; a malformed one is fatal.

use dork_core::DorkConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default data directory (`~/.dork`).
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dork")
}

pub fn default_config_path() -> PathBuf {
    match std::env::var_os("DORK_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => data_dir().join("config.toml"),
    }
}

pub fn load_config(path: &Path) -> Result<DorkConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DorkConfig::default()),
        Err(e) => return Err(e.into()),
    };
    toml::from_str(&raw).map_err(|e| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn save_config(path: &Path, config: &DorkConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = toml::to_string_pretty(config).map_err(|e| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Merge a partial JSON patch over the current config. Type mismatches are
/// rejected by the final deserialization; unknown keys are ignored.
pub fn patch_config(
    current: &DorkConfig,
    patch: &serde_json::Value,
) -> Result<DorkConfig, String> {
    let mut merged = serde_json::to_value(current).map_err(|e| e.to_string())?;
    merge_json(&mut merged, patch);
    serde_json::from_value(merged).map_err(|e| e.to_string())
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        merge_json(slot, value);
                    }
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dork_core::LogLevel;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let cfg = load_config(&temp.path().join("config.toml")).unwrap();
        assert_eq!(cfg, DorkConfig::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        let mut cfg = DorkConfig::default();
        cfg.port = 9999;
        cfg.log_level = LogLevel::Debug;
        save_config(&path, &cfg).unwrap();
        assert_eq!(load_config(&path).unwrap(), cfg);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn patch_merges_nested_sections() {
        let cfg = DorkConfig::default();
        let patched = patch_config(
            &cfg,
            &serde_json::json!({
                "port": 8080,
                "pulse": { "max_concurrent_runs": 2 }
            }),
        )
        .unwrap();
        assert_eq!(patched.port, 8080);
        assert_eq!(patched.pulse.max_concurrent_runs, 2);
        // Untouched fields survive the merge.
        assert_eq!(patched.pulse.retention_count, cfg.pulse.retention_count);
        assert!(patched.relay.enabled);
    }

    #[test]
    fn patch_rejects_bad_values() {
        let cfg = DorkConfig::default();
        assert!(patch_config(&cfg, &serde_json::json!({"port": "yes"})).is_err());
    }
}
