// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration surface
//!
//! One TOML file owns every tunable. Subsystems receive their slice of this
//! struct at construction; nothing reads environment variables directly.
//! Field names accept both snake_case (native) and the camelCase spellings
//! used by external tooling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            // tracing has no fatal level; map it to error.
            Self::Fatal | Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

crate::simple_display! {
    LogLevel {
        Fatal => "fatal",
        Error => "error",
        Warn => "warn",
        Info => "info",
        Debug => "debug",
        Trace => "trace",
    }
}

fn default_port() -> u16 {
    4242
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_runs() -> u32 {
    8
}

fn default_retention_count() -> u32 {
    50
}

fn default_max_hops() -> u32 {
    8
}

fn default_ttl_ms() -> u64 {
    300_000
}

fn default_call_budget() -> u32 {
    10
}

fn default_max_depth() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub enabled: bool,
    #[serde(alias = "maxConcurrentRuns")]
    pub max_concurrent_runs: u32,
    #[serde(alias = "retentionCount")]
    pub retention_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_concurrent_runs: default_max_concurrent_runs(),
            retention_count: default_retention_count(),
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    #[serde(alias = "defaultMaxHops")]
    pub default_max_hops: u32,
    #[serde(alias = "defaultTtlMs")]
    pub default_ttl_ms: u64,
    #[serde(alias = "defaultCallBudget")]
    pub default_call_budget: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            default_max_hops: default_max_hops(),
            default_ttl_ms: default_ttl_ms(),
            default_call_budget: default_call_budget(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub enabled: bool,
    #[serde(alias = "scanRoots")]
    pub scan_roots: Vec<PathBuf>,
    #[serde(alias = "maxDepth")]
    pub max_depth: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self { enabled: default_true(), scan_roots: Vec::new(), max_depth: default_max_depth() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Program spawned per session by the process-backed runtime.
    pub command: String,
    pub args: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { command: "claude".to_string(), args: Vec::new() }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DorkConfig {
    pub port: u16,
    /// Filesystem root for safety; all directory operations must resolve
    /// inside. Defaults to the user's home directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary: Option<PathBuf>,
    #[serde(alias = "defaultCwd", skip_serializing_if = "Option::is_none")]
    pub default_cwd: Option<PathBuf>,
    #[serde(alias = "logLevel")]
    pub log_level: LogLevel,
    pub pulse: PulseConfig,
    pub relay: RelayConfig,
    pub mesh: MeshConfig,
    pub runtime: RuntimeConfig,
    /// Reserved for the external tunnel helper; parsed, never consumed here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<toml::Value>,
}

impl Default for DorkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            boundary: None,
            default_cwd: None,
            log_level: LogLevel::default(),
            pulse: PulseConfig::default(),
            relay: RelayConfig::default(),
            mesh: MeshConfig::default(),
            runtime: RuntimeConfig::default(),
            tunnel: None,
        }
    }
}

impl DorkConfig {
    pub fn features(&self) -> Features {
        Features {
            pulse: self.pulse.enabled,
            relay: self.relay.enabled,
            mesh: self.mesh.enabled,
        }
    }
}

/// Feature flags owned by the config loader; the gateway reads these,
/// subsystems never consult env vars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Features {
    pub pulse: bool,
    pub relay: bool,
    pub mesh: bool,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
