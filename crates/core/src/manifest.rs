// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent manifests
//!
//! The per-directory identity record of a registered agent, stored at
//! `<directory>/.dork/agent.json`. The manifest tolerates unknown fields so
//! newer writers stay readable by older binaries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

crate::define_id! {
    /// Unique identifier for a registered agent. Immutable after creation.
    pub struct AgentId("agt-");
}

/// Maximum length of the persona block, in characters.
pub const MAX_PERSONA_LEN: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("manifest name is empty")]
    EmptyName,
    #[error("manifest directory {0:?} is not absolute")]
    RelativeDirectory(PathBuf),
    #[error("persona exceeds {MAX_PERSONA_LEN} characters ({0})")]
    PersonaTooLong(usize),
}

/// Which assistant runtime drives sessions in this directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRuntimeKind {
    #[default]
    ClaudeCode,
    Cursor,
    Generic,
}

crate::simple_display! {
    AgentRuntimeKind {
        ClaudeCode => "claude-code",
        Cursor => "cursor",
        Generic => "generic",
    }
}

fn default_persona_enabled() -> bool {
    true
}

/// The per-directory identity record of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentManifest {
    pub id: AgentId,
    pub name: String,
    /// Absolute, canonicalized path; primary key for the registry.
    pub directory: PathBuf,
    #[serde(default)]
    pub runtime: AgentRuntimeKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub persona: String,
    #[serde(default = "default_persona_enabled")]
    pub persona_enabled: bool,
    pub registered_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_by: Option<String>,
    /// Unknown fields from newer writers, preserved across a round trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentManifest {
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::EmptyName);
        }
        if !self.directory.is_absolute() {
            return Err(ManifestError::RelativeDirectory(self.directory.clone()));
        }
        let persona_len = self.persona.chars().count();
        if persona_len > MAX_PERSONA_LEN {
            return Err(ManifestError::PersonaTooLong(persona_len));
        }
        Ok(())
    }
}

/// A directory barred from registration until explicitly allowed again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeniedAgent {
    pub directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<String>,
    pub denied_at: u64,
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
