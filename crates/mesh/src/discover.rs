// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem discovery of agent candidates
//!
//! Walks scan roots up to a depth limit and emits directories that look
//! like projects, with heuristic hints. Non-authoritative: nothing is
//! registered until `register` is called on a candidate.

use crate::manifest_store::ManifestStore;
use crate::registry::{dir_name, infer_runtime};
use dork_core::AgentRuntimeKind;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Directory names never descended into.
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    "coverage",
    "__pycache__",
    ".cache",
];

/// Files or directories that mark a directory as a project candidate.
const PROJECT_MARKERS: &[&str] = &[".git", "package.json", "Cargo.toml", "pyproject.toml"];

/// A candidate directory with heuristic hints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredAgent {
    pub path: PathBuf,
    pub suggested_name: String,
    pub inferred_runtime: AgentRuntimeKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// True when the directory already carries a manifest.
    pub registered: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Discovery;

impl Discovery {
    pub fn new() -> Self {
        Self
    }

    /// Walk each root up to `max_depth` levels below it.
    pub fn discover(&self, roots: &[PathBuf], max_depth: u32) -> Vec<DiscoveredAgent> {
        let mut found = Vec::new();
        for root in roots {
            let Ok(root) = std::fs::canonicalize(root) else {
                tracing::debug!(root = %root.display(), "skipping unreadable scan root");
                continue;
            };
            walk(&root, 0, max_depth, &mut found);
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        found
    }
}

fn walk(dir: &Path, depth: u32, max_depth: u32, found: &mut Vec<DiscoveredAgent>) {
    if let Some(candidate) = inspect(dir) {
        found.push(candidate);
    }
    if depth >= max_depth {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref()) {
            continue;
        }
        walk(&path, depth + 1, max_depth, found);
    }
}

fn inspect(dir: &Path) -> Option<DiscoveredAgent> {
    let registered = ManifestStore::exists(dir);
    let is_project = PROJECT_MARKERS.iter().any(|m| dir.join(m).exists());
    if !registered && !is_project {
        return None;
    }
    Some(DiscoveredAgent {
        path: dir.to_path_buf(),
        suggested_name: dir_name(dir),
        inferred_runtime: infer_runtime(dir),
        description: read_description(dir),
        registered,
    })
}

/// Best-effort one-liner from package metadata.
fn read_description(dir: &Path) -> String {
    let Ok(raw) = std::fs::read_to_string(dir.join("package.json")) else {
        return String::new();
    };
    serde_json::from_str::<serde_json::Value>(&raw)
        .ok()
        .and_then(|v| v.get("description")?.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "discover_tests.rs"]
mod tests;
