// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manifest file I/O
//!
//! Pure persistence for `<dir>/.dork/agent.json`. Writes are atomic
//! (tmp file + rename); directory paths are canonicalized before use.

use crate::error::MeshError;
use dork_core::AgentManifest;
use std::path::{Component, Path, PathBuf};

pub const DORK_DIR: &str = ".dork";
pub const MANIFEST_FILE: &str = "agent.json";

#[derive(Debug, Clone, Default)]
pub struct ManifestStore;

impl ManifestStore {
    pub fn new() -> Self {
        Self
    }

    pub fn manifest_path(dir: &Path) -> PathBuf {
        dir.join(DORK_DIR).join(MANIFEST_FILE)
    }

    /// Read and validate the manifest for a directory, or `None` if the
    /// directory has none.
    pub fn read(&self, dir: &Path) -> Result<Option<AgentManifest>, MeshError> {
        let path = Self::manifest_path(dir);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: AgentManifest = serde_json::from_str(&raw)
            .map_err(|e| MeshError::InvalidManifest(e.to_string()))?;
        manifest.validate().map_err(|e| MeshError::InvalidManifest(e.to_string()))?;
        Ok(Some(manifest))
    }

    /// Atomically rewrite the manifest for a directory.
    pub fn write(&self, dir: &Path, manifest: &AgentManifest) -> Result<(), MeshError> {
        manifest.validate().map_err(|e| MeshError::InvalidManifest(e.to_string()))?;
        let path = Self::manifest_path(dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| MeshError::InvalidManifest(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Delete the manifest file, pruning `.dork` if that leaves it empty.
    pub fn remove(&self, dir: &Path) -> Result<(), MeshError> {
        let path = Self::manifest_path(dir);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let dork_dir = dir.join(DORK_DIR);
        if let Ok(mut entries) = std::fs::read_dir(&dork_dir) {
            if entries.next().is_none() {
                let _ = std::fs::remove_dir(&dork_dir);
            }
        }
        Ok(())
    }

    pub fn exists(dir: &Path) -> bool {
        Self::manifest_path(dir).is_file()
    }
}

/// Resolve symlinks and strip trailing slashes. Falls back to a lexically
/// cleaned absolute path when the target does not exist (deny-list entries
/// may outlive their directories).
pub(crate) fn canonicalize_lossy(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| clean_path(path))
}

fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
#[path = "manifest_store_tests.rs"]
mod tests;
