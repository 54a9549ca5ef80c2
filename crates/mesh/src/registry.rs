// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registration, denial, and resolution
//!
//! The registry index (which directories are registered) and the deny-list
//! persist as JSON files under the data dir; manifests live in the agent
//! directories themselves. Every lookup re-verifies the manifest file on
//! disk, so `list` never returns an agent whose manifest was deleted out
//! from under us.

use crate::error::MeshError;
use crate::manifest_store::{canonicalize_lossy, ManifestStore};
use dork_core::{AgentId, AgentManifest, AgentRuntimeKind, DeniedAgent};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "registry.json";
const DENIED_FILE: &str = "denied.json";

/// Optional fields merged into a fresh manifest at registration. Flattened
/// into request bodies, so unknown fields pass through rather than erroring.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOverrides {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub runtime: Option<AgentRuntimeKind>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Option<BTreeSet<String>>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub persona_enabled: Option<bool>,
}

/// Partial manifest update. `id` and `directory` are present so an attempt
/// to change them can be rejected explicitly rather than silently dropped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManifestPatch {
    #[serde(default)]
    pub id: Option<AgentId>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub runtime: Option<AgentRuntimeKind>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Option<BTreeSet<String>>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub persona_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub runtime: Option<AgentRuntimeKind>,
    pub capability: Option<String>,
}

pub struct MeshRegistry {
    store: ManifestStore,
    data_dir: PathBuf,
    boundary: PathBuf,
    // Serializes index/deny-list file rewrites.
    io_lock: Mutex<()>,
}

impl MeshRegistry {
    pub fn new(data_dir: PathBuf, boundary: PathBuf) -> Self {
        Self {
            store: ManifestStore::new(),
            data_dir,
            boundary: canonicalize_lossy(&boundary),
            io_lock: Mutex::new(()),
        }
    }

    pub fn boundary(&self) -> &Path {
        &self.boundary
    }

    /// All registered manifests, verified against disk. Index entries whose
    /// manifest vanished are pruned as a side effect.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<AgentManifest>, MeshError> {
        let dirs = self.load_index()?;
        let mut manifests = Vec::new();
        let mut live = Vec::new();
        for dir in &dirs {
            match self.store.read(dir) {
                Ok(Some(m)) => {
                    live.push(dir.clone());
                    manifests.push(m);
                }
                Ok(None) => {
                    tracing::debug!(dir = %dir.display(), "pruning stale registry entry");
                }
                Err(MeshError::InvalidManifest(e)) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping invalid manifest");
                    live.push(dir.clone());
                }
                Err(e) => return Err(e),
            }
        }
        if live.len() != dirs.len() {
            let _guard = self.io_lock.lock();
            self.save_index(&live)?;
        }

        manifests.retain(|m| {
            filter.runtime.is_none_or(|r| m.runtime == r)
                && filter
                    .capability
                    .as_ref()
                    .is_none_or(|c| m.capabilities.contains(c))
        });
        Ok(manifests)
    }

    /// Batch lookup: input path → manifest-or-null. Paths that fail to
    /// resolve or hold no manifest map to `None`.
    pub fn resolve(&self, paths: &[PathBuf]) -> BTreeMap<PathBuf, Option<AgentManifest>> {
        let mut out = BTreeMap::new();
        for path in paths {
            let canonical = canonicalize_lossy(path);
            let manifest = self.store.read(&canonical).ok().flatten();
            out.insert(path.clone(), manifest);
        }
        out
    }

    /// Look up a registered agent by id.
    pub fn find_by_id(&self, id: &str) -> Result<Option<AgentManifest>, MeshError> {
        for dir in self.load_index()? {
            if let Some(m) = self.store.read(&dir)? {
                if m.id == id {
                    return Ok(Some(m));
                }
            }
        }
        Ok(None)
    }

    /// Register a directory as an agent: creates `.dork/agent.json`, assigns
    /// a fresh id, records who registered it.
    pub fn register(
        &self,
        path: &Path,
        overrides: RegisterOverrides,
        approver: Option<String>,
        now_ms: u64,
    ) -> Result<AgentManifest, MeshError> {
        let dir = std::fs::canonicalize(path)?;
        if !dir.starts_with(&self.boundary) {
            return Err(MeshError::OutOfBoundary(dir));
        }
        if let Some(denied) = self.find_denied(&dir)? {
            return Err(MeshError::Denied { path: dir, reason: denied.reason });
        }
        if ManifestStore::exists(&dir) {
            return Err(MeshError::AlreadyRegistered(dir));
        }

        let name = overrides
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| dir_name(&dir));
        let manifest = AgentManifest {
            id: AgentId::new(),
            name,
            directory: dir.clone(),
            runtime: overrides.runtime.unwrap_or_else(|| infer_runtime(&dir)),
            description: overrides.description.unwrap_or_default(),
            capabilities: overrides.capabilities.unwrap_or_default(),
            color: overrides.color,
            icon: overrides.icon,
            persona: overrides.persona.unwrap_or_default(),
            persona_enabled: overrides.persona_enabled.unwrap_or(true),
            registered_at: now_ms,
            registered_by: approver,
            extra: Default::default(),
        };
        self.store.write(&dir, &manifest)?;

        let _guard = self.io_lock.lock();
        let mut index = self.load_index()?;
        if !index.contains(&dir) {
            index.push(dir);
            self.save_index(&index)?;
        }
        Ok(manifest)
    }

    /// Remove an agent by id: delete the manifest file and index entry.
    pub fn unregister(&self, id: &str) -> Result<(), MeshError> {
        let manifest = self
            .find_by_id(id)?
            .ok_or_else(|| MeshError::NotFound(id.to_string()))?;
        self.store.remove(&manifest.directory)?;
        let _guard = self.io_lock.lock();
        let mut index = self.load_index()?;
        index.retain(|d| d != &manifest.directory);
        self.save_index(&index)
    }

    /// Partial update. `id` and `directory` are never mutable.
    pub fn update(&self, id: &str, patch: ManifestPatch) -> Result<AgentManifest, MeshError> {
        if patch.id.is_some() {
            return Err(MeshError::ImmutableField("id"));
        }
        if patch.directory.is_some() {
            return Err(MeshError::ImmutableField("directory"));
        }
        let mut manifest = self
            .find_by_id(id)?
            .ok_or_else(|| MeshError::NotFound(id.to_string()))?;

        if let Some(name) = patch.name {
            manifest.name = name;
        }
        if let Some(runtime) = patch.runtime {
            manifest.runtime = runtime;
        }
        if let Some(description) = patch.description {
            manifest.description = description;
        }
        if let Some(capabilities) = patch.capabilities {
            manifest.capabilities = capabilities;
        }
        if let Some(color) = patch.color {
            manifest.color = Some(color);
        }
        if let Some(icon) = patch.icon {
            manifest.icon = Some(icon);
        }
        if let Some(persona) = patch.persona {
            manifest.persona = persona;
        }
        if let Some(enabled) = patch.persona_enabled {
            manifest.persona_enabled = enabled;
        }
        self.store.write(&manifest.directory, &manifest)?;
        Ok(manifest)
    }

    /// Bar a directory from registration until `allow` is called.
    pub fn deny(
        &self,
        path: &Path,
        reason: Option<String>,
        denier: Option<String>,
        now_ms: u64,
    ) -> Result<DeniedAgent, MeshError> {
        let dir = canonicalize_lossy(path);
        let entry = DeniedAgent {
            directory: dir.clone(),
            reason,
            denied_by: denier,
            denied_at: now_ms,
        };
        let _guard = self.io_lock.lock();
        let mut denied = self.load_denied()?;
        denied.retain(|d| d.directory != dir);
        denied.push(entry.clone());
        self.save_denied(&denied)?;
        Ok(entry)
    }

    /// Lift a denial.
    pub fn allow(&self, path: &Path) -> Result<bool, MeshError> {
        let dir = canonicalize_lossy(path);
        let _guard = self.io_lock.lock();
        let mut denied = self.load_denied()?;
        let before = denied.len();
        denied.retain(|d| d.directory != dir);
        let removed = denied.len() != before;
        if removed {
            self.save_denied(&denied)?;
        }
        Ok(removed)
    }

    pub fn list_denied(&self) -> Result<Vec<DeniedAgent>, MeshError> {
        self.load_denied()
    }

    fn find_denied(&self, dir: &Path) -> Result<Option<DeniedAgent>, MeshError> {
        Ok(self.load_denied()?.into_iter().find(|d| d.directory == dir))
    }

    fn load_index(&self) -> Result<Vec<PathBuf>, MeshError> {
        read_json_list(&self.data_dir.join(INDEX_FILE))
    }

    fn save_index(&self, index: &[PathBuf]) -> Result<(), MeshError> {
        write_json_list(&self.data_dir.join(INDEX_FILE), index)
    }

    fn load_denied(&self) -> Result<Vec<DeniedAgent>, MeshError> {
        read_json_list(&self.data_dir.join(DENIED_FILE))
    }

    fn save_denied(&self, denied: &[DeniedAgent]) -> Result<(), MeshError> {
        write_json_list(&self.data_dir.join(DENIED_FILE), denied)
    }
}

pub(crate) fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "agent".to_string())
}

pub(crate) fn infer_runtime(dir: &Path) -> AgentRuntimeKind {
    if dir.join(".claude").is_dir() {
        AgentRuntimeKind::ClaudeCode
    } else if dir.join(".cursor").is_dir() {
        AgentRuntimeKind::Cursor
    } else {
        AgentRuntimeKind::Generic
    }
}

fn read_json_list<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, MeshError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map_err(|e| MeshError::InvalidManifest(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_json_list<T: serde::Serialize>(path: &Path, list: &[T]) -> Result<(), MeshError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(list)
        .map_err(|e| MeshError::InvalidManifest(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
