// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dork_core::{AgentId, AgentRuntimeKind};

fn manifest(dir: &Path) -> AgentManifest {
    AgentManifest {
        id: AgentId::new(),
        name: "tester".into(),
        directory: dir.to_path_buf(),
        runtime: AgentRuntimeKind::Generic,
        description: String::new(),
        capabilities: Default::default(),
        color: None,
        icon: None,
        persona: String::new(),
        persona_enabled: true,
        registered_at: 1,
        registered_by: None,
        extra: Default::default(),
    }
}

#[test]
fn read_missing_returns_none() {
    let temp = tempfile::tempdir().unwrap();
    let store = ManifestStore::new();
    assert!(store.read(temp.path()).unwrap().is_none());
}

#[test]
fn write_then_read_round_trips() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let store = ManifestStore::new();
    let m = manifest(&dir);
    store.write(&dir, &m).unwrap();
    assert_eq!(store.read(&dir).unwrap(), Some(m));
    assert!(ManifestStore::exists(&dir));
}

#[test]
fn write_is_atomic_no_tmp_left_behind() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let store = ManifestStore::new();
    store.write(&dir, &manifest(&dir)).unwrap();
    let dork: Vec<_> = std::fs::read_dir(dir.join(DORK_DIR))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(dork, vec![std::ffi::OsString::from(MANIFEST_FILE)]);
}

#[test]
fn corrupt_json_is_invalid_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path();
    std::fs::create_dir_all(dir.join(DORK_DIR)).unwrap();
    std::fs::write(ManifestStore::manifest_path(dir), "{not json").unwrap();
    let err = ManifestStore::new().read(dir).unwrap_err();
    assert!(matches!(err, MeshError::InvalidManifest(_)));
}

#[test]
fn schema_violation_is_invalid_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path();
    std::fs::create_dir_all(dir.join(DORK_DIR)).unwrap();
    // Name is present but empty, which fails validation.
    std::fs::write(
        ManifestStore::manifest_path(dir),
        r#"{"id":"agt-x","name":"","directory":"/tmp/x","registeredAt":1}"#,
    )
    .unwrap();
    let err = ManifestStore::new().read(dir).unwrap_err();
    assert!(matches!(err, MeshError::InvalidManifest(_)));
}

#[test]
fn remove_deletes_file_and_empty_dork_dir() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let store = ManifestStore::new();
    store.write(&dir, &manifest(&dir)).unwrap();
    store.remove(&dir).unwrap();
    assert!(!ManifestStore::exists(&dir));
    assert!(!dir.join(DORK_DIR).exists());
    // Removing again is a no-op.
    store.remove(&dir).unwrap();
}

#[test]
fn remove_keeps_dork_dir_with_other_files() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let store = ManifestStore::new();
    store.write(&dir, &manifest(&dir)).unwrap();
    std::fs::write(dir.join(DORK_DIR).join("notes.md"), "keep me").unwrap();
    store.remove(&dir).unwrap();
    assert!(dir.join(DORK_DIR).join("notes.md").exists());
}

#[test]
fn canonicalize_lossy_cleans_missing_paths() {
    let cleaned = canonicalize_lossy(Path::new("/definitely/missing/../missing/dir/"));
    assert_eq!(cleaned, Path::new("/definitely/missing/dir"));
}
