// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn mkdirs(root: &Path, rel: &str) -> PathBuf {
    let dir = root.join(rel);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn finds_project_directories() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let a = mkdirs(&root, "a");
    std::fs::write(a.join("Cargo.toml"), "[package]").unwrap();
    let b = mkdirs(&root, "nested/b");
    std::fs::write(b.join("package.json"), r#"{"description":"a web app"}"#).unwrap();
    mkdirs(&root, "plain"); // no marker, not a candidate

    let found = Discovery::new().discover(&[root.clone()], 3);
    let paths: Vec<_> = found.iter().map(|d| d.path.clone()).collect();
    assert_eq!(paths, vec![a.clone(), b.clone()]);

    let b_found = found.iter().find(|d| d.path == b).unwrap();
    assert_eq!(b_found.suggested_name, "b");
    assert_eq!(b_found.description, "a web app");
    assert!(!b_found.registered);
}

#[test]
fn respects_max_depth() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let shallow = mkdirs(&root, "one");
    std::fs::write(shallow.join("Cargo.toml"), "").unwrap();
    let deep = mkdirs(&root, "one/two/three");
    std::fs::write(deep.join("Cargo.toml"), "").unwrap();

    let found = Discovery::new().discover(&[root.clone()], 1);
    let paths: Vec<_> = found.iter().map(|d| d.path.clone()).collect();
    assert_eq!(paths, vec![shallow]);
}

#[test]
fn skips_vendored_and_hidden_directories() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let vendored = mkdirs(&root, "node_modules/pkg");
    std::fs::write(vendored.join("package.json"), "{}").unwrap();
    let hidden = mkdirs(&root, ".cache/proj");
    std::fs::write(hidden.join("Cargo.toml"), "").unwrap();

    let found = Discovery::new().discover(&[root.clone()], 4);
    assert!(found.is_empty());
}

#[test]
fn infers_runtime_from_markers() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let claude = mkdirs(&root, "c");
    std::fs::write(claude.join("Cargo.toml"), "").unwrap();
    mkdirs(&root, "c/.claude");

    let found = Discovery::new().discover(&[root.clone()], 1);
    assert_eq!(found[0].inferred_runtime, AgentRuntimeKind::ClaudeCode);
}

#[test]
fn already_registered_directories_are_flagged() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let dir = mkdirs(&root, "agent");
    std::fs::write(dir.join("Cargo.toml"), "").unwrap();
    std::fs::create_dir_all(dir.join(".dork")).unwrap();
    std::fs::write(
        dir.join(".dork/agent.json"),
        r#"{"id":"agt-x","name":"a","directory":"/tmp/a","registeredAt":1}"#,
    )
    .unwrap();

    let found = Discovery::new().discover(&[root.clone()], 1);
    assert!(found[0].registered);
}

#[test]
fn unreadable_roots_are_skipped() {
    let found = Discovery::new().discover(&["/no/such/root".into()], 2);
    assert!(found.is_empty());
}
