// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mesh endpoints

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use dork_core::{AgentManifest, AgentRuntimeKind, DeniedAgent};
use dork_mesh::{Discovery, ListFilter, ManifestPatch, RegisterOverrides};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/agents", get(list).post(register))
        .route("/api/agents/{id}", axum::routing::patch(update).delete(unregister))
        .route("/api/agents/resolve", post(resolve))
        .route("/api/agents/discover", post(discover))
        .route("/api/agents/deny", post(deny))
        .route("/api/agents/allow", post(allow))
        .route("/api/agents/denied", get(list_denied))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    runtime: Option<String>,
    capability: Option<String>,
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AgentManifest>>, ApiError> {
    let runtime = match query.runtime.as_deref() {
        Some(raw) => Some(parse_runtime(raw)?),
        None => None,
    };
    let filter = ListFilter { runtime, capability: query.capability };
    Ok(Json(state.mesh()?.list(&filter)?))
}

fn parse_runtime(raw: &str) -> Result<AgentRuntimeKind, ApiError> {
    serde_json::from_value(json!(raw))
        .map_err(|_| ApiError::invalid_input(format!("unknown runtime {raw:?}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    path: PathBuf,
    #[serde(default)]
    registered_by: Option<String>,
    #[serde(flatten)]
    overrides: RegisterOverrides,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<AgentManifest>, ApiError> {
    let manifest = state.mesh()?.register(
        &body.path,
        body.overrides,
        body.registered_by,
        state.now_ms(),
    )?;
    Ok(Json(manifest))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ManifestPatch>,
) -> Result<Json<AgentManifest>, ApiError> {
    Ok(Json(state.mesh()?.update(&id, patch)?))
}

async fn unregister(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.mesh()?.unregister(&id)?;
    Ok(Json(json!({ "removed": id })))
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    paths: Vec<PathBuf>,
}

async fn resolve(
    State(state): State<AppState>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agents: BTreeMap<PathBuf, Option<AgentManifest>> = state.mesh()?.resolve(&body.paths);
    Ok(Json(json!({ "agents": agents })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverBody {
    #[serde(default)]
    roots: Option<Vec<PathBuf>>,
    #[serde(default)]
    max_depth: Option<u32>,
}

async fn discover(
    State(state): State<AppState>,
    Json(body): Json<DiscoverBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.mesh()?;
    let config = state.config();
    let roots = body.roots.unwrap_or_else(|| config.mesh.scan_roots.clone());
    let max_depth = body.max_depth.unwrap_or(config.mesh.max_depth);
    let candidates = Discovery::new().discover(&roots, max_depth);
    Ok(Json(json!({ "candidates": candidates })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DenyBody {
    path: PathBuf,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    denied_by: Option<String>,
}

async fn deny(
    State(state): State<AppState>,
    Json(body): Json<DenyBody>,
) -> Result<Json<DeniedAgent>, ApiError> {
    let entry = state
        .mesh()?
        .deny(&body.path, body.reason, body.denied_by, state.now_ms())?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
struct AllowBody {
    path: PathBuf,
}

async fn allow(
    State(state): State<AppState>,
    Json(body): Json<AllowBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.mesh()?.allow(&body.path)?;
    Ok(Json(json!({ "removed": removed })))
}

async fn list_denied(
    State(state): State<AppState>,
) -> Result<Json<Vec<DeniedAgent>>, ApiError> {
    Ok(Json(state.mesh()?.list_denied()?))
}
