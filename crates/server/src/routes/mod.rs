// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Route table and cross-cutting middleware

mod agents;
mod pulse;
mod relay;
mod sessions;

use crate::config_io;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::time::Instant;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/config", get(get_config).patch(patch_config))
        .merge(agents::router())
        .merge(pulse::router())
        .merge(relay::router())
        .merge(sessions::router())
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Request log line: method, path, status, elapsed. Never bodies or headers.
async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    tracing::debug!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime": state.uptime_secs(),
        "features": state.features(),
    }))
}

async fn get_config(State(state): State<AppState>) -> Json<dork_core::DorkConfig> {
    Json(state.config())
}

async fn patch_config(
    State(state): State<AppState>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<dork_core::DorkConfig>, ApiError> {
    let merged = config_io::patch_config(&state.config(), &patch)
        .map_err(ApiError::invalid_input)?;
    config_io::save_config(state.config_path(), &merged)
        .map_err(|e| ApiError::new(dork_core::ErrorCode::IoError, e.to_string()))?;
    state.set_config(merged.clone());
    Ok(Json(merged))
}
