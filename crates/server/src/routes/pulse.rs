// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pulse endpoints

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use dork_core::{PulseRun, PulseSchedule, RunId, RunStatus, ScheduleId};
use dork_pulse::parse_cron;
use dork_store::{RunFilter, ScheduleInput, SchedulePatch};
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/pulse/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/api/pulse/schedules/{id}",
            axum::routing::patch(update_schedule).delete(delete_schedule),
        )
        .route("/api/pulse/schedules/{id}/trigger", post(trigger))
        .route("/api/pulse/runs", get(list_runs))
        .route("/api/pulse/runs/{id}", get(get_run))
        .route("/api/pulse/runs/{id}/cancel", post(cancel_run))
}

async fn list_schedules(
    State(state): State<AppState>,
) -> Result<Json<Vec<PulseSchedule>>, ApiError> {
    Ok(Json(state.pulse_store()?.list_schedules()?))
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(input): Json<ScheduleInput>,
) -> Result<Json<PulseSchedule>, ApiError> {
    parse_cron(&input.cron)?;
    if let Some(tz) = &input.timezone {
        dork_pulse::next_fire_ms(&input.cron, Some(tz), state.now_ms())?;
    }
    let schedule = state.pulse_store()?.create_schedule(input, state.now_ms())?;
    if schedule.is_dispatchable() {
        state.scheduler()?.register_schedule(&schedule)?;
    }
    Ok(Json(schedule))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SchedulePatch>,
) -> Result<Json<PulseSchedule>, ApiError> {
    if let Some(cron) = &patch.cron {
        parse_cron(cron)?;
    }
    let id = ScheduleId::from_string(id);
    let schedule = state.pulse_store()?.update_schedule(id, patch, state.now_ms())?;

    // Keep the live cron job in sync with the stored definition.
    let scheduler = state.scheduler()?;
    if schedule.is_dispatchable() {
        scheduler.register_schedule(&schedule)?;
    } else {
        scheduler.unregister_schedule(schedule.id);
    }
    Ok(Json(schedule))
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = ScheduleId::from_string(id);
    state.scheduler()?.unregister_schedule(id);
    state.pulse_store()?.delete_schedule(id)?;
    Ok(Json(json!({ "removed": id })))
}

async fn trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PulseRun>, ApiError> {
    let id = ScheduleId::from_string(id);
    match state.scheduler()?.trigger_manual_run(id).await? {
        Some(run) => Ok(Json(run)),
        None => Err(ApiError::not_found(format!("schedule {id}"))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunsQuery {
    #[serde(default)]
    schedule_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<PulseRun>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            RunStatus::parse(raw)
                .ok_or_else(|| ApiError::invalid_input(format!("unknown status {raw:?}")))?,
        ),
        None => None,
    };
    let filter = RunFilter {
        schedule_id: query.schedule_id.map(ScheduleId::from_string),
        status,
        limit: query.limit,
    };
    Ok(Json(state.pulse_store()?.list_runs(&filter)?))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PulseRun>, ApiError> {
    let id = RunId::from_string(id);
    state
        .pulse_store()?
        .get_run(id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("run {id}")))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = RunId::from_string(id);
    if state.scheduler()?.cancel_run(id) {
        Ok(Json(json!({ "cancelled": id })))
    } else {
        Err(ApiError::new(
            dork_core::ErrorCode::RunNotCancellable,
            format!("run {id} is not active"),
        ))
    }
}
