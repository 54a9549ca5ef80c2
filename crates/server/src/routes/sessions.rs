// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session endpoints: drive the runtime port directly over SSE

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum::{Json, Router};
use dork_core::{EventStream, PermissionMode, SendOptions, SessionOptions, StreamEvent};
use futures_util::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/sessions/{id}/messages", post(send_message))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    content: String,
    #[serde(default)]
    permission_mode: Option<PermissionMode>,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

/// Stream the session's events as SSE, one event per `StreamEvent`, named
/// by its wire tag (`text_delta`, `tool_call`, …).
async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let runtime = state.runtime();
    let permission_mode = body.permission_mode.unwrap_or_default();
    let cwd = body.cwd.or_else(|| state.config().default_cwd.clone());

    runtime
        .ensure_session(
            &id,
            SessionOptions { permission_mode, cwd: cwd.clone(), has_started: false },
        )
        .await?;
    let stream = runtime
        .send_message(
            &id,
            &body.content,
            SendOptions {
                permission_mode: Some(permission_mode),
                cwd,
                system_prompt_append: None,
            },
        )
        .await?;

    let sse = futures_util::stream::unfold(Some(stream), |stream| async move {
        let mut stream: EventStream = stream?;
        let event = stream.next().await?;
        let done = event.is_terminal();
        let sse_event = stream_event_to_sse(&event)?;
        Some((
            Ok::<_, Infallible>(sse_event),
            if done { None } else { Some(stream) },
        ))
    });
    Ok(Sse::new(sse).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn stream_event_to_sse(event: &StreamEvent) -> Option<Event> {
    let value = match serde_json::to_value(event) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "stream event serialization failed");
            return None;
        }
    };
    let name = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("event")
        .to_string();
    match Event::default().event(name).json_data(&value) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "sse event serialization failed");
            None
        }
    }
}
