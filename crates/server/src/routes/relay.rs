// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay endpoints, including the SSE signal stream

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use dork_core::{
    Budget, MessageId, Payload, RelayEndpoint, SpanStatus, Subject, SubjectPattern, TraceSpan,
};
use dork_relay::{PublishOptions, RelaySignal};
use dork_store::SpanFilter;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/relay/endpoints", get(endpoints))
        .route("/api/relay/messages", get(list_messages).post(publish))
        .route("/api/relay/trace/{message_id}", get(trace))
        .route("/api/relay/metrics", get(metrics))
        .route("/api/relay/stream", get(stream))
}

async fn endpoints(State(state): State<AppState>) -> Result<Json<Vec<RelayEndpoint>>, ApiError> {
    Ok(Json(state.relay()?.list_endpoints()))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    from: Option<String>,
    /// Cursor: `sentAt` of the last span from the previous page.
    #[serde(default)]
    cursor: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<TraceSpan>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            SpanStatus::parse(raw)
                .ok_or_else(|| ApiError::invalid_input(format!("unknown status {raw:?}")))?,
        ),
        None => None,
    };
    let filter = SpanFilter {
        subject: query.subject,
        status,
        from: query.from,
        before_sent_at: query.cursor,
        limit: query.limit,
    };
    Ok(Json(state.trace_store()?.list_spans(&filter)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishBody {
    subject: String,
    payload: Payload,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    budget: Option<Budget>,
}

async fn publish(
    State(state): State<AppState>,
    Json(body): Json<PublishBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let subject = Subject::parse(&body.subject)?;
    let reply_to = body.reply_to.as_deref().map(Subject::parse).transpose()?;
    let receipt = state
        .relay()?
        .publish(
            subject,
            body.payload,
            PublishOptions {
                from: body.from.unwrap_or_else(|| "relay.human.api".to_string()),
                reply_to,
                budget: body.budget,
                message_id: None,
            },
        )
        .await?;
    Ok(Json(json!({
        "messageId": receipt.message_id,
        "deliveredTo": receipt.delivered_to,
    })))
}

async fn trace(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<Vec<TraceSpan>>, ApiError> {
    let id = MessageId::from_string(message_id);
    let spans = state.trace_store()?.get_trace(id)?;
    if spans.is_empty() {
        return Err(ApiError::not_found(format!("trace {id}")));
    }
    Ok(Json(spans))
}

async fn metrics(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let store_metrics = state.trace_store()?.metrics()?;
    let mut combined = serde_json::to_value(&store_metrics)
        .map_err(|e| ApiError::new(dork_core::ErrorCode::InternalError, e.to_string()))?;
    combined["activeEndpoints"] = json!(state.relay()?.list_endpoints().len());
    Ok(Json(combined))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    subject: Option<String>,
}

/// SSE: `relay_message` carries the full envelope, `relay_delivery` the
/// `{ messageId, status }` transition. Heartbeat comments keep idle
/// connections alive.
async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let pattern = match query.subject.as_deref() {
        Some(raw) => SubjectPattern::parse(raw)?,
        None => SubjectPattern::parse(">")?,
    };
    let rx = state.relay()?.signals();
    let stream = futures_util::stream::unfold((rx, pattern), |(mut rx, pattern)| async move {
        loop {
            match rx.recv().await {
                Ok(signal) => {
                    if !pattern.matches(signal.subject()) {
                        continue;
                    }
                    if let Some(event) = signal_event(&signal) {
                        return Some((Ok(event), (rx, pattern)));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "sse consumer lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn signal_event(signal: &RelaySignal) -> Option<Event> {
    let result = match signal {
        RelaySignal::MessagePublished(envelope) => {
            Event::default().event("relay_message").json_data(envelope)
        }
        RelaySignal::MessageDelivered { message_id, status, .. }
        | RelaySignal::MessageFailed { message_id, status, .. } => Event::default()
            .event("relay_delivery")
            .json_data(json!({ "messageId": message_id, "status": status })),
    };
    match result {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "sse event serialization failed");
            None
        }
    }
}
