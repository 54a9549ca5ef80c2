// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent delivery spans
//!
//! Each publish writes one parent span (the publish record, unique per
//! message id) and one child span per delivery attempt, linked through
//! `parent_span_id`. Status updates are forward-only: a span never moves to
//! a lower [`SpanStatus::rank`], so the relay's `delivered` and the
//! adapter's `processed` may land in either order without clobbering.

use crate::db::{Db, StoreError};
use dork_core::{MessageId, SpanId, SpanPatch, SpanStatus, TraceSpan};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

/// Aggregate metrics over the publish (parent) spans. Latency is
/// `delivered_at - sent_at`, computed only over messages that were actually
/// delivered; an empty store yields zero counts and null latencies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetrics {
    pub total_messages: u64,
    pub delivered_count: u64,
    pub failed_count: u64,
    pub dead_lettered_count: u64,
    pub avg_delivery_latency_ms: Option<f64>,
    pub p95_delivery_latency_ms: Option<f64>,
}

/// Query filter for listing publish spans.
#[derive(Debug, Clone, Default)]
pub struct SpanFilter {
    pub subject: Option<String>,
    pub status: Option<SpanStatus>,
    pub from: Option<String>,
    /// Cursor: only spans sent strictly before this timestamp.
    pub before_sent_at: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct TraceStore {
    db: Db,
}

impl TraceStore {
    pub const DEFAULT_LIST_LIMIT: usize = 50;

    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append a span. Span ids are unique, and a message carries at most one
    /// publish (parentless) span; violating either is an error.
    pub fn insert_span(&self, span: &TraceSpan) -> Result<(), StoreError> {
        self.db.with(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO spans (
                    span_id, message_id, trace_id, parent_span_id, subject,
                    from_endpoint, to_endpoint, status, budget_hops_used,
                    budget_ttl_remaining_ms, sent_at, delivered_at, processed_at, error
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    span.span_id.as_str(),
                    span.message_id.as_str(),
                    span.trace_id.as_str(),
                    span.parent_span_id.as_ref().map(|s| s.as_str().to_string()),
                    span.subject,
                    span.from_endpoint,
                    span.to_endpoint,
                    span.status.to_string(),
                    span.budget_hops_used,
                    span.budget_ttl_remaining_ms,
                    span.sent_at,
                    span.delivered_at,
                    span.processed_at,
                    span.error,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::DuplicateSpan(span.message_id.to_string()));
            }
            Ok(())
        })
    }

    /// Atomic partial update of the publish span's mutable fields. A status
    /// in the patch only applies if it does not lower the span's rank;
    /// timestamps and error text apply regardless.
    pub fn update_span(&self, message_id: MessageId, patch: SpanPatch) -> Result<(), StoreError> {
        self.db.with(|conn| {
            apply_patch(
                conn,
                "message_id = ?1 AND parent_span_id IS NULL",
                message_id.as_str(),
                &format!("span {message_id}"),
                patch,
            )
        })
    }

    /// Same as [`update_span`](Self::update_span) but for one delivery
    /// attempt, addressed by its span id.
    pub fn update_attempt(&self, span_id: SpanId, patch: SpanPatch) -> Result<(), StoreError> {
        self.db.with(|conn| {
            apply_patch(
                conn,
                "span_id = ?1",
                span_id.as_str(),
                &format!("attempt {span_id}"),
                patch,
            )
        })
    }

    /// The publish span for a message.
    pub fn get_span(&self, message_id: MessageId) -> Result<Option<TraceSpan>, StoreError> {
        self.db.with(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM spans
                     WHERE message_id = ?1 AND parent_span_id IS NULL"
                ),
                params![message_id.as_str()],
                row_to_span,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Delivery-attempt spans for a message, oldest first.
    pub fn get_attempts(&self, message_id: MessageId) -> Result<Vec<TraceSpan>, StoreError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM spans
                 WHERE message_id = ?1 AND parent_span_id IS NOT NULL
                 ORDER BY sent_at, span_id"
            ))?;
            let rows = stmt.query_map(params![message_id.as_str()], row_to_span)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// All spans in a causal trace in tree order: by send time, with each
    /// publish span ahead of its delivery attempts.
    pub fn get_trace(&self, trace_id: MessageId) -> Result<Vec<TraceSpan>, StoreError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM spans WHERE trace_id = ?1
                 ORDER BY sent_at, message_id, (parent_span_id IS NOT NULL), span_id"
            ))?;
            let rows = stmt.query_map(params![trace_id.as_str()], row_to_span)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Newest-first publish-span listing for the messages API. Delivery
    /// attempts are reachable through the trace endpoint instead.
    pub fn list_spans(&self, filter: &SpanFilter) -> Result<Vec<TraceSpan>, StoreError> {
        self.db.with(|conn| {
            let limit = filter.limit.unwrap_or(Self::DEFAULT_LIST_LIMIT);
            let mut sql =
                format!("SELECT {COLUMNS} FROM spans WHERE parent_span_id IS NULL");
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(subject) = &filter.subject {
                sql.push_str(" AND subject = ?");
                args.push(Box::new(subject.clone()));
            }
            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                args.push(Box::new(status.to_string()));
            }
            if let Some(from) = &filter.from {
                sql.push_str(" AND from_endpoint = ?");
                args.push(Box::new(from.clone()));
            }
            if let Some(cursor) = filter.before_sent_at {
                sql.push_str(" AND sent_at < ?");
                args.push(Box::new(cursor));
            }
            sql.push_str(" ORDER BY sent_at DESC, message_id LIMIT ?");
            args.push(Box::new(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_span,
            )?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    pub fn metrics(&self) -> Result<TraceMetrics, StoreError> {
        self.db.with(|conn| {
            let (total, delivered, failed, dead): (u64, u64, u64, u64) = conn.query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(status IN ('delivered', 'processed')), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    COALESCE(SUM(status = 'dead_lettered'), 0)
                 FROM spans WHERE parent_span_id IS NULL",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT delivered_at - sent_at FROM spans
                 WHERE parent_span_id IS NULL AND delivered_at IS NOT NULL ORDER BY 1",
            )?;
            let latencies: Vec<i64> =
                stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;

            let (avg, p95) = if latencies.is_empty() {
                (None, None)
            } else {
                let sum: i64 = latencies.iter().sum();
                let avg = sum as f64 / latencies.len() as f64;
                let idx = ((latencies.len() - 1) as f64 * 0.95).round() as usize;
                (Some(avg), Some(latencies[idx] as f64))
            };

            Ok(TraceMetrics {
                total_messages: total,
                delivered_count: delivered,
                failed_count: failed,
                dead_lettered_count: dead,
                avg_delivery_latency_ms: avg,
                p95_delivery_latency_ms: p95,
            })
        })
    }
}

const COLUMNS: &str = "message_id, trace_id, span_id, parent_span_id, subject, from_endpoint, \
                       to_endpoint, status, budget_hops_used, budget_ttl_remaining_ms, sent_at, \
                       delivered_at, processed_at, error";

/// Shared forward-only patch application for publish and attempt rows.
fn apply_patch(
    conn: &Connection,
    where_clause: &str,
    key: &str,
    describe: &str,
    patch: SpanPatch,
) -> Result<(), StoreError> {
    let current: Option<String> = conn
        .query_row(
            &format!("SELECT status FROM spans WHERE {where_clause}"),
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Err(StoreError::NotFound(describe.to_string()));
    };
    let current = SpanStatus::parse(&current)
        .ok_or_else(|| StoreError::Corrupt(format!("span status {current:?}")))?;

    let next_status = match patch.status {
        Some(next) if next.rank() >= current.rank() => next,
        _ => current,
    };
    conn.execute(
        &format!(
            "UPDATE spans SET
                status = ?2,
                delivered_at = COALESCE(?3, delivered_at),
                processed_at = COALESCE(?4, processed_at),
                error = COALESCE(?5, error),
                budget_hops_used = COALESCE(?6, budget_hops_used),
                budget_ttl_remaining_ms = COALESCE(?7, budget_ttl_remaining_ms)
             WHERE {where_clause}"
        ),
        params![
            key,
            next_status.to_string(),
            patch.delivered_at,
            patch.processed_at,
            patch.error,
            patch.budget_hops_used,
            patch.budget_ttl_remaining_ms,
        ],
    )?;
    Ok(())
}

fn row_to_span(row: &Row<'_>) -> rusqlite::Result<TraceSpan> {
    let status: String = row.get(7)?;
    Ok(TraceSpan {
        message_id: MessageId::from_string(row.get::<_, String>(0)?),
        trace_id: MessageId::from_string(row.get::<_, String>(1)?),
        span_id: SpanId::from_string(row.get::<_, String>(2)?),
        parent_span_id: row.get::<_, Option<String>>(3)?.map(SpanId::from_string),
        subject: row.get(4)?,
        from_endpoint: row.get(5)?,
        to_endpoint: row.get(6)?,
        status: SpanStatus::parse(&status).unwrap_or(SpanStatus::Failed),
        budget_hops_used: row.get(8)?,
        budget_ttl_remaining_ms: row.get(9)?,
        sent_at: row.get(10)?,
        delivered_at: row.get(11)?,
        processed_at: row.get(12)?,
        error: row.get(13)?,
    })
}

#[cfg(test)]
#[path = "trace_tests.rs"]
mod tests;
