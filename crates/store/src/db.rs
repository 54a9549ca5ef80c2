// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Database handle and schema

use dork_core::{ErrorCode, RunStatus};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("schedule name {0:?} already exists")]
    ScheduleConflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("illegal run transition {from} → {to}")]
    IllegalRunTransition { from: RunStatus, to: RunStatus },
    #[error("duplicate span for message {0}")]
    DuplicateSpan(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ScheduleConflict(_) => ErrorCode::ScheduleConflict,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::IllegalRunTransition { .. } | Self::DuplicateSpan(_) => ErrorCode::InvalidInput,
            Self::Corrupt(_) | Self::Sqlite(_) => ErrorCode::InternalError,
            Self::Io(_) => ErrorCode::IoError,
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schedules (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    prompt          TEXT NOT NULL,
    cron            TEXT NOT NULL,
    timezone        TEXT,
    cwd             TEXT,
    permission_mode TEXT NOT NULL,
    enabled         INTEGER NOT NULL,
    status          TEXT NOT NULL,
    max_runtime     INTEGER,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    id              TEXT PRIMARY KEY,
    schedule_id     TEXT NOT NULL,
    trigger_kind    TEXT NOT NULL,
    status          TEXT NOT NULL,
    started_at      INTEGER NOT NULL,
    finished_at     INTEGER,
    duration_ms     INTEGER,
    output_summary  TEXT,
    error           TEXT,
    session_id      TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_schedule ON runs(schedule_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);

CREATE TABLE IF NOT EXISTS spans (
    span_id                 TEXT PRIMARY KEY,
    message_id              TEXT NOT NULL,
    trace_id                TEXT NOT NULL,
    parent_span_id          TEXT,
    subject                 TEXT NOT NULL,
    from_endpoint           TEXT NOT NULL,
    to_endpoint             TEXT,
    status                  TEXT NOT NULL,
    budget_hops_used        INTEGER NOT NULL,
    budget_ttl_remaining_ms INTEGER NOT NULL,
    sent_at                 INTEGER NOT NULL,
    delivered_at            INTEGER,
    processed_at            INTEGER,
    error                   TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_spans_publish
    ON spans(message_id) WHERE parent_span_id IS NULL;
CREATE INDEX IF NOT EXISTS idx_spans_message ON spans(message_id);
CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id, sent_at);
CREATE INDEX IF NOT EXISTS idx_spans_subject ON spans(subject, sent_at DESC);
";

/// Shared handle to the single database file.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Run `f` with the connection. All access, reads and writes alike,
    /// funnels through here; the mutex is the single-writer guarantee.
    pub(crate) fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock();
        f(&conn)
    }
}
