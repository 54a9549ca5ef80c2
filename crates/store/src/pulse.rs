// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent schedules and runs
//!
//! Run status transitions are validated here, not in callers: `update_run`
//! refuses any edge outside `pending → running → {completed, failed,
//! cancelled}` (plus `pending → failed` for dispatches with no receiver).

use crate::db::{Db, StoreError};
use dork_core::{
    PermissionMode, PulseRun, PulseSchedule, RunId, RunStatus, RunTrigger, ScheduleId,
    ScheduleStatus,
};
use rusqlite::{params, OptionalExtension, Row};
use serde::Deserialize;
use std::path::PathBuf;

/// Input for creating a schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScheduleInput {
    pub name: String,
    pub prompt: String,
    pub cron: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub status: ScheduleStatus,
    #[serde(default)]
    pub max_runtime: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

/// Partial schedule update. `id` is immutable and has no field here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SchedulePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default, with = "double_option")]
    pub timezone: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub cwd: Option<Option<PathBuf>>,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub status: Option<ScheduleStatus>,
    #[serde(default, with = "double_option")]
    pub max_runtime: Option<Option<u64>>,
}

/// Distinguishes "field absent" from "field set to null" in PATCH bodies.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

/// Partial run update.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub finished_at: Option<u64>,
    pub duration_ms: Option<u64>,
    pub output_summary: Option<String>,
    pub error: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub schedule_id: Option<ScheduleId>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct PulseStore {
    db: Db,
}

impl PulseStore {
    pub const DEFAULT_LIST_LIMIT: usize = 100;

    pub fn new(db: Db) -> Self {
        Self { db }
    }

    // === Schedules ===

    pub fn create_schedule(
        &self,
        input: ScheduleInput,
        now_ms: u64,
    ) -> Result<PulseSchedule, StoreError> {
        let schedule = PulseSchedule {
            id: ScheduleId::new(),
            name: input.name,
            prompt: input.prompt,
            cron: input.cron,
            timezone: input.timezone,
            cwd: input.cwd,
            permission_mode: input.permission_mode,
            enabled: input.enabled,
            status: input.status,
            max_runtime: input.max_runtime,
            created_at: now_ms,
            updated_at: now_ms,
        };
        self.db.with(|conn| {
            let result = conn.execute(
                "INSERT INTO schedules (
                    id, name, prompt, cron, timezone, cwd, permission_mode,
                    enabled, status, max_runtime, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    schedule.id.as_str(),
                    schedule.name,
                    schedule.prompt,
                    schedule.cron,
                    schedule.timezone,
                    schedule.cwd.as_ref().map(|p| p.display().to_string()),
                    schedule.permission_mode.to_string(),
                    schedule.enabled,
                    schedule.status.to_string(),
                    schedule.max_runtime,
                    schedule.created_at,
                    schedule.updated_at,
                ],
            );
            match result {
                Ok(_) => Ok(schedule.clone()),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::ScheduleConflict(schedule.name.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn update_schedule(
        &self,
        id: ScheduleId,
        patch: SchedulePatch,
        now_ms: u64,
    ) -> Result<PulseSchedule, StoreError> {
        let mut schedule = self
            .get_schedule(id)?
            .ok_or_else(|| StoreError::NotFound(format!("schedule {id}")))?;

        if let Some(name) = patch.name {
            schedule.name = name;
        }
        if let Some(prompt) = patch.prompt {
            schedule.prompt = prompt;
        }
        if let Some(cron) = patch.cron {
            schedule.cron = cron;
        }
        if let Some(timezone) = patch.timezone {
            schedule.timezone = timezone;
        }
        if let Some(cwd) = patch.cwd {
            schedule.cwd = cwd;
        }
        if let Some(mode) = patch.permission_mode {
            schedule.permission_mode = mode;
        }
        if let Some(enabled) = patch.enabled {
            schedule.enabled = enabled;
        }
        if let Some(status) = patch.status {
            schedule.status = status;
        }
        if let Some(max_runtime) = patch.max_runtime {
            schedule.max_runtime = max_runtime;
        }
        schedule.updated_at = now_ms;

        self.db.with(|conn| {
            let result = conn.execute(
                "UPDATE schedules SET
                    name = ?2, prompt = ?3, cron = ?4, timezone = ?5, cwd = ?6,
                    permission_mode = ?7, enabled = ?8, status = ?9,
                    max_runtime = ?10, updated_at = ?11
                 WHERE id = ?1",
                params![
                    schedule.id.as_str(),
                    schedule.name,
                    schedule.prompt,
                    schedule.cron,
                    schedule.timezone,
                    schedule.cwd.as_ref().map(|p| p.display().to_string()),
                    schedule.permission_mode.to_string(),
                    schedule.enabled,
                    schedule.status.to_string(),
                    schedule.max_runtime,
                    schedule.updated_at,
                ],
            );
            match result {
                Ok(_) => Ok(schedule.clone()),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::ScheduleConflict(schedule.name.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Delete a schedule and its runs.
    pub fn delete_schedule(&self, id: ScheduleId) -> Result<(), StoreError> {
        self.db.with(|conn| {
            let deleted =
                conn.execute("DELETE FROM schedules WHERE id = ?1", params![id.as_str()])?;
            if deleted == 0 {
                return Err(StoreError::NotFound(format!("schedule {id}")));
            }
            conn.execute("DELETE FROM runs WHERE schedule_id = ?1", params![id.as_str()])?;
            Ok(())
        })
    }

    pub fn list_schedules(&self) -> Result<Vec<PulseSchedule>, StoreError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map([], row_to_schedule)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    pub fn get_schedule(&self, id: ScheduleId) -> Result<Option<PulseSchedule>, StoreError> {
        self.db.with(|conn| {
            conn.query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                params![id.as_str()],
                row_to_schedule,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    // === Runs ===

    /// Insert a fresh `pending` run for a dispatch.
    pub fn create_run(
        &self,
        schedule_id: ScheduleId,
        trigger: RunTrigger,
        now_ms: u64,
    ) -> Result<PulseRun, StoreError> {
        let run = PulseRun {
            id: RunId::new(),
            schedule_id,
            trigger,
            status: RunStatus::Pending,
            started_at: now_ms,
            finished_at: None,
            duration_ms: None,
            output_summary: None,
            error: None,
            session_id: None,
        };
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO runs (
                    id, schedule_id, trigger_kind, status, started_at, finished_at,
                    duration_ms, output_summary, error, session_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, NULL, NULL)",
                params![
                    run.id.as_str(),
                    run.schedule_id.as_str(),
                    run.trigger.to_string(),
                    run.status.to_string(),
                    run.started_at,
                ],
            )?;
            Ok(run.clone())
        })
    }

    /// Apply a patch to a run. A status change outside the legal edges is
    /// rejected; runs in a terminal state are immutable.
    pub fn update_run(&self, id: RunId, patch: RunPatch) -> Result<PulseRun, StoreError> {
        self.db.with(|conn| {
            let run = conn
                .query_row(
                    &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                    params![id.as_str()],
                    row_to_run,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("run {id}")))?;

            if let Some(next) = patch.status {
                // Same-status patches are no-ops so the scheduler and the
                // adapter can both mark a run `running` without racing.
                let same = next == run.status && !run.status.is_terminal();
                if !same && !run.status.can_transition_to(next) {
                    return Err(StoreError::IllegalRunTransition { from: run.status, to: next });
                }
            } else if run.status.is_terminal() {
                return Err(StoreError::IllegalRunTransition {
                    from: run.status,
                    to: run.status,
                });
            }

            conn.execute(
                "UPDATE runs SET
                    status = COALESCE(?2, status),
                    finished_at = COALESCE(?3, finished_at),
                    duration_ms = COALESCE(?4, duration_ms),
                    output_summary = COALESCE(?5, output_summary),
                    error = COALESCE(?6, error),
                    session_id = COALESCE(?7, session_id)
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    patch.status.map(|s| s.to_string()),
                    patch.finished_at,
                    patch.duration_ms,
                    patch.output_summary,
                    patch.error,
                    patch.session_id,
                ],
            )?;
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id.as_str()],
                row_to_run,
            )
            .map_err(StoreError::from)
        })
    }

    pub fn get_run(&self, id: RunId) -> Result<Option<PulseRun>, StoreError> {
        self.db.with(|conn| {
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id.as_str()],
                row_to_run,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Newest-first run listing.
    pub fn list_runs(&self, filter: &RunFilter) -> Result<Vec<PulseRun>, StoreError> {
        self.db.with(|conn| {
            let limit = filter.limit.unwrap_or(Self::DEFAULT_LIST_LIMIT);
            let mut sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE 1=1");
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(schedule_id) = filter.schedule_id {
                sql.push_str(" AND schedule_id = ?");
                args.push(Box::new(schedule_id.as_str().to_string()));
            }
            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                args.push(Box::new(status.to_string()));
            }
            sql.push_str(" ORDER BY started_at DESC, id LIMIT ?");
            args.push(Box::new(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_run,
            )?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Crash recovery: coerce every `running` row to `failed`. Called once
    /// by the scheduler at boot; returns the number of rows touched.
    pub fn mark_running_as_failed(&self, now_ms: u64) -> Result<usize, StoreError> {
        self.db.with(|conn| {
            let count = conn.execute(
                "UPDATE runs SET status = 'failed', error = 'interrupted',
                    finished_at = ?1,
                    duration_ms = CASE WHEN ?1 >= started_at THEN ?1 - started_at ELSE 0 END
                 WHERE status = 'running'",
                params![now_ms],
            )?;
            Ok(count)
        })
    }

    /// Delete rows older than the newest `keep` for a schedule.
    pub fn prune_runs(&self, schedule_id: ScheduleId, keep: usize) -> Result<usize, StoreError> {
        self.db.with(|conn| {
            let count = conn.execute(
                "DELETE FROM runs WHERE schedule_id = ?1 AND id NOT IN (
                    SELECT id FROM runs WHERE schedule_id = ?1
                    ORDER BY started_at DESC, id LIMIT ?2
                 )",
                params![schedule_id.as_str(), keep as i64],
            )?;
            Ok(count)
        })
    }
}

const SCHEDULE_COLUMNS: &str = "id, name, prompt, cron, timezone, cwd, permission_mode, enabled, \
                                status, max_runtime, created_at, updated_at";

const RUN_COLUMNS: &str = "id, schedule_id, trigger_kind, status, started_at, finished_at, \
                           duration_ms, output_summary, error, session_id";

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<PulseSchedule> {
    let mode: String = row.get(6)?;
    let status: String = row.get(8)?;
    Ok(PulseSchedule {
        id: ScheduleId::from_string(row.get::<_, String>(0)?),
        name: row.get(1)?,
        prompt: row.get(2)?,
        cron: row.get(3)?,
        timezone: row.get(4)?,
        cwd: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
        permission_mode: PermissionMode::parse(&mode).unwrap_or_default(),
        enabled: row.get(7)?,
        status: ScheduleStatus::parse(&status).unwrap_or_default(),
        max_runtime: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<PulseRun> {
    let trigger: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(PulseRun {
        id: RunId::from_string(row.get::<_, String>(0)?),
        schedule_id: ScheduleId::from_string(row.get::<_, String>(1)?),
        trigger: RunTrigger::parse(&trigger).unwrap_or(RunTrigger::Scheduled),
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
        duration_ms: row.get(6)?,
        output_summary: row.get(7)?,
        error: row.get(8)?,
        session_id: row.get(9)?,
    })
}

#[cfg(test)]
#[path = "pulse_tests.rs"]
mod tests;
