// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pulse scheduler
//!
//! One tokio task per registered schedule sleeps to the next cron fire and
//! dispatches. Each dispatch creates a run, then either publishes a
//! `pulse_dispatch` envelope to the bus (relay mode, where the agent adapter
//! finalizes the run) or drives the runtime directly under a cancellation
//! token (direct mode). Per-schedule overrun ticks are dropped; a global
//! cap bounds concurrently executing runs.

use crate::cron_expr::{next_fire_ms, parse_cron};
use crate::error::PulseError;
use dork_core::{
    clamp_summary, AgentRuntime, Clock, Payload, PulseDispatch, PulseRun, PulseSchedule, RunId,
    RunStatus, RunTrigger, ScheduleId, ScheduleStatus, SendOptions, SessionOptions, StreamEvent,
    Subject,
};
use dork_relay::{PublishOptions, RelayCore};
use dork_store::{PulseStore, RunPatch, SchedulePatch};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

/// Direct-mode output summaries keep this many characters.
const DIRECT_SUMMARY_LIMIT: usize = 500;

/// Narrow publishing port into the relay, so the scheduler never holds the
/// whole bus. Returns how many subscriptions accepted the envelope.
#[async_trait::async_trait]
pub trait RelayPort: Send + Sync {
    async fn publish_dispatch(
        &self,
        subject: Subject,
        reply_to: Subject,
        payload: Payload,
        ttl_ms: Option<u64>,
    ) -> Result<usize, String>;
}

#[async_trait::async_trait]
impl<C: Clock> RelayPort for RelayCore<C> {
    async fn publish_dispatch(
        &self,
        subject: Subject,
        reply_to: Subject,
        payload: Payload,
        ttl_ms: Option<u64>,
    ) -> Result<usize, String> {
        let mut budget = self.default_budget();
        if let Some(ttl) = ttl_ms {
            budget.ttl = self.clock().epoch_ms() + ttl;
        }
        self.publish(
            subject,
            payload,
            PublishOptions {
                from: "relay.system.pulse".to_string(),
                reply_to: Some(reply_to),
                budget: Some(budget),
                message_id: None,
            },
        )
        .await
        .map(|receipt| receipt.delivered_to)
        .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_runs: usize,
    pub retention_count: usize,
    pub timezone: Option<String>,
    pub default_cwd: Option<PathBuf>,
    pub drain_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 8,
            retention_count: 50,
            timezone: None,
            default_cwd: None,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

struct CronJob {
    handle: tokio::task::JoinHandle<()>,
    /// Held for the duration of one tick's dispatch + execution; a tick that
    /// finds it taken is dropped.
    overrun: Arc<tokio::sync::Mutex<()>>,
}

pub struct PulseScheduler<C: Clock> {
    store: PulseStore,
    runtime: Arc<dyn AgentRuntime>,
    relay: Option<Arc<dyn RelayPort>>,
    clock: C,
    config: SchedulerConfig,
    jobs: Mutex<HashMap<ScheduleId, CronJob>>,
    active_runs: Mutex<HashMap<RunId, CancellationToken>>,
    shutdown: CancellationToken,
    weak: Weak<Self>,
}

impl<C: Clock> PulseScheduler<C> {
    pub fn new(
        store: PulseStore,
        runtime: Arc<dyn AgentRuntime>,
        relay: Option<Arc<dyn RelayPort>>,
        clock: C,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            runtime,
            relay,
            clock,
            config,
            jobs: Mutex::new(HashMap::new()),
            active_runs: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            weak: weak.clone(),
        })
    }

    pub fn store(&self) -> &PulseStore {
        &self.store
    }

    /// Boot: recover crashed runs, register every dispatchable schedule,
    /// prune history.
    pub async fn start(&self) -> Result<(), PulseError> {
        let recovered = self.store.mark_running_as_failed(self.clock.epoch_ms())?;
        if recovered > 0 {
            tracing::info!(recovered, "marked interrupted runs as failed");
        }
        for schedule in self.store.list_schedules()? {
            if !schedule.is_dispatchable() {
                continue;
            }
            if let Err(e) = self.register_schedule(&schedule) {
                tracing::warn!(schedule = %schedule.id, error = %e, "schedule failed to register");
                let _ = self.store.update_schedule(
                    schedule.id,
                    SchedulePatch {
                        status: Some(ScheduleStatus::Errored),
                        ..Default::default()
                    },
                    self.clock.epoch_ms(),
                );
            }
            let _ = self.store.prune_runs(schedule.id, self.config.retention_count);
        }
        Ok(())
    }

    /// Stop cron jobs, abort active runs, wait for the drain.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        for (_, job) in self.jobs.lock().drain() {
            job.handle.abort();
        }
        for token in self.active_runs.lock().values() {
            token.cancel();
        }
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        while self.get_active_run_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    active = self.get_active_run_count(),
                    "drain timeout; abandoning active runs"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Register (or re-register) a cron job for a schedule.
    pub fn register_schedule(&self, schedule: &PulseSchedule) -> Result<(), PulseError> {
        parse_cron(&schedule.cron)?;
        let timezone = schedule
            .timezone
            .clone()
            .or_else(|| self.config.timezone.clone());
        // Validate the timezone up front so the job task cannot fail on it.
        next_fire_ms(&schedule.cron, timezone.as_deref(), self.clock.epoch_ms())?;

        let overrun = Arc::new(tokio::sync::Mutex::new(()));
        let handle = tokio::spawn(cron_loop(
            self.weak.clone(),
            schedule.id,
            schedule.cron.clone(),
            timezone,
            Arc::clone(&overrun),
            self.shutdown.clone(),
        ));
        let previous = self
            .jobs
            .lock()
            .insert(schedule.id, CronJob { handle, overrun });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        Ok(())
    }

    pub fn unregister_schedule(&self, id: ScheduleId) -> bool {
        match self.jobs.lock().remove(&id) {
            Some(job) => {
                job.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: ScheduleId) -> bool {
        self.jobs.lock().contains_key(&id)
    }

    pub fn get_active_run_count(&self) -> usize {
        self.active_runs.lock().len()
    }

    /// Next fire time for a schedule, epoch milliseconds.
    pub fn get_next_run(&self, id: ScheduleId) -> Result<Option<u64>, PulseError> {
        let Some(schedule) = self.store.get_schedule(id)? else {
            return Ok(None);
        };
        let timezone = schedule.timezone.or_else(|| self.config.timezone.clone());
        next_fire_ms(&schedule.cron, timezone.as_deref(), self.clock.epoch_ms())
    }

    /// Create a `manual` run and fire execution; returns immediately.
    pub async fn trigger_manual_run(
        &self,
        id: ScheduleId,
    ) -> Result<Option<PulseRun>, PulseError> {
        self.dispatch_inner(id, RunTrigger::Manual, None).await
    }

    /// Signal a direct-mode run's cancellation token. Relay-mode runs have
    /// no local token; their deadline is the envelope TTL.
    pub fn cancel_run(&self, run_id: RunId) -> bool {
        match self.active_runs.lock().get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// One dispatch: re-read the schedule, create a run, drive a branch.
    /// Returns `None` when the tick was skipped (gone, paused, or at cap).
    pub async fn dispatch(
        &self,
        id: ScheduleId,
        trigger: RunTrigger,
    ) -> Result<Option<PulseRun>, PulseError> {
        self.dispatch_inner(id, trigger, None).await
    }

    async fn dispatch_inner(
        &self,
        id: ScheduleId,
        trigger: RunTrigger,
        tick_guard: Option<OwnedMutexGuard<()>>,
    ) -> Result<Option<PulseRun>, PulseError> {
        // Re-read so mid-flight disable/pause is respected.
        let Some(schedule) = self.store.get_schedule(id)? else {
            return Ok(None);
        };
        if trigger == RunTrigger::Scheduled {
            if !schedule.is_dispatchable() {
                tracing::debug!(schedule = %id, "tick skipped: not dispatchable");
                return Ok(None);
            }
            if self.get_active_run_count() >= self.config.max_concurrent_runs {
                tracing::debug!(schedule = %id, "tick skipped: at max concurrent runs");
                return Ok(None);
            }
        }

        let run = self.store.create_run(schedule.id, trigger, self.clock.epoch_ms())?;
        tracing::info!(
            schedule = %schedule.id,
            run = %run.id,
            trigger = %trigger,
            "dispatching run"
        );

        if let Some(relay) = &self.relay {
            let run = self.dispatch_relay(relay, &schedule, &run, trigger).await?;
            let _ = self.store.prune_runs(schedule.id, self.config.retention_count);
            return Ok(Some(run));
        }

        self.spawn_direct(schedule, run.id, tick_guard);
        Ok(Some(run))
    }

    /// Relay branch: publish a `pulse_dispatch` envelope; the agent adapter
    /// finalizes the run.
    async fn dispatch_relay(
        &self,
        relay: &Arc<dyn RelayPort>,
        schedule: &PulseSchedule,
        run: &PulseRun,
        trigger: RunTrigger,
    ) -> Result<PulseRun, PulseError> {
        let subject = parse_subject(&format!("relay.system.pulse.{}", schedule.id))?;
        let reply_to = parse_subject(&format!("relay.system.pulse.{}.response", schedule.id))?;
        let payload = Payload::PulseDispatch(PulseDispatch {
            schedule_id: schedule.id,
            run_id: run.id,
            prompt: schedule.prompt.clone(),
            cwd: schedule.cwd.clone().or_else(|| self.config.default_cwd.clone()),
            permission_mode: schedule.permission_mode,
            schedule_name: schedule.name.clone(),
            cron: schedule.cron.clone(),
            trigger,
        });

        let patch = match relay
            .publish_dispatch(subject, reply_to, payload, schedule.max_runtime)
            .await
        {
            Ok(0) => RunPatch {
                status: Some(RunStatus::Failed),
                finished_at: Some(self.clock.epoch_ms()),
                error: Some("no_receiver".to_string()),
                ..Default::default()
            },
            Ok(_) => RunPatch { status: Some(RunStatus::Running), ..Default::default() },
            Err(error) => RunPatch {
                status: Some(RunStatus::Failed),
                finished_at: Some(self.clock.epoch_ms()),
                error: Some(error),
                ..Default::default()
            },
        };
        // The adapter may already have advanced the run; same-status and
        // forward transitions apply, anything else is its win.
        match self.store.update_run(run.id, patch) {
            Ok(run) => Ok(run),
            Err(dork_store::StoreError::IllegalRunTransition { .. }) => Ok(self
                .store
                .get_run(run.id)?
                .unwrap_or_else(|| run.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Direct branch: drive the runtime ourselves on a background task.
    fn spawn_direct(
        &self,
        schedule: PulseSchedule,
        run_id: RunId,
        tick_guard: Option<OwnedMutexGuard<()>>,
    ) {
        let Some(scheduler) = self.weak.upgrade() else {
            return;
        };
        let token = CancellationToken::new();
        self.active_runs.lock().insert(run_id, token.clone());
        tokio::spawn(async move {
            // The overrun guard stays held until execution finishes.
            let _tick = tick_guard;
            scheduler.execute_direct(schedule, run_id, token).await;
            scheduler.active_runs.lock().remove(&run_id);
        });
    }

    async fn execute_direct(
        &self,
        schedule: PulseSchedule,
        run_id: RunId,
        token: CancellationToken,
    ) {
        let started_at = self.clock.epoch_ms();
        // maxRuntime and manual cancel combine into the one token.
        let timeout_task = schedule.max_runtime.map(|ms| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => token.cancel(),
                    _ = token.cancelled() => {}
                }
            })
        });

        let outcome = self.drive_stream(&schedule, run_id, &token).await;
        if let Some(task) = timeout_task {
            task.abort();
        }

        let now = self.clock.epoch_ms();
        let (status, summary, error) = match outcome {
            Outcome::Completed(summary) => (RunStatus::Completed, summary, None),
            Outcome::Cancelled(summary) => (RunStatus::Cancelled, summary, None),
            Outcome::Failed(error, summary) => (RunStatus::Failed, summary, Some(error)),
        };
        let patch = RunPatch {
            status: Some(status),
            finished_at: Some(now),
            duration_ms: Some(now.saturating_sub(started_at)),
            output_summary: (!summary.is_empty()).then_some(summary),
            error,
            session_id: Some(run_id.as_str().to_string()),
        };
        if let Err(e) = self.store.update_run(run_id, patch) {
            tracing::warn!(run = %run_id, error = %e, "run finalization failed");
        }
        let _ = self.store.prune_runs(schedule.id, self.config.retention_count);
    }

    async fn drive_stream(
        &self,
        schedule: &PulseSchedule,
        run_id: RunId,
        token: &CancellationToken,
    ) -> Outcome {
        if let Err(e) = self.store.update_run(
            run_id,
            RunPatch { status: Some(RunStatus::Running), ..Default::default() },
        ) {
            return Outcome::Failed(e.to_string(), String::new());
        }

        let cwd = schedule.cwd.clone().or_else(|| self.config.default_cwd.clone());
        let session = SessionOptions {
            permission_mode: schedule.permission_mode,
            cwd: cwd.clone(),
            has_started: false,
        };
        if let Err(e) = self.runtime.ensure_session(run_id.as_str(), session).await {
            return Outcome::Failed(e.to_string(), String::new());
        }

        let send = SendOptions {
            permission_mode: Some(schedule.permission_mode),
            cwd,
            system_prompt_append: None,
        };
        let mut stream = match self.runtime.send_message(run_id.as_str(), &schedule.prompt, send).await
        {
            Ok(stream) => stream,
            Err(e) => return Outcome::Failed(e.to_string(), String::new()),
        };

        let mut summary = String::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    stream.close();
                    return Outcome::Cancelled(clamp(&summary));
                }
                event = stream.next() => match event {
                    None | Some(StreamEvent::Done {}) => {
                        return Outcome::Completed(clamp(&summary));
                    }
                    Some(StreamEvent::TextDelta { text }) => {
                        if summary.chars().count() < DIRECT_SUMMARY_LIMIT {
                            summary.push_str(&text);
                        }
                    }
                    Some(StreamEvent::Error { message }) => {
                        return Outcome::Failed(message, clamp(&summary));
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

enum Outcome {
    Completed(String),
    Cancelled(String),
    Failed(String, String),
}

fn clamp(summary: &str) -> String {
    clamp_summary(summary, DIRECT_SUMMARY_LIMIT)
}

fn parse_subject(raw: &str) -> Result<Subject, PulseError> {
    Subject::parse(raw).map_err(|e| PulseError::Internal(format!("bad dispatch subject: {e}")))
}

/// Per-schedule cron task: sleep to the next fire, then dispatch unless the
/// previous tick is still executing.
async fn cron_loop<C: Clock>(
    scheduler: Weak<PulseScheduler<C>>,
    schedule_id: ScheduleId,
    cron: String,
    timezone: Option<String>,
    overrun: Arc<tokio::sync::Mutex<()>>,
    shutdown: CancellationToken,
) {
    loop {
        let now_ms = match scheduler.upgrade() {
            Some(s) => s.clock.epoch_ms(),
            None => return,
        };
        let next = match next_fire_ms(&cron, timezone.as_deref(), now_ms) {
            Ok(Some(next)) => next,
            Ok(None) => {
                tracing::info!(schedule = %schedule_id, "cron has no future firings");
                return;
            }
            Err(e) => {
                tracing::warn!(schedule = %schedule_id, error = %e, "cron evaluation failed");
                return;
            }
        };
        let wait = Duration::from_millis(next.saturating_sub(now_ms).max(1));
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let Some(scheduler) = scheduler.upgrade() else {
            return;
        };
        // Overrun protection: drop the tick if the previous one is live.
        let Ok(tick) = Arc::clone(&overrun).try_lock_owned() else {
            tracing::debug!(schedule = %schedule_id, "tick dropped: previous run still executing");
            continue;
        };
        if let Err(e) = scheduler
            .dispatch_inner(schedule_id, RunTrigger::Scheduled, Some(tick))
            .await
        {
            tracing::warn!(schedule = %schedule_id, error = %e, "dispatch failed");
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
