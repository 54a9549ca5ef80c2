// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in agent adapter
//!
//! Bridges `relay.agent.>` and `relay.system.pulse.>` to the agent runtime.
//! Each delivery derives a target session, drives one `send_message` stream,
//! publishes every stream event back to the envelope's reply subject with a
//! derived budget, and finalizes the delivery span (plus the pulse run, for
//! scheduler dispatches).

use crate::adapter::{
    Adapter, AdapterState, AdapterStatus, DeliverContext, DeliverResult, BUILTIN_AGENT_ADAPTER_ID,
};
use crate::error::AdapterError;
use crate::relay::{PublishOptions, RelayCore, SubscriptionId};
use dork_core::{
    clamp_summary, AgentRuntime, Clock, Payload, PermissionMode, PulseDispatch, RelayEnvelope,
    RunId, RunStatus, SendOptions, SessionOptions, SpanPatch, SpanStatus, StreamEvent, Subject,
    SubjectPattern, MAX_OUTPUT_SUMMARY_LEN,
};
use dork_mesh::MeshRegistry;
use dork_store::{PulseStore, RunPatch};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub const AGENT_PATTERN: &str = "relay.agent.>";
pub const PULSE_PATTERN: &str = "relay.system.pulse.>";

#[derive(Debug, Clone)]
pub struct AgentAdapterConfig {
    pub max_concurrent: usize,
}

impl Default for AgentAdapterConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

pub struct AgentAdapter<C: Clock> {
    runtime: Arc<dyn AgentRuntime>,
    mesh: Option<Arc<MeshRegistry>>,
    pulse_store: Option<PulseStore>,
    clock: C,
    max_concurrent: usize,
    active: AtomicUsize,
    state: Mutex<AdapterState>,
    relay: Mutex<Weak<RelayCore<C>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: Clock> AgentAdapter<C> {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        mesh: Option<Arc<MeshRegistry>>,
        pulse_store: Option<PulseStore>,
        clock: C,
        config: AgentAdapterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            mesh,
            pulse_store,
            clock,
            max_concurrent: config.max_concurrent.max(1),
            active: AtomicUsize::new(0),
            state: Mutex::new(AdapterState::Disconnected),
            relay: Mutex::new(Weak::new()),
            subscriptions: Mutex::new(Vec::new()),
            session_locks: Mutex::new(HashMap::new()),
        })
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock();
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Derive the target session and working directory for an envelope.
    fn derive_target(
        &self,
        subject: &Subject,
        envelope: &RelayEnvelope,
        context: Option<&DeliverContext>,
    ) -> Target {
        if let Some(dispatch) = envelope.payload.as_pulse_dispatch() {
            return Target {
                session_id: dispatch.run_id.as_str().to_string(),
                cwd: dispatch.cwd.clone(),
                permission_mode: dispatch.permission_mode,
                content: dispatch.prompt.clone(),
                pulse: Some(dispatch.clone()),
            };
        }

        let session_id = subject.last_segment().to_string();
        let cwd = context
            .and_then(|c| c.agent_directory.clone())
            .or_else(|| self.mesh_directory(&session_id));
        let content = match &envelope.payload {
            Payload::Text { content } => content.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        };
        Target { session_id, cwd, permission_mode: PermissionMode::Default, content, pulse: None }
    }

    fn mesh_directory(&self, session_id: &str) -> Option<PathBuf> {
        let mesh = self.mesh.as_ref()?;
        match mesh.find_by_id(session_id) {
            Ok(manifest) => manifest.map(|m| m.directory),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "mesh resolution failed");
                None
            }
        }
    }

    fn system_prompt(&self, envelope: &RelayEnvelope, pulse: Option<&PulseDispatch>) -> String {
        let reply_to = envelope
            .reply_to
            .as_ref()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "(none)".to_string());
        let mut block = format!(
            "<relay_context>\n  From: {}\n  Message-ID: {}\n  Hops: {} of {} used\n  Reply to: {}\n</relay_context>",
            envelope.from, envelope.id, envelope.budget.hop_count, envelope.budget.max_hops, reply_to,
        );
        if let Some(dispatch) = pulse {
            block.push_str(&format!(
                "\nJob: {}\nSchedule: {}\nRun ID: {}\nTrigger: {}\nThis is an unattended scheduled run; nobody is watching the session, so do not wait for user input.",
                dispatch.schedule_name, dispatch.cron, dispatch.run_id, dispatch.trigger,
            ));
        }
        block
    }

    /// Publish one stream event back to the reply subject, budget derived
    /// from the inbound envelope.
    async fn publish_response(
        &self,
        relay: &RelayCore<C>,
        inbound: &RelayEnvelope,
        reply_to: &Subject,
        event: &StreamEvent,
    ) {
        let payload = match event {
            StreamEvent::TextDelta { text } => Payload::text(text.clone()),
            other => match serde_json::to_value(other) {
                Ok(value) => Payload::Custom(value),
                Err(e) => {
                    tracing::warn!(error = %e, "unserializable stream event");
                    return;
                }
            },
        };
        let result = relay
            .publish(
                reply_to.clone(),
                payload,
                PublishOptions {
                    from: inbound.subject.as_str().to_string(),
                    reply_to: None,
                    budget: Some(inbound.budget.derive(inbound.id)),
                    message_id: None,
                },
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(reply_to = %reply_to, error = %e, "response publish rejected");
        }
    }

    fn finalize_run(&self, run_id: RunId, status: RunStatus, summary: &str, error: Option<String>) {
        let Some(store) = &self.pulse_store else {
            return;
        };
        let now = self.clock.epoch_ms();
        let started_at = store.get_run(run_id).ok().flatten().map(|r| r.started_at);
        let patch = RunPatch {
            status: Some(status),
            finished_at: Some(now),
            duration_ms: started_at.map(|s| now.saturating_sub(s)),
            output_summary: (!summary.is_empty())
                .then(|| clamp_summary(summary, MAX_OUTPUT_SUMMARY_LEN)),
            error,
            session_id: Some(run_id.as_str().to_string()),
        };
        if let Err(e) = store.update_run(run_id, patch) {
            tracing::warn!(run_id = %run_id, error = %e, "run finalization failed");
        }
    }

    fn mark_run_running(&self, run_id: RunId) {
        let Some(store) = &self.pulse_store else {
            return;
        };
        if let Err(e) = store.update_run(
            run_id,
            RunPatch { status: Some(RunStatus::Running), ..Default::default() },
        ) {
            tracing::debug!(run_id = %run_id, error = %e, "run already past running");
        }
    }

    /// Run the whole delivery: session setup, stream loop, response
    /// publication, span + run finalization.
    async fn process(
        &self,
        envelope: &RelayEnvelope,
        target: Target,
    ) -> Result<(), String> {
        let relay = self.relay.lock().upgrade();
        let session_id = target.session_id.clone();

        // At most one active send_message per session id; later deliveries
        // for the same session queue here in arrival order.
        let lock = self.session_lock(&session_id);
        let _guard = lock.lock().await;

        if let Some(dispatch) = &target.pulse {
            if envelope.budget.is_expired(self.clock.epoch_ms()) {
                self.finalize_run(dispatch.run_id, RunStatus::Cancelled, "", None);
                return Err("ttl_expired".to_string());
            }
            self.mark_run_running(dispatch.run_id);
        }

        self.runtime
            .ensure_session(
                &session_id,
                SessionOptions {
                    permission_mode: target.permission_mode,
                    cwd: target.cwd.clone(),
                    has_started: false,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        let mut stream = self
            .runtime
            .send_message(
                &session_id,
                &target.content,
                SendOptions {
                    permission_mode: Some(target.permission_mode),
                    cwd: target.cwd.clone(),
                    system_prompt_append: Some(
                        self.system_prompt(envelope, target.pulse.as_ref()),
                    ),
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        let mut summary = String::new();
        let outcome = loop {
            if let Some(dispatch) = &target.pulse {
                if envelope.budget.is_expired(self.clock.epoch_ms()) {
                    stream.close();
                    self.finalize_run(dispatch.run_id, RunStatus::Cancelled, &summary, None);
                    break Err("ttl_expired".to_string());
                }
            }
            let Some(event) = stream.next().await else {
                // Stream ended without a terminator; treat as done.
                break Ok(());
            };
            if let StreamEvent::TextDelta { text } = &event {
                if summary.chars().count() < MAX_OUTPUT_SUMMARY_LEN {
                    summary.push_str(text);
                }
            }
            if let Some(relay) = &relay {
                if let Some(reply_to) = &envelope.reply_to {
                    self.publish_response(relay, envelope, reply_to, &event).await;
                }
            }
            match event {
                StreamEvent::Done {} => break Ok(()),
                StreamEvent::Error { message } => break Err(message),
                _ => {}
            }
        };

        match &outcome {
            Ok(()) => {
                if let Some(relay) = &relay {
                    let patch = SpanPatch {
                        status: Some(SpanStatus::Processed),
                        processed_at: Some(self.clock.epoch_ms()),
                        ..Default::default()
                    };
                    if let Err(e) = relay.trace_store().update_span(envelope.id, patch) {
                        tracing::warn!(message_id = %envelope.id, error = %e, "span update failed");
                    }
                }
                if let Some(dispatch) = &target.pulse {
                    self.finalize_run(dispatch.run_id, RunStatus::Completed, &summary, None);
                }
            }
            Err(error) if error != "ttl_expired" => {
                if let Some(dispatch) = &target.pulse {
                    self.finalize_run(
                        dispatch.run_id,
                        RunStatus::Failed,
                        &summary,
                        Some(error.clone()),
                    );
                }
            }
            Err(_) => {} // run already finalized as cancelled
        }
        outcome
    }
}

struct Target {
    session_id: String,
    cwd: Option<PathBuf>,
    permission_mode: PermissionMode,
    content: String,
    pulse: Option<PulseDispatch>,
}

/// Releases one concurrency slot on drop.
struct Slot<'a>(&'a AtomicUsize);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl<C: Clock> Adapter<C> for AgentAdapter<C> {
    fn id(&self) -> &str {
        BUILTIN_AGENT_ADAPTER_ID
    }

    fn kind(&self) -> &str {
        "agent"
    }

    async fn start(self: Arc<Self>, relay: Arc<RelayCore<C>>) -> Result<(), AdapterError> {
        *self.relay.lock() = Arc::downgrade(&relay);
        *self.state.lock() = AdapterState::Connecting;

        let mut subs = Vec::new();
        for pattern in [AGENT_PATTERN, PULSE_PATTERN] {
            let pattern = SubjectPattern::parse(pattern)
                .map_err(|e| AdapterError::Internal(e.to_string()))?;
            let adapter = Arc::clone(&self);
            let handler: crate::relay::Handler = Arc::new(move |envelope: RelayEnvelope| {
                let adapter = Arc::clone(&adapter);
                Box::pin(async move {
                    let subject = envelope.subject.clone();
                    let result = adapter.deliver(&subject, &envelope, None).await;
                    if result.success {
                        Ok(())
                    } else {
                        Err(result.error.unwrap_or_else(|| "delivery failed".to_string()))
                    }
                })
            });
            subs.push(relay.subscribe(pattern, handler));
        }
        *self.subscriptions.lock() = subs;
        *self.state.lock() = AdapterState::Connected;
        tracing::info!(adapter = self.id(), "agent adapter connected");
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        if let Some(relay) = self.relay.lock().upgrade() {
            for id in self.subscriptions.lock().drain(..) {
                relay.unsubscribe(id);
            }
        }
        // Drain: give in-flight deliveries a moment to finish.
        for _ in 0..100 {
            if self.active.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        *self.state.lock() = AdapterState::Disconnected;
        tracing::info!(adapter = self.id(), "agent adapter disconnected");
        Ok(())
    }

    async fn deliver(
        &self,
        subject: &Subject,
        envelope: &RelayEnvelope,
        context: Option<DeliverContext>,
    ) -> DeliverResult {
        let claimed = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_concurrent).then_some(n + 1)
            })
            .is_ok();
        if !claimed {
            return DeliverResult::failed("adapter_at_capacity");
        }
        let _slot = Slot(&self.active);

        let target = self.derive_target(subject, envelope, context.as_ref());
        let session_id = target.session_id.clone();
        match self.process(envelope, target).await {
            Ok(()) => DeliverResult::ok(),
            Err(error) => {
                tracing::debug!(
                    session_id = %session_id,
                    message_id = %envelope.id,
                    error = %error,
                    "delivery failed"
                );
                DeliverResult::failed(error)
            }
        }
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            state: *self.state.lock(),
            active_count: self.active.load(Ordering::SeqCst),
            max_concurrent: self.max_concurrent,
        }
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
