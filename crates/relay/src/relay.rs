// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The relay core
//!
//! Publish/subscribe with subject-pattern routing. Every publish writes one
//! publish span plus one attempt span per matched subscription, all before
//! the attempt itself; every delivery outcome advances its attempt span,
//! rolls up into the publish span, and emits a signal. Each subscription
//! owns a bounded queue drained by a dedicated worker task, which gives
//! per-subscription FIFO delivery and turns a stuck subscriber into
//! backpressure instead of a stuck bus.

use crate::error::RelayError;
use dork_core::{
    Budget, Clock, MessageId, Payload, RelayConfig, RelayEndpoint, RelayEnvelope, SpanId,
    SpanPatch, SpanStatus, Subject, SubjectPattern, TraceSpan,
};
use dork_store::TraceStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

dork_core::define_id! {
    /// Handle identifying one subscription.
    pub struct SubscriptionId("sub-");
}

/// A subscription handler. Errors are recorded on the delivery span; they
/// never propagate up the publish call chain.
pub type Handler =
    Arc<dyn Fn(RelayEnvelope) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Options for one publish.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Sender endpoint subject.
    pub from: String,
    pub reply_to: Option<Subject>,
    /// Budget for the envelope; defaults come from the relay config. A
    /// caller responding to an inbound envelope passes
    /// `inbound.budget.derive(inbound.id)`.
    pub budget: Option<Budget>,
    /// Explicit message id, for causally derived publications. Fresh ids
    /// are generated when absent.
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: MessageId,
    /// Number of subscriptions the envelope was successfully enqueued to.
    pub delivered_to: usize,
}

/// Signal kinds observable via [`RelayCore::signals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    MessagePublished,
    MessageDelivered,
    MessageFailed,
}

/// Broadcast signal emitted after each span transition. Observers that fall
/// behind lose the oldest signals (drop-on-overflow), never the bus.
#[derive(Debug, Clone)]
pub enum RelaySignal {
    MessagePublished(Box<RelayEnvelope>),
    MessageDelivered {
        message_id: MessageId,
        subject: Subject,
        status: SpanStatus,
    },
    MessageFailed {
        message_id: MessageId,
        subject: Subject,
        status: SpanStatus,
        error: String,
    },
}

impl RelaySignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::MessagePublished(_) => SignalKind::MessagePublished,
            Self::MessageDelivered { .. } => SignalKind::MessageDelivered,
            Self::MessageFailed { .. } => SignalKind::MessageFailed,
        }
    }

    pub fn subject(&self) -> &Subject {
        match self {
            Self::MessagePublished(envelope) => &envelope.subject,
            Self::MessageDelivered { subject, .. } | Self::MessageFailed { subject, .. } => subject,
        }
    }
}

struct SubscriptionEntry {
    id: SubscriptionId,
    pattern: SubjectPattern,
    tx: mpsc::Sender<Delivery>,
}

/// One queued delivery: the envelope plus the attempt span tracking it.
struct Delivery {
    envelope: RelayEnvelope,
    attempt: SpanId,
}

pub struct RelayCore<C: Clock> {
    clock: C,
    config: RelayConfig,
    trace: TraceStore,
    endpoints: Mutex<HashMap<String, RelayEndpoint>>,
    subscriptions: RwLock<Vec<SubscriptionEntry>>,
    signals: broadcast::Sender<RelaySignal>,
    queue_capacity: usize,
    enqueue_deadline: Duration,
}

impl<C: Clock> RelayCore<C> {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
    pub const DEFAULT_ENQUEUE_DEADLINE: Duration = Duration::from_millis(50);
    const SIGNAL_CAPACITY: usize = 256;

    pub fn new(clock: C, config: RelayConfig, trace: TraceStore) -> Self {
        let (signals, _) = broadcast::channel(Self::SIGNAL_CAPACITY);
        Self {
            clock,
            config,
            trace,
            endpoints: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(Vec::new()),
            signals,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            enqueue_deadline: Self::DEFAULT_ENQUEUE_DEADLINE,
        }
    }

    /// Shrink the per-subscription queue (backpressure tests).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_enqueue_deadline(mut self, deadline: Duration) -> Self {
        self.enqueue_deadline = deadline;
        self
    }

    pub fn trace_store(&self) -> &TraceStore {
        &self.trace
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Default budget for envelopes published without one.
    pub fn default_budget(&self) -> Budget {
        Budget::fresh(
            self.clock.epoch_ms(),
            self.config.default_max_hops,
            self.config.default_ttl_ms,
            self.config.default_call_budget,
        )
    }

    // === Endpoints ===

    pub fn register_endpoint(&self, endpoint: RelayEndpoint) {
        self.endpoints.lock().insert(endpoint.subject.as_str().to_string(), endpoint);
    }

    pub fn unregister_endpoint(&self, subject: &str) -> bool {
        self.endpoints.lock().remove(subject).is_some()
    }

    pub fn list_endpoints(&self) -> Vec<RelayEndpoint> {
        let mut endpoints: Vec<_> = self.endpoints.lock().values().cloned().collect();
        endpoints.sort_by(|a, b| a.subject.as_str().cmp(b.subject.as_str()));
        endpoints
    }

    // === Subscriptions ===

    /// Register a handler for a pattern. The returned id unsubscribes.
    pub fn subscribe(&self, pattern: SubjectPattern, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.subscriptions.write().push(SubscriptionEntry {
            id,
            pattern: pattern.clone(),
            tx,
        });
        tokio::spawn(subscription_worker(
            rx,
            handler,
            self.trace.clone(),
            self.signals.clone(),
            self.clock.clone(),
        ));
        tracing::debug!(subscription = %id, pattern = %pattern, "subscribed");
        id
    }

    /// Drop a subscription. Its worker drains queued envelopes, then exits.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // === Signals ===

    /// Observe span transitions. Filter by [`RelaySignal::kind`].
    pub fn signals(&self) -> broadcast::Receiver<RelaySignal> {
        self.signals.subscribe()
    }

    // === Publish ===

    /// Publish an envelope. Budget checks precede span insertion; a rejected
    /// publish leaves no trace. Returns how many subscriptions accepted the
    /// envelope.
    pub async fn publish(
        &self,
        subject: Subject,
        payload: Payload,
        opts: PublishOptions,
    ) -> Result<PublishReceipt, RelayError> {
        let now = self.clock.epoch_ms();
        let budget = opts.budget.unwrap_or_else(|| self.default_budget());
        let message_id = opts.message_id.unwrap_or_default();

        if budget.hop_count > budget.max_hops {
            return Err(RelayError::BudgetExceeded(format!(
                "hop count {} exceeds max {}",
                budget.hop_count, budget.max_hops
            )));
        }
        if budget.is_expired(now) {
            return Err(RelayError::BudgetExceeded("ttl expired".to_string()));
        }
        if budget.call_budget_remaining == 0 {
            return Err(RelayError::BudgetExceeded("call budget exhausted".to_string()));
        }
        if budget.ancestor_chain.contains(&message_id) {
            return Err(RelayError::CycleDetected(message_id));
        }

        let envelope = RelayEnvelope {
            id: message_id,
            subject: subject.clone(),
            from: opts.from,
            reply_to: opts.reply_to,
            budget: budget.clone(),
            created_at: now,
            payload,
        };

        // Publish-span insertion happens-before any delivery attempt.
        let trace_id = budget.ancestor_chain.first().copied().unwrap_or(message_id);
        let publish_span = SpanId::new();
        self.trace.insert_span(&TraceSpan {
            message_id,
            trace_id,
            span_id: publish_span,
            parent_span_id: None,
            subject: subject.as_str().to_string(),
            from_endpoint: envelope.from.clone(),
            to_endpoint: None,
            status: SpanStatus::Pending,
            budget_hops_used: budget.hop_count,
            budget_ttl_remaining_ms: budget.ttl_remaining_ms(now),
            sent_at: now,
            delivered_at: None,
            processed_at: None,
            error: None,
        })?;
        self.emit(RelaySignal::MessagePublished(Box::new(envelope.clone())));

        let matches: Vec<(SubjectPattern, mpsc::Sender<Delivery>)> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| s.pattern.matches(&subject))
                .map(|s| (s.pattern.clone(), s.tx.clone()))
                .collect()
        };

        if matches.is_empty() {
            if subject.is_dead_letter() {
                // A dead-letter subject with no consumer fails outright
                // rather than dead-lettering recursively.
                self.fail_publish_span(message_id, &subject, "no_subscribers".to_string());
            } else {
                self.trace.update_span(
                    message_id,
                    SpanPatch { status: Some(SpanStatus::DeadLettered), ..Default::default() },
                )?;
                self.emit(RelaySignal::MessageFailed {
                    message_id,
                    subject: subject.clone(),
                    status: SpanStatus::DeadLettered,
                    error: "no_subscribers".to_string(),
                });
            }
            return Ok(PublishReceipt { message_id, delivered_to: 0 });
        }

        let mut delivered_to = 0;
        for (pattern, tx) in matches {
            // One attempt span per matched subscription, written before the
            // attempt itself.
            let attempt = SpanId::new();
            self.trace.insert_span(&TraceSpan {
                message_id,
                trace_id,
                span_id: attempt,
                parent_span_id: Some(publish_span),
                subject: subject.as_str().to_string(),
                from_endpoint: envelope.from.clone(),
                to_endpoint: Some(pattern.as_str().to_string()),
                status: SpanStatus::Pending,
                budget_hops_used: budget.hop_count,
                budget_ttl_remaining_ms: budget.ttl_remaining_ms(now),
                sent_at: now,
                delivered_at: None,
                processed_at: None,
                error: None,
            })?;

            let delivery = Delivery { envelope: envelope.clone(), attempt };
            let enqueued = match tx.try_send(delivery) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(delivery)) => tokio::time::timeout(
                    self.enqueue_deadline,
                    tx.send(delivery),
                )
                .await
                .map(|sent| sent.is_ok())
                .unwrap_or(false),
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            };
            if enqueued {
                delivered_to += 1;
            } else {
                self.fail_attempt(attempt, "subscriber_backpressure");
                self.fail_publish_span(message_id, &subject, "subscriber_backpressure".to_string());
            }
        }

        Ok(PublishReceipt { message_id, delivered_to })
    }

    fn fail_attempt(&self, attempt: SpanId, error: &str) {
        if let Err(e) = self.trace.update_attempt(
            attempt,
            SpanPatch {
                status: Some(SpanStatus::Failed),
                error: Some(error.to_string()),
                ..Default::default()
            },
        ) {
            tracing::warn!(attempt = %attempt, error = %e, "attempt update failed");
        }
    }

    fn fail_publish_span(&self, message_id: MessageId, subject: &Subject, error: String) {
        if let Err(e) = self.trace.update_span(
            message_id,
            SpanPatch {
                status: Some(SpanStatus::Failed),
                error: Some(error.clone()),
                ..Default::default()
            },
        ) {
            tracing::warn!(message_id = %message_id, error = %e, "span update failed");
        }
        self.emit(RelaySignal::MessageFailed {
            message_id,
            subject: subject.clone(),
            status: SpanStatus::Failed,
            error,
        });
    }

    fn emit(&self, signal: RelaySignal) {
        // No receivers is fine; drop-on-overflow is the broadcast default.
        let _ = self.signals.send(signal);
    }
}

/// Drains one subscription's queue in FIFO order. Each outcome advances the
/// delivery's attempt span, then the publish span as an aggregate, and emits
/// a signal; handler errors never escape.
async fn subscription_worker<C: Clock>(
    mut rx: mpsc::Receiver<Delivery>,
    handler: Handler,
    trace: TraceStore,
    signals: broadcast::Sender<RelaySignal>,
    clock: C,
) {
    while let Some(Delivery { envelope, attempt }) = rx.recv().await {
        let message_id = envelope.id;
        let subject = envelope.subject.clone();
        let result = handler(envelope).await;
        let now = clock.epoch_ms();
        let (patch, signal) = match result {
            Ok(()) => (
                SpanPatch {
                    status: Some(SpanStatus::Delivered),
                    delivered_at: Some(now),
                    ..Default::default()
                },
                RelaySignal::MessageDelivered {
                    message_id,
                    subject,
                    status: SpanStatus::Delivered,
                },
            ),
            Err(error) => (
                SpanPatch {
                    status: Some(SpanStatus::Failed),
                    error: Some(error.clone()),
                    ..Default::default()
                },
                RelaySignal::MessageFailed {
                    message_id,
                    subject,
                    status: SpanStatus::Failed,
                    error,
                },
            ),
        };
        if let Err(e) = trace.update_attempt(attempt, patch.clone()) {
            tracing::warn!(attempt = %attempt, error = %e, "attempt update failed");
        }
        if let Err(e) = trace.update_span(message_id, patch) {
            tracing::warn!(message_id = %message_id, error = %e, "span update failed");
        }
        let _ = signals.send(signal);
    }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
