// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay envelopes, budgets, and endpoints
//!
//! An envelope is one message in flight on the bus. Its budget bounds the
//! blast radius of agent-to-agent chatter: hop count, absolute TTL, a call
//! credit pool, and the ancestor chain used for cycle detection.

use crate::schedule::{PermissionMode, RunId, RunTrigger, ScheduleId};
use crate::subject::Subject;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a relay envelope.
    pub struct MessageId("msg-");
}

/// Per-envelope resource limits preventing runaway fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Hops consumed so far; equals `ancestor_chain.len()`.
    pub hop_count: u32,
    pub max_hops: u32,
    /// Message ids this envelope is causally derived from, oldest first.
    pub ancestor_chain: Vec<MessageId>,
    /// Absolute deadline, epoch milliseconds.
    pub ttl: u64,
    pub call_budget_remaining: u32,
}

impl Budget {
    pub const DEFAULT_MAX_HOPS: u32 = 8;
    pub const DEFAULT_TTL_MS: u64 = 300_000;
    pub const DEFAULT_CALL_BUDGET: u32 = 10;

    /// Fresh budget for an envelope with no causal parent.
    pub fn fresh(now_ms: u64, max_hops: u32, ttl_ms: u64, call_budget: u32) -> Self {
        Self {
            hop_count: 0,
            max_hops,
            ancestor_chain: Vec::new(),
            ttl: now_ms + ttl_ms,
            call_budget_remaining: call_budget,
        }
    }

    pub fn fresh_default(now_ms: u64) -> Self {
        Self::fresh(
            now_ms,
            Self::DEFAULT_MAX_HOPS,
            Self::DEFAULT_TTL_MS,
            Self::DEFAULT_CALL_BUDGET,
        )
    }

    /// Budget for an envelope causally derived from `parent_id`'s envelope:
    /// one more hop, the parent appended to the chain, one call credit spent.
    /// The TTL deadline is inherited unchanged.
    pub fn derive(&self, parent_id: MessageId) -> Self {
        let mut chain = self.ancestor_chain.clone();
        chain.push(parent_id);
        Self {
            hop_count: self.hop_count + 1,
            max_hops: self.max_hops,
            ancestor_chain: chain,
            ttl: self.ttl,
            call_budget_remaining: self.call_budget_remaining.saturating_sub(1),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.ttl
    }

    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.ttl.saturating_sub(now_ms)
    }
}

/// What kind of party owns a subscribable address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    System,
    Human,
    Agent,
}

crate::simple_display! {
    EndpointKind {
        System => "system",
        Human => "human",
        Agent => "agent",
    }
}

/// A subscribable address on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEndpoint {
    pub subject: Subject,
    pub kind: EndpointKind,
    /// Adapter id or external identifier.
    pub owner: String,
    pub created_at: u64,
}

/// Dispatch payload published by the pulse scheduler in relay mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulseDispatch {
    pub schedule_id: ScheduleId,
    pub run_id: RunId,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub permission_mode: PermissionMode,
    pub schedule_name: String,
    pub cron: String,
    pub trigger: RunTrigger,
}

/// Envelope payload: a small closed set of known kinds plus an opaque
/// fallback so unknown kinds survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text {
        content: String,
    },
    PulseDispatch(PulseDispatch),
    #[serde(untagged)]
    Custom(serde_json::Value),
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Payload::Text { content: content.into() }
    }

    pub fn as_pulse_dispatch(&self) -> Option<&PulseDispatch> {
        match self {
            Payload::PulseDispatch(d) => Some(d),
            _ => None,
        }
    }
}

/// One message in flight on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEnvelope {
    pub id: MessageId,
    pub subject: Subject,
    /// Sender endpoint subject.
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Subject>,
    pub budget: Budget,
    pub created_at: u64,
    pub payload: Payload,
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
