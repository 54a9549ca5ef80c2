// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delivery trace spans
//!
//! One row per delivery attempt. A publish writes a parent span (unique per
//! message id, `parent_span_id` empty) and one child span per matched
//! subscription, pointing back at the parent. Span status advances
//! monotonically (`pending < delivered < processed`; `failed` and
//! `dead_lettered` are terminal) so the relay's `delivered` update and the
//! adapter's later `processed` update compose in either arrival order.

use crate::envelope::MessageId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a trace span.
    pub struct SpanId("spn-");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Pending,
    Delivered,
    Processed,
    Failed,
    DeadLettered,
}

crate::simple_display! {
    SpanStatus {
        Pending => "pending",
        Delivered => "delivered",
        Processed => "processed",
        Failed => "failed",
        DeadLettered => "dead_lettered",
    }
}

impl SpanStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Delivered)
    }

    /// Monotonic rank; updates never move a span to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Delivered => 1,
            Self::Processed => 2,
            Self::Failed => 3,
            Self::DeadLettered => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }
}

/// One delivery record on the bus: a publish span, or one delivery attempt
/// under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpan {
    pub message_id: MessageId,
    /// Root message id of the causal chain.
    pub trace_id: MessageId,
    pub span_id: SpanId,
    /// Empty on the publish span; set to the publish span's id on each
    /// delivery attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub subject: String,
    pub from_endpoint: String,
    /// Receiving subscription's pattern, on delivery attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_endpoint: Option<String>,
    pub status: SpanStatus,
    pub budget_hops_used: u32,
    pub budget_ttl_remaining_ms: u64,
    pub sent_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Partial update applied to a span's mutable fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanPatch {
    pub status: Option<SpanStatus>,
    pub delivered_at: Option<u64>,
    pub processed_at: Option<u64>,
    pub error: Option<String>,
    pub budget_hops_used: Option<u32>,
    pub budget_ttl_remaining_ms: Option<u64>,
}

#[cfg(test)]
#[path = "span_tests.rs"]
mod tests;
