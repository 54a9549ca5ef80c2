// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dork-relay: the message bus and its adapters
//!
//! The relay core routes envelopes to subscriptions by subject pattern,
//! enforces per-envelope budgets, records a trace span for every message,
//! and fans signals out to observers. Adapters are long-lived bridges from
//! bus subjects to concrete execution substrates; the built-in agent
//! adapter drives the LLM runtime and streams responses back onto the bus.

mod adapter;
mod agent;
mod error;
mod relay;

pub use adapter::{
    ensure_known_adapter_type, Adapter, AdapterSet, AdapterState, AdapterStatus, DeliverContext,
    DeliverResult, BUILTIN_AGENT_ADAPTER_ID,
};
pub use agent::{AgentAdapter, AgentAdapterConfig};
pub use error::{AdapterError, RelayError};
pub use relay::{
    Handler, PublishOptions, PublishReceipt, RelayCore, RelaySignal, SignalKind, SubscriptionId,
};
