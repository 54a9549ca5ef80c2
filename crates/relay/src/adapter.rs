// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter lifecycle framework
//!
//! An adapter binds a type (`agent`, `webhook`, …) to concrete routing
//! behavior. The framework manages registration and lifecycle only;
//! behavior lives in implementations.

use crate::error::AdapterError;
use crate::relay::RelayCore;
use dork_core::{Clock, RelayEnvelope, Subject};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Id of the built-in agent adapter. It cannot be removed.
pub const BUILTIN_AGENT_ADAPTER_ID: &str = "agent";

/// Adapter types the framework knows how to host.
const KNOWN_TYPES: &[&str] = &["agent", "webhook", "email", "chat-bot"];

/// Reject configuration referencing an adapter type nothing implements.
pub fn ensure_known_adapter_type(kind: &str) -> Result<(), AdapterError> {
    if KNOWN_TYPES.contains(&kind) {
        Ok(())
    } else {
        Err(AdapterError::UnknownType(kind.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

dork_core::simple_display! {
    AdapterState {
        Disconnected => "disconnected",
        Connecting => "connecting",
        Connected => "connected",
        Error => "error",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStatus {
    pub state: AdapterState,
    pub active_count: usize,
    pub max_concurrent: usize,
}

/// Caller-provided routing context for a delivery.
#[derive(Debug, Clone, Default)]
pub struct DeliverContext {
    /// Explicit agent directory, when the caller already resolved one.
    pub agent_directory: Option<PathBuf>,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverResult {
    pub success: bool,
    pub error: Option<String>,
}

impl DeliverResult {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// A long-lived bridge between relay subjects and an execution substrate.
#[async_trait::async_trait]
pub trait Adapter<C: Clock>: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> &str;

    /// Register subscriptions on the relay and move to `connected`.
    async fn start(self: Arc<Self>, relay: Arc<RelayCore<C>>) -> Result<(), AdapterError>;

    /// Unregister, drain, move to `disconnected`.
    async fn stop(&self) -> Result<(), AdapterError>;

    /// Primary worker entry point, called when one of the adapter's
    /// subscriptions matches.
    async fn deliver(
        &self,
        subject: &Subject,
        envelope: &RelayEnvelope,
        context: Option<DeliverContext>,
    ) -> DeliverResult;

    fn status(&self) -> AdapterStatus;
}

/// Registry of live adapters.
pub struct AdapterSet<C: Clock> {
    adapters: Mutex<HashMap<String, Arc<dyn Adapter<C>>>>,
}

impl<C: Clock> AdapterSet<C> {
    pub fn new() -> Self {
        Self { adapters: Mutex::new(HashMap::new()) }
    }

    pub fn add(&self, adapter: Arc<dyn Adapter<C>>) -> Result<(), AdapterError> {
        ensure_known_adapter_type(adapter.kind())?;
        let mut adapters = self.adapters.lock();
        let id = adapter.id().to_string();
        if adapters.contains_key(&id) {
            return Err(AdapterError::DuplicateId(id));
        }
        adapters.insert(id, adapter);
        Ok(())
    }

    /// Remove and stop an adapter. The built-in agent adapter is pinned.
    pub async fn remove(&self, id: &str) -> Result<(), AdapterError> {
        if id == BUILTIN_AGENT_ADAPTER_ID {
            return Err(AdapterError::RemoveBuiltinDenied(id.to_string()));
        }
        let adapter = self
            .adapters
            .lock()
            .remove(id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))?;
        adapter.stop().await
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Adapter<C>>> {
        self.adapters.lock().get(id).cloned()
    }

    pub fn statuses(&self) -> Vec<(String, AdapterStatus)> {
        let mut out: Vec<_> = self
            .adapters
            .lock()
            .iter()
            .map(|(id, a)| (id.clone(), a.status()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub async fn start_all(&self, relay: &Arc<RelayCore<C>>) -> Result<(), AdapterError> {
        let adapters: Vec<_> = self.adapters.lock().values().cloned().collect();
        for adapter in adapters {
            adapter.start(Arc::clone(relay)).await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let adapters: Vec<_> = self.adapters.lock().values().cloned().collect();
        for adapter in adapters {
            if let Err(e) = adapter.stop().await {
                tracing::warn!(adapter = adapter.id(), error = %e, "adapter stop failed");
            }
        }
    }
}

impl<C: Clock> Default for AdapterSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
