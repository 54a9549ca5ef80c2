// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway state
//!
//! Everything the route handlers need, wired once at startup. Disabled
//! subsystems are simply absent; the accessors turn absence into
//! `FEATURE_DISABLED` responses.

use crate::error::ApiError;
use dork_core::{AgentRuntime, DorkConfig, Features, SystemClock};
use dork_mesh::MeshRegistry;
use dork_pulse::PulseScheduler;
use dork_relay::{AdapterSet, RelayCore};
use dork_store::{PulseStore, TraceStore};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<DorkConfig>,
    config_path: PathBuf,
    features: Features,
    mesh: Option<Arc<MeshRegistry>>,
    relay: Option<Arc<RelayCore<SystemClock>>>,
    scheduler: Option<Arc<PulseScheduler<SystemClock>>>,
    pulse_store: PulseStore,
    trace_store: TraceStore,
    adapters: Arc<AdapterSet<SystemClock>>,
    runtime: Arc<dyn AgentRuntime>,
    started_at: Instant,
}

pub struct AppStateBuilder {
    pub config: DorkConfig,
    pub config_path: PathBuf,
    pub mesh: Option<Arc<MeshRegistry>>,
    pub relay: Option<Arc<RelayCore<SystemClock>>>,
    pub scheduler: Option<Arc<PulseScheduler<SystemClock>>>,
    pub pulse_store: PulseStore,
    pub trace_store: TraceStore,
    pub adapters: Arc<AdapterSet<SystemClock>>,
    pub runtime: Arc<dyn AgentRuntime>,
}

impl AppState {
    pub fn new(builder: AppStateBuilder) -> Self {
        let features = builder.config.features();
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(builder.config),
                config_path: builder.config_path,
                features,
                mesh: builder.mesh,
                relay: builder.relay,
                scheduler: builder.scheduler,
                pulse_store: builder.pulse_store,
                trace_store: builder.trace_store,
                adapters: builder.adapters,
                runtime: builder.runtime,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> DorkConfig {
        self.inner.config.read().clone()
    }

    pub fn set_config(&self, config: DorkConfig) {
        *self.inner.config.write() = config;
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.inner.config_path
    }

    pub fn features(&self) -> Features {
        self.inner.features
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    pub fn mesh(&self) -> Result<&Arc<MeshRegistry>, ApiError> {
        self.inner
            .mesh
            .as_ref()
            .ok_or_else(|| ApiError::feature_disabled("mesh"))
    }

    pub fn relay(&self) -> Result<&Arc<RelayCore<SystemClock>>, ApiError> {
        self.inner
            .relay
            .as_ref()
            .ok_or_else(|| ApiError::feature_disabled("relay"))
    }

    pub fn scheduler(&self) -> Result<&Arc<PulseScheduler<SystemClock>>, ApiError> {
        self.inner
            .scheduler
            .as_ref()
            .ok_or_else(|| ApiError::feature_disabled("pulse"))
    }

    pub fn pulse_store(&self) -> Result<&PulseStore, ApiError> {
        if !self.inner.features.pulse {
            return Err(ApiError::feature_disabled("pulse"));
        }
        Ok(&self.inner.pulse_store)
    }

    pub fn trace_store(&self) -> Result<&TraceStore, ApiError> {
        if !self.inner.features.relay {
            return Err(ApiError::feature_disabled("relay"));
        }
        Ok(&self.inner.trace_store)
    }

    pub fn adapters(&self) -> &Arc<AdapterSet<SystemClock>> {
        &self.inner.adapters
    }

    pub fn runtime(&self) -> &Arc<dyn AgentRuntime> {
        &self.inner.runtime
    }

    pub fn now_ms(&self) -> u64 {
        use dork_core::Clock;
        SystemClock.epoch_ms()
    }
}
