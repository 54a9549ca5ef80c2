// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dorkd, the DorkOS daemon
//!
//! Composition root: load config, open the store, wire mesh/relay/pulse
//! together through their ports, start the scheduler and adapters, serve
//! HTTP until ctrl-c, then drain.

use dork_core::{AgentRuntime, SystemClock};
use dork_mesh::MeshRegistry;
use dork_pulse::{PulseScheduler, RelayPort, SchedulerConfig};
use dork_relay::{AdapterSet, AgentAdapter, AgentAdapterConfig, RelayCore};
use dork_server::config_io;
use dork_server::state::{AppState, AppStateBuilder};
use dork_server::ProcessRuntime;
use dork_store::{Db, PulseStore, TraceStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn fatal(message: &str) -> ! {
    eprintln!("dorkd: {message}");
    std::process::exit(1)
}

#[tokio::main]
async fn main() {
    let config_path = config_io::default_config_path();
    let config = match config_io::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => fatal(&format!("{e}")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_dir = config_io::data_dir();
    let boundary = config
        .boundary
        .clone()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| fatal("no boundary configured and no home directory"));
    if !boundary.is_dir() {
        fatal(&format!("boundary {} is not a directory", boundary.display()));
    }

    let db = match Db::open(&data_dir.join("dork.db")) {
        Ok(db) => db,
        Err(e) => fatal(&format!("cannot open database: {e}")),
    };
    let trace_store = TraceStore::new(db.clone());
    let pulse_store = PulseStore::new(db);

    let clock = SystemClock;
    let runtime: Arc<dyn AgentRuntime> = Arc::new(ProcessRuntime::new(
        config.runtime.clone(),
        config.default_cwd.clone(),
    ));

    let features = config.features();
    let mesh = features
        .mesh
        .then(|| Arc::new(MeshRegistry::new(data_dir.clone(), boundary.clone())));

    let relay = features.relay.then(|| {
        Arc::new(RelayCore::new(clock.clone(), config.relay.clone(), trace_store.clone()))
    });

    let adapters: Arc<AdapterSet<SystemClock>> = Arc::new(AdapterSet::new());
    if let Some(relay) = &relay {
        let agent_adapter = AgentAdapter::new(
            Arc::clone(&runtime),
            mesh.clone(),
            Some(pulse_store.clone()),
            clock.clone(),
            AgentAdapterConfig::default(),
        );
        if let Err(e) = adapters.add(agent_adapter) {
            fatal(&format!("adapter registration failed: {e}"));
        }
        if let Err(e) = adapters.start_all(relay).await {
            fatal(&format!("adapter startup failed: {e}"));
        }
    }

    let scheduler = if features.pulse {
        let relay_port = relay
            .as_ref()
            .map(|r| Arc::clone(r) as Arc<dyn RelayPort>);
        let scheduler = PulseScheduler::new(
            pulse_store.clone(),
            Arc::clone(&runtime),
            relay_port,
            clock.clone(),
            SchedulerConfig {
                max_concurrent_runs: config.pulse.max_concurrent_runs as usize,
                retention_count: config.pulse.retention_count as usize,
                timezone: config.pulse.timezone.clone(),
                default_cwd: config.default_cwd.clone(),
                ..Default::default()
            },
        );
        if let Err(e) = scheduler.start().await {
            fatal(&format!("scheduler startup failed: {e}"));
        }
        Some(scheduler)
    } else {
        None
    };

    let port = config.port;
    let state = AppState::new(AppStateBuilder {
        config,
        config_path,
        mesh,
        relay,
        scheduler: scheduler.clone(),
        pulse_store,
        trace_store,
        adapters: Arc::clone(&adapters),
        runtime,
    });
    let router = dork_server::build_router(state);

    let addr: std::net::SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => fatal(&format!("cannot bind {addr}: {e}")),
    };
    tracing::info!(%addr, "dorkd listening");

    let serve = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    });
    if let Err(e) = serve.await {
        tracing::error!(error = %e, "server error");
    }

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    adapters.stop_all().await;
    tracing::info!("dorkd stopped");
}
