// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dork-core: shared types for the DorkOS control plane
//!
//! Identifiers, the clock abstraction, bus subjects and envelopes, agent
//! manifests, pulse schedules and runs, trace spans, the agent-runtime port,
//! and the configuration surface. Every other crate in the workspace builds
//! on these types; none of them hold behavior beyond validation and small
//! state machines.

pub mod macros;

pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod id;
pub mod manifest;
pub mod runtime;
pub mod schedule;
pub mod span;
pub mod subject;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "test-support"))]
pub use clock::FakeClock;
pub use config::{
    DorkConfig, Features, LogLevel, MeshConfig, PulseConfig, RelayConfig, RuntimeConfig,
};
pub use envelope::{
    Budget, EndpointKind, MessageId, Payload, PulseDispatch, RelayEndpoint, RelayEnvelope,
};
pub use error::ErrorCode;
pub use id::IdBuf;
pub use manifest::{AgentId, AgentManifest, AgentRuntimeKind, DeniedAgent, ManifestError};
pub use runtime::{
    AgentRuntime, EventStream, RuntimeError, SendOptions, SessionOptions, StreamEvent,
};
#[cfg(any(test, feature = "test-support"))]
pub use runtime::FakeRuntime;
pub use schedule::{
    clamp_summary, PermissionMode, PulseRun, PulseSchedule, RunId, RunStatus, RunTrigger,
    ScheduleId, ScheduleStatus, MAX_OUTPUT_SUMMARY_LEN,
};
pub use span::{SpanId, SpanPatch, SpanStatus, TraceSpan};
pub use subject::{Subject, SubjectError, SubjectPattern};
