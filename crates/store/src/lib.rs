// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dork-store: embedded persistence for traces and pulse state
//!
//! One SQLite file holds delivery spans, schedules, and runs. Writes are
//! serialized through a single connection behind a mutex; reads share the
//! same handle (WAL mode keeps them cheap). Nothing here is async; every
//! call is a short, synchronous statement.

mod db;
mod pulse;
mod trace;

pub use db::{Db, StoreError};
pub use pulse::{PulseStore, RunFilter, RunPatch, ScheduleInput, SchedulePatch};
pub use trace::{SpanFilter, TraceMetrics, TraceStore};
