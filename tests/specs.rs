// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level end-to-end specs
//!
//! These wire real stores (tempdir SQLite), the real relay and scheduler,
//! and a scripted runtime into one in-process world, then drive the
//! scenarios the subsystems must jointly satisfy.

// Allow panic!/unwrap/expect in test code
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]


mod pulse {
    mod direct;
    mod relay_mode;
}

mod relay {
    mod round_trip;
}
