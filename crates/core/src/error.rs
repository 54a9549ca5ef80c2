// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable error codes surfaced on the wire
//!
//! Every subsystem error maps to one of these codes; the gateway converts
//! codes to HTTP statuses. The strings are a compatibility surface; never
//! rename them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    InvalidInput,
    NotFound,
    // Mesh
    AlreadyRegistered,
    Denied,
    OutOfBoundary,
    InvalidManifest,
    // Pulse
    ScheduleConflict,
    RunNotCancellable,
    NoReceiver,
    // Relay
    BudgetExceeded,
    NoSubscribers,
    SubscriberBackpressure,
    CycleDetected,
    // Adapter
    AdapterAtCapacity,
    UnknownAdapterType,
    DuplicateId,
    RemoveBuiltinDenied,
    // Feature flags
    FeatureDisabled,
    // Generic
    InternalError,
    IoError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyRegistered => "ALREADY_REGISTERED",
            Self::Denied => "DENIED",
            Self::OutOfBoundary => "OUT_OF_BOUNDARY",
            Self::InvalidManifest => "INVALID_MANIFEST",
            Self::ScheduleConflict => "SCHEDULE_CONFLICT",
            Self::RunNotCancellable => "RUN_NOT_CANCELLABLE",
            Self::NoReceiver => "NO_RECEIVER",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::NoSubscribers => "NO_SUBSCRIBERS",
            Self::SubscriberBackpressure => "SUBSCRIBER_BACKPRESSURE",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::AdapterAtCapacity => "ADAPTER_AT_CAPACITY",
            Self::UnknownAdapterType => "UNKNOWN_ADAPTER_TYPE",
            Self::DuplicateId => "DUPLICATE_ID",
            Self::RemoveBuiltinDenied => "REMOVE_BUILTIN_DENIED",
            Self::FeatureDisabled => "FEATURE_DISABLED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::IoError => "IO_ERROR",
        }
    }

    /// HTTP status for this code: 400 validation/conflict, 404 not-found,
    /// 403 denial/feature-disabled, 500 internal.
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Denied | Self::OutOfBoundary | Self::FeatureDisabled => 403,
            Self::InternalError | Self::IoError => 500,
            _ => 400,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
