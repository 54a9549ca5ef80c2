// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use dork_core::ErrorCode;
use dork_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PulseError {
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("invalid timezone {0:?}")]
    InvalidTimezone(String),
    #[error("run {0} is not cancellable")]
    RunNotCancellable(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PulseError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidCron { .. } | Self::InvalidTimezone(_) => ErrorCode::InvalidInput,
            Self::RunNotCancellable(_) => ErrorCode::RunNotCancellable,
            Self::Internal(_) => ErrorCode::InternalError,
            Self::Store(e) => e.code(),
        }
    }
}
