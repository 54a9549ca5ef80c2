// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use dork_core::{ErrorCode, MessageId, SubjectError};
use dork_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("cycle detected: {0} is in its own ancestor chain")]
    CycleDetected(MessageId),
    #[error(transparent)]
    Subject(#[from] SubjectError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BudgetExceeded(_) => ErrorCode::BudgetExceeded,
            Self::CycleDetected(_) => ErrorCode::CycleDetected,
            Self::Subject(_) => ErrorCode::InvalidInput,
            Self::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter {0:?} already registered")]
    DuplicateId(String),
    #[error("unknown adapter type {0:?}")]
    UnknownType(String),
    #[error("adapter {0} not found")]
    NotFound(String),
    #[error("the built-in {0} adapter cannot be removed")]
    RemoveBuiltinDenied(String),
    #[error("adapter error: {0}")]
    Internal(String),
}

impl AdapterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateId(_) => ErrorCode::DuplicateId,
            Self::UnknownType(_) => ErrorCode::UnknownAdapterType,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::RemoveBuiltinDenied(_) => ErrorCode::RemoveBuiltinDenied,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}
