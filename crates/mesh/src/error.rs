// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use dork_core::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("{} is already registered", .0.display())]
    AlreadyRegistered(PathBuf),
    #[error("{} is denied", path.display())]
    Denied { path: PathBuf, reason: Option<String> },
    #[error("{} escapes the boundary root", .0.display())]
    OutOfBoundary(PathBuf),
    #[error("agent {0} not found")]
    NotFound(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("{0} is immutable")]
    ImmutableField(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyRegistered(_) => ErrorCode::AlreadyRegistered,
            Self::Denied { .. } => ErrorCode::Denied,
            Self::OutOfBoundary(_) => ErrorCode::OutOfBoundary,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidManifest(_) => ErrorCode::InvalidManifest,
            Self::ImmutableField(_) => ErrorCode::InvalidInput,
            Self::Io(_) => ErrorCode::IoError,
        }
    }
}
