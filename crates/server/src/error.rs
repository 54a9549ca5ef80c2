// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error-to-response mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dork_core::ErrorCode;
use serde::Serialize;

/// One wire error: `{ "error": message, "code": CODE }` with the status
/// derived from the code taxonomy.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: ErrorCode,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { error: message.into(), code }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn feature_disabled(feature: &str) -> Self {
        Self::new(ErrorCode::FeatureDisabled, format!("the {feature} feature is disabled"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<dork_mesh::MeshError> for ApiError {
    fn from(e: dork_mesh::MeshError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<dork_store::StoreError> for ApiError {
    fn from(e: dork_store::StoreError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<dork_relay::RelayError> for ApiError {
    fn from(e: dork_relay::RelayError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<dork_relay::AdapterError> for ApiError {
    fn from(e: dork_relay::AdapterError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<dork_pulse::PulseError> for ApiError {
    fn from(e: dork_pulse::PulseError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<dork_core::SubjectError> for ApiError {
    fn from(e: dork_core::SubjectError) -> Self {
        Self::invalid_input(e.to_string())
    }
}

impl From<dork_core::RuntimeError> for ApiError {
    fn from(e: dork_core::RuntimeError) -> Self {
        Self::new(ErrorCode::InternalError, e.to_string())
    }
}
