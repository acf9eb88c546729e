// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API error envelope: `{"error":{"code","message"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use drover_engine::OrchestratorError;
use drover_store::StoreError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    JobNotFound,
    UnitNotFound,
    DbError,
    ServerError,
    ReadOnly,
}

impl ErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ErrorCode::JobNotFound | ErrorCode::UnitNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ReadOnly => StatusCode::FORBIDDEN,
            ErrorCode::DbError | ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn job_not_found(id: &str) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("job not found: {}", id))
    }

    pub fn unit_not_found(id: &str) -> Self {
        Self::new(ErrorCode::UnitNotFound, format!("unit not found: {}", id))
    }

    pub fn read_only() -> Self {
        Self::new(ErrorCode::ReadOnly, "server is running in read-only dashboard mode")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.code.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::new(ErrorCode::DbError, e.to_string())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match &e {
            OrchestratorError::JobNotFound(id) => Self::job_not_found(id),
            OrchestratorError::UnitNotFound(id) => Self::unit_not_found(id),
            OrchestratorError::Store(store_err) => {
                Self::new(ErrorCode::DbError, store_err.to_string())
            }
            _ => Self::new(ErrorCode::ServerError, e.to_string()),
        }
    }
}
