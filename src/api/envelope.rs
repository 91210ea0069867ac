//! Response envelope shared by every endpoint.
//!
//! Success bodies are `{ "data": T, "meta": { ... } }`; failures are
//! `{ "error": { "code", "message", "issues"? }, "meta": { ... } }`. Engine
//! errors keep their stable code so clients can branch on it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::error::{EngineError, ErrorKind, ValidationIssue};

/// Metadata included in every response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "1",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Response {
        Self::with_status(StatusCode::CREATED, data)
    }

    fn with_status(status: StatusCode, data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    /// Per-field violations for `VALIDATION_FAILED`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    fn build(
        status: StatusCode,
        code: &str,
        msg: impl Into<String>,
        issues: Vec<ValidationIssue>,
    ) -> Response {
        let body = Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
                issues,
            },
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "NOT_FOUND", msg, Vec::new())
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, Vec::new())
    }

    /// Map an engine failure onto its HTTP status, keeping the engine code.
    pub fn from_engine(err: &EngineError) -> Response {
        let kind = err.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::warn!(code = kind.code(), error = %err, "Request failed");
        }
        let issues = match err {
            EngineError::ValidationFailed(issues) => issues.clone(),
            _ => Vec::new(),
        };
        Self::build(status, kind.code(), err.to_string(), issues)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound | ErrorKind::NoMatchingBatch => StatusCode::NOT_FOUND,
        ErrorKind::InvalidTransition
        | ErrorKind::AlreadyRejected
        | ErrorKind::StaleRecalculation => StatusCode::CONFLICT,
        ErrorKind::TelemetryUnavailable | ErrorKind::NoHistoricalData => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        ApiErrorResponse::from_engine(&self)
    }
}
