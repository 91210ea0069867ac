//! Engine error taxonomy
//!
//! Every failure carries a stable [`ErrorKind`] code and a human-readable
//! message. Collaborator failures are wrapped with the tank and operation
//! they occurred in; nothing here retries.

use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;
use crate::telemetry::TelemetryError;
use crate::types::BatchStatus;

/// One violated input constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub value: f64,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}: {}", self.field, self.value, self.message)
    }
}

/// Stable error codes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationFailed,
    InvalidTransition,
    NotFound,
    TelemetryUnavailable,
    NoHistoricalData,
    Timeout,
    NoMatchingBatch,
    AlreadyRejected,
    StaleRecalculation,
    Storage,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::TelemetryUnavailable => "TELEMETRY_UNAVAILABLE",
            ErrorKind::NoHistoricalData => "NO_HISTORICAL_DATA",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NoMatchingBatch => "NO_MATCHING_BATCH",
            ErrorKind::AlreadyRejected => "ALREADY_REJECTED",
            ErrorKind::StaleRecalculation => "STALE_RECALCULATION",
            ErrorKind::Storage => "STORAGE",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {}", format_issues(.0))]
    ValidationFailed(Vec<ValidationIssue>),

    #[error("cannot {action} batch {batch_id} in status {from}")]
    InvalidTransition {
        batch_id: String,
        from: BatchStatus,
        action: &'static str,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("telemetry unavailable for tank {tank_id} during {operation}: {source}")]
    TelemetryUnavailable {
        tank_id: String,
        operation: &'static str,
        #[source]
        source: TelemetryError,
    },

    #[error("missing telemetry for tank {tank_id}: {detail}")]
    MissingTelemetry { tank_id: String, detail: String },

    #[error("no historical data for tank {tank_id} within ±{tolerance_secs}s of {target}")]
    NoHistoricalData {
        tank_id: String,
        target: chrono::DateTime<chrono::Utc>,
        tolerance_secs: i64,
    },

    #[error("{operation} for tank {tank_id} timed out after {timeout_ms} ms")]
    Timeout {
        tank_id: String,
        operation: &'static str,
        timeout_ms: u128,
    },

    #[error("no closed batch for tank {tank_id} at or before {timestamp}")]
    NoMatchingBatch {
        tank_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    #[error("lab result {lab_result_id} was already rejected against batch {batch_id}")]
    AlreadyRejected {
        lab_result_id: String,
        batch_id: String,
    },

    #[error("recalculation for batch {batch_id} was computed against revision {expected}, batch is at {actual}")]
    StaleRecalculation {
        batch_id: String,
        expected: u32,
        actual: u32,
    },

    #[error("storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StorageError,
    },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::TelemetryUnavailable { .. } | EngineError::MissingTelemetry { .. } => {
                ErrorKind::TelemetryUnavailable
            }
            EngineError::NoHistoricalData { .. } => ErrorKind::NoHistoricalData,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::NoMatchingBatch { .. } => ErrorKind::NoMatchingBatch,
            EngineError::AlreadyRejected { .. } => ErrorKind::AlreadyRejected,
            EngineError::StaleRecalculation { .. } => ErrorKind::StaleRecalculation,
            EngineError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Collaborator I/O failures a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TelemetryUnavailable
                | ErrorKind::NoHistoricalData
                | ErrorKind::Timeout
                | ErrorKind::Storage
        )
    }

    /// Reconciliation outcomes that should not raise an alarm.
    pub fn is_reconciliation_outcome(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NoMatchingBatch | ErrorKind::AlreadyRejected
        )
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn storage(operation: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| EngineError::Storage { operation, source }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
