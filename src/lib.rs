//! custody-batch: custody-transfer batch engine
//!
//! Records product movements in and out of bulk liquid storage tanks as
//! auditable batches.
//!
//! ## Architecture
//!
//! - **Calculator**: TOV → GOV → GSV → NSV → mass, with input validation
//! - **Capture**: gauge readings from manual entry, live or historical telemetry
//! - **Lifecycle**: create / close / void with per-batch serialization and audit
//! - **Recalculation**: what-if recomputation behind an approval policy
//! - **Movement**: per-tank level-rate monitoring and batch suggestions
//! - **Reconciliation**: lab results matched to closed batches and checked for variance
//! - **API**: Axum REST surface over [`BatchEngine`]

pub mod api;
pub mod calculator;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod movement;
pub mod recalc;
pub mod reconcile;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use config::EngineConfig;
pub use engine::BatchEngine;
pub use error::{EngineError, EngineResult, ErrorKind, ValidationIssue};

pub use types::{
    AssociationStatus, AuditEvent, Batch, BatchFilter, BatchStatus, BatchType, GaugeInput,
    GaugeInputs, GaugeReading, LabBatchAssociation, LabResult, MovementUpdate,
    RecalculationResult, RevisedInputs,
};

pub use storage::{AuditTrail, RecordStore, StorageError};
pub use telemetry::{TankDirectory, TelemetryError, TelemetrySource};
