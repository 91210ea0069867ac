//! Batch aggregate and lifecycle request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GaugeInput, GaugeReading, RevisedInputs};

/// Direction of product movement for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Receiving,
    Dispensing,
}

impl std::fmt::Display for BatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchType::Receiving => write!(f, "receiving"),
            BatchType::Dispensing => write!(f, "dispensing"),
        }
    }
}

/// Lifecycle status.
///
/// `Open` is the only initial state and `Voided` the only terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Open,
    Closed,
    Recalculated,
    Voided,
}

impl BatchStatus {
    /// Statuses that carry a closing reading and transferred quantities.
    pub fn has_closing(self) -> bool {
        matches!(self, BatchStatus::Closed | BatchStatus::Recalculated)
    }

    pub fn is_terminal(self) -> bool {
        self == BatchStatus::Voided
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Open => write!(f, "open"),
            BatchStatus::Closed => write!(f, "closed"),
            BatchStatus::Recalculated => write!(f, "recalculated"),
            BatchStatus::Voided => write!(f, "voided"),
        }
    }
}

/// Quantities moved between opening and closing, reported as magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferredQuantities {
    /// Net standard volume (m³)
    pub nsv: f64,
    /// Net mass (kg)
    pub mass: f64,
    /// Water and sediment volume (m³)
    pub wia: f64,
}

/// Transport and commercial metadata; carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportInfo {
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub vehicle_id: Option<String>,
    #[serde(default)]
    pub seal_numbers: Vec<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Who did what, when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStamps {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_by: Option<String>,
    #[serde(default)]
    pub recalculated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recalculated_by: Option<String>,
    #[serde(default)]
    pub voided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub voided_by: Option<String>,
}

/// A custody-transfer batch.
///
/// Only `lifecycle::BatchLifecycle` changes status and readings; everything
/// else reads batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    /// Human-readable, year-scoped sequence (e.g. `BT-2026-0042`)
    pub number: String,
    pub tank_id: String,
    #[serde(default)]
    pub product: String,
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub opening: GaugeReading,
    #[serde(default)]
    pub closing: Option<GaugeReading>,
    #[serde(default)]
    pub transferred: Option<TransferredQuantities>,
    #[serde(default)]
    pub transport: TransportInfo,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub void_reason: Option<String>,
    pub stamps: BatchStamps,
    /// Bumped on every persisted transition
    #[serde(default)]
    pub revision: u32,
}

impl Batch {
    /// Check the closing/transferred/void-reason invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        let expects_closing = self.status.has_closing()
            || (self.status == BatchStatus::Voided && self.closing.is_some());
        if self.status.has_closing() && (self.closing.is_none() || self.transferred.is_none()) {
            return Err(format!(
                "batch {} is {} but has no closing/transferred quantities",
                self.id, self.status
            ));
        }
        if !expects_closing && (self.closing.is_some() || self.transferred.is_some()) {
            return Err(format!(
                "batch {} is {} but carries closing data",
                self.id, self.status
            ));
        }
        if self.closing.is_some() != self.transferred.is_some() {
            return Err(format!(
                "batch {} has closing and transferred quantities out of step",
                self.id
            ));
        }
        if (self.status == BatchStatus::Voided) != self.void_reason.is_some() {
            return Err(format!(
                "batch {} void reason does not match status {}",
                self.id, self.status
            ));
        }
        Ok(())
    }

    /// Append a line to the free-form notes.
    pub fn append_note(&mut self, note: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }

    /// Timestamp used when matching lab results: the closing gauge time.
    pub fn closing_timestamp(&self) -> Option<DateTime<Utc>> {
        self.closing.as_ref().map(|c| c.timestamp)
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    pub tank_id: String,
    pub batch_type: BatchType,
    pub operator: String,
    pub opening: GaugeInput,
    #[serde(default)]
    pub transport: TransportInfo,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseBatchRequest {
    pub batch_id: String,
    pub operator: String,
    pub closing: GaugeInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculateBatchRequest {
    pub batch_id: String,
    pub operator: String,
    pub revisions: RevisedInputs,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoidBatchRequest {
    pub batch_id: String,
    pub operator: String,
    pub reason: String,
}

/// Listing filter; every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchFilter {
    #[serde(default)]
    pub tank_id: Option<String>,
    #[serde(default)]
    pub status: Option<BatchStatus>,
    #[serde(default)]
    pub batch_type: Option<BatchType>,
    /// Inclusive lower bound on `created_at`
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: usize,
    /// None returns everything after `offset`
    #[serde(default)]
    pub limit: Option<usize>,
}

impl BatchFilter {
    pub fn matches(&self, batch: &Batch) -> bool {
        if let Some(ref tank) = self.tank_id {
            if &batch.tank_id != tank {
                return false;
            }
        }
        if self.status.is_some_and(|s| s != batch.status) {
            return false;
        }
        if self.batch_type.is_some_and(|t| t != batch.batch_type) {
            return false;
        }
        if self.from.is_some_and(|from| batch.stamps.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| batch.stamps.created_at > to) {
            return false;
        }
        true
    }
}

/// One page of a batch listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPage {
    pub batches: Vec<Batch>,
    /// Matches before pagination
    pub total_count: usize,
}
