//! Recalculation inputs and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Batch;

/// Revised scalar inputs for one gauge reading. `None` keeps the original.
///
/// Level and timestamp are deliberately absent: they cannot be revised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalarRevision {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub api_gravity: Option<f64>,
    #[serde(default)]
    pub bsw: Option<f64>,
}

impl ScalarRevision {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.api_gravity.is_none() && self.bsw.is_none()
    }
}

/// Revisions for the opening and/or closing reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisedInputs {
    #[serde(default)]
    pub opening: Option<ScalarRevision>,
    #[serde(default)]
    pub closing: Option<ScalarRevision>,
}

impl RevisedInputs {
    pub fn is_empty(&self) -> bool {
        self.opening.map_or(true, |r| r.is_empty()) && self.closing.map_or(true, |r| r.is_empty())
    }
}

/// Which reading (or the transfer) a difference row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonSection {
    Opening,
    Closing,
    Transferred,
}

/// One before/after row of the comparison report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDifference {
    pub section: ComparisonSection,
    pub field: String,
    pub before: f64,
    pub after: f64,
    pub delta: f64,
}

/// Whether the recalculated batch has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalculationOutcome {
    /// Within policy, committed immediately
    Applied,
    /// Waiting for an explicit approve/reject
    PendingApproval,
}

/// What-if comparison of a batch under revised inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationResult {
    pub original: Batch,
    pub recalculated: Batch,
    pub revisions: RevisedInputs,
    pub differences: Vec<FieldDifference>,
    /// Signed change in transferred NSV (%)
    pub percentage_change: f64,
    /// Signed change in transferred mass (kg)
    pub mass_difference: f64,
    pub requires_approval: bool,
    pub approval_reason: String,
    pub outcome: RecalculationOutcome,
    pub requested_by: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub computed_at: DateTime<Utc>,
}

/// A rejected recalculation, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationRejection {
    pub batch_id: String,
    pub rejected_by: String,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
    /// Batch revision the rejected result was computed against
    pub batch_revision: u32,
    pub percentage_change: f64,
    pub mass_difference: f64,
}
