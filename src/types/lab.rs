//! Laboratory results and their batch associations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RevisedInputs;

/// External analysis of a tank sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub id: String,
    pub tank_id: String,
    pub timestamp: DateTime<Utc>,
    pub api_gravity: f64,
    /// °C
    pub temperature: f64,
    /// %
    pub bsw: f64,
    #[serde(default)]
    pub density: Option<f64>,
    #[serde(default)]
    pub viscosity: Option<f64>,
    pub operator: String,
}

/// Lab result versus the batch's closing reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceAnalysis {
    /// lab − closing (°API)
    pub api_gravity_diff: f64,
    /// lab − closing (°C)
    pub temperature_diff: f64,
    /// lab − closing (percentage points)
    pub bsw_diff: f64,
    /// |api diff| relative to closing API gravity (%)
    pub percentage_diff: f64,
    /// Names of the thresholds that were exceeded
    pub exceeded: Vec<String>,
    pub significant: bool,
}

/// Advice on whether to recalculate the matched batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationSuggestion {
    pub recommended: bool,
    /// Closing inputs taken from the lab result
    pub revisions: RevisedInputs,
    /// Coarse volume impact heuristic
    pub estimated_barrel_impact: f64,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationStatus {
    Pending,
    Approved,
    Rejected,
    Recalculated,
}

/// Link between a lab result and the batch it was checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabBatchAssociation {
    pub id: String,
    pub lab_result: LabResult,
    pub batch_id: String,
    pub batch_number: String,
    pub variance: VarianceAnalysis,
    pub suggestion: RecalculationSuggestion,
    pub status: AssociationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}
