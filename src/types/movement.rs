//! Movement detection outputs. Not persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BatchType;

/// Level trend of a tank over the sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementClass {
    Receiving,
    Dispensing,
    Idle,
}

impl MovementClass {
    /// Batch type matching an active movement.
    pub fn batch_type(self) -> Option<BatchType> {
        match self {
            MovementClass::Receiving => Some(BatchType::Receiving),
            MovementClass::Dispensing => Some(BatchType::Dispensing),
            MovementClass::Idle => None,
        }
    }
}

/// One classification of the current sample window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementEvent {
    pub tank_id: String,
    pub timestamp: DateTime<Utc>,
    pub classification: MovementClass,
    /// mm/h, positive when the level rises
    pub rate: f64,
    /// 0..=1, higher for more uniform level steps
    pub confidence: f64,
    /// Last minus first level in the window (mm)
    pub level_delta: f64,
    /// Window length (seconds)
    pub sample_duration_secs: f64,
    /// Latest level in the window (mm)
    pub current_level: f64,
}

/// Prompt offered to the operator for a detected movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSuggestion {
    pub tank_id: String,
    pub should_prompt: bool,
    pub suggested_type: Option<BatchType>,
    pub confidence: f64,
    /// Time until the tank reaches its fill limit (receiving) or empties (dispensing)
    pub estimated_duration_secs: Option<f64>,
    pub event_timestamp: DateTime<Utc>,
}

/// What a monitoring subscriber receives per poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementUpdate {
    pub event: MovementEvent,
    #[serde(default)]
    pub suggestion: Option<BatchSuggestion>,
}
