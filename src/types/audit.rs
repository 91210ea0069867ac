//! Append-only audit events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Created,
    Closed,
    Recalculated,
    Voided,
    Updated,
    Deleted,
}

/// One lifecycle event. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Assigned by the trail on append
    #[serde(default)]
    pub sequence: u64,
    pub event_type: AuditEventType,
    pub batch_id: String,
    #[serde(default)]
    pub batch_number: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, batch_id: &str, batch_number: &str, actor: &str) -> Self {
        Self {
            sequence: 0,
            event_type,
            batch_id: batch_id.to_string(),
            batch_number: batch_number.to_string(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            details: BTreeMap::new(),
        }
    }

    /// Builder-style detail insertion.
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}
