//! Append-only audit trail
//!
//! Events get a monotonically increasing sequence number on append. The sled
//! implementation stores them in the `audit_events` tree keyed by that
//! sequence (big-endian u64, so iteration is chronological).

use async_trait::async_trait;
use std::sync::RwLock;

use super::StorageError;
use crate::types::AuditEvent;

const AUDIT_TREE: &str = "audit_events";

#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Append an event; returns it with its sequence number filled in.
    async fn append(&self, event: AuditEvent) -> Result<AuditEvent, StorageError>;

    /// Events in append order, optionally only those of one batch.
    async fn list(&self, batch_id: Option<&str>) -> Result<Vec<AuditEvent>, StorageError>;

    /// Administrative wipe. Returns the number of events removed.
    async fn clear(&self) -> Result<usize, StorageError>;
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct InMemoryAuditTrail {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditTrail for InMemoryAuditTrail {
    async fn append(&self, mut event: AuditEvent) -> Result<AuditEvent, StorageError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        event.sequence = events.last().map_or(1, |e| e.sequence + 1);
        events.push(event.clone());
        Ok(event)
    }

    async fn list(&self, batch_id: Option<&str>) -> Result<Vec<AuditEvent>, StorageError> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        Ok(events
            .iter()
            .filter(|e| batch_id.map_or(true, |id| e.batch_id == id))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        let removed = events.len();
        events.clear();
        Ok(removed)
    }
}

// ============================================================================
// Sled
// ============================================================================

#[derive(Clone)]
pub struct SledAuditTrail {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledAuditTrail {
    pub fn new(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            db: db.clone(),
            tree: db.open_tree(AUDIT_TREE)?,
        })
    }
}

#[async_trait]
impl AuditTrail for SledAuditTrail {
    async fn append(&self, mut event: AuditEvent) -> Result<AuditEvent, StorageError> {
        // generate_id is monotonic across restarts; gaps are allowed
        event.sequence = self.db.generate_id()? + 1;
        let bytes = serde_json::to_vec(&event)?;
        self.tree.insert(event.sequence.to_be_bytes(), bytes)?;
        Ok(event)
    }

    async fn list(&self, batch_id: Option<&str>) -> Result<Vec<AuditEvent>, StorageError> {
        let mut events = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            match serde_json::from_slice::<AuditEvent>(&bytes) {
                Ok(event) if batch_id.map_or(true, |id| event.batch_id == id) => events.push(event),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable audit event"),
            }
        }
        Ok(events)
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let removed = self.tree.len();
        self.tree.clear()?;
        tracing::warn!(removed, "Audit trail cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuditEventType;

    async fn exercise(trail: &dyn AuditTrail) {
        let a = trail
            .append(AuditEvent::new(AuditEventType::Created, "b1", "BT-2026-0001", "alice"))
            .await
            .unwrap();
        let b = trail
            .append(
                AuditEvent::new(AuditEventType::Created, "b2", "BT-2026-0002", "bob")
                    .with_detail("tank_id", "TK-1"),
            )
            .await
            .unwrap();
        let c = trail
            .append(AuditEvent::new(AuditEventType::Closed, "b1", "BT-2026-0001", "alice"))
            .await
            .unwrap();
        assert!(a.sequence < b.sequence && b.sequence < c.sequence);

        let b1: Vec<AuditEventType> = trail
            .list(Some("b1"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(b1, vec![AuditEventType::Created, AuditEventType::Closed]);
        assert_eq!(trail.list(None).await.unwrap().len(), 3);

        assert_eq!(trail.clear().await.unwrap(), 3);
        assert!(trail.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_trail() {
        exercise(&InMemoryAuditTrail::new()).await;
    }

    #[tokio::test]
    async fn test_sled_trail() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        exercise(&SledAuditTrail::new(&db).unwrap()).await;
    }
}
