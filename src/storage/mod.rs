//! Record persistence
//!
//! All durable state goes through the [`RecordStore`] trait, a key/value
//! attribute store keyed by entity (usually a tank id). Implementations:
//!
//! - `InMemoryRecordStore`: process-local store for tests and dry runs
//! - `SledRecordStore`: one sled tree, keys `"{entity}/{key}"`
//!
//! Typed repositories ([`BatchRepository`]) and the audit trail sit on top.

mod audit;
mod batches;
mod sled_store;

pub use audit::{AuditTrail, InMemoryAuditTrail, SledAuditTrail};
pub use batches::BatchRepository;
pub use sled_store::{open_database, SledRecordStore};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Generic attribute store keyed by entity.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save(
        &self,
        entity_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StorageError>;

    async fn get(&self, entity_id: &str, key: &str)
        -> Result<Option<serde_json::Value>, StorageError>;

    /// Keys under `entity_id` starting with `prefix`, in ascending order.
    async fn keys(&self, entity_id: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Returns whether the key existed.
    async fn remove(&self, entity_id: &str, key: &str) -> Result<bool, StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Serialize and save a typed record.
pub async fn save_record<T: Serialize + Sync>(
    store: &dyn RecordStore,
    entity_id: &str,
    key: &str,
    record: &T,
) -> Result<(), StorageError> {
    store
        .save(entity_id, key, serde_json::to_value(record)?)
        .await
}

/// Load and deserialize a typed record.
pub async fn load_record<T: DeserializeOwned>(
    store: &dyn RecordStore,
    entity_id: &str,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(entity_id, key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: format!("{entity_id}/{key}"),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Load every record under `entity_id` whose key starts with `prefix`.
pub async fn load_records<T: DeserializeOwned>(
    store: &dyn RecordStore,
    entity_id: &str,
    prefix: &str,
) -> Result<Vec<T>, StorageError> {
    let mut records = Vec::new();
    for key in store.keys(entity_id, prefix).await? {
        if let Some(record) = load_record(store, entity_id, &key).await? {
            records.push(record);
        }
    }
    Ok(records)
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local record store.
#[derive(Default)]
pub struct InMemoryRecordStore {
    entities: RwLock<HashMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all entities.
    pub fn len(&self) -> usize {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        entities.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn save(
        &self,
        entity_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        entities
            .entry(entity_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(
        &self,
        entity_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        Ok(entities.get(entity_id).and_then(|m| m.get(key)).cloned())
    }

    async fn keys(&self, entity_id: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        Ok(entities
            .get(entity_id)
            .map(|m| {
                m.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove(&self, entity_id: &str, key: &str) -> Result<bool, StorageError> {
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        Ok(entities
            .get_mut(entity_id)
            .is_some_and(|m| m.remove(key).is_some()))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
