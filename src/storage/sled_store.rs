//! Sled-backed record store
//!
//! Records live in the `records` tree as JSON bytes keyed by
//! `"{entity}/{key}"`, so a prefix scan enumerates one entity.

use async_trait::async_trait;
use std::path::Path;

use super::{RecordStore, StorageError};

const RECORDS_TREE: &str = "records";

/// Open (or create) the engine database under `data_dir`.
pub fn open_database(data_dir: &Path) -> Result<sled::Db, StorageError> {
    let db = sled::open(data_dir.join("custody_batch.db"))?;
    tracing::info!(path = %data_dir.display(), "Record database opened");
    Ok(db)
}

#[derive(Clone)]
pub struct SledRecordStore {
    tree: sled::Tree,
}

impl SledRecordStore {
    pub fn new(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree(RECORDS_TREE)?,
        })
    }

    fn full_key(entity_id: &str, key: &str) -> String {
        format!("{entity_id}/{key}")
    }

    /// Remove every record. Used by `--reset-db`.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.tree.clear()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SledRecordStore {
    async fn save(
        &self,
        entity_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&value)?;
        self.tree.insert(Self::full_key(entity_id, key), bytes)?;
        Ok(())
    }

    async fn get(
        &self,
        entity_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        match self.tree.get(Self::full_key(entity_id, key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn keys(&self, entity_id: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let scan = Self::full_key(entity_id, prefix);
        let strip = entity_id.len() + 1;
        let mut keys = Vec::new();
        for entry in self.tree.scan_prefix(scan.as_bytes()) {
            let (k, _) = entry?;
            let full = String::from_utf8_lossy(&k);
            keys.push(full[strip..].to_string());
        }
        Ok(keys)
    }

    async fn remove(&self, entity_id: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.tree.remove(Self::full_key(entity_id, key))?.is_some())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
