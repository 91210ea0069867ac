//! Batch records on top of the record store
//!
//! Layout:
//! - `{tank_id}/batch_{id}`: the batch itself
//! - `batch_index/{id}`: owning tank id, so a batch can be found by id alone
//! - `batch_sequence/{year}`: last issued number for that year
//!
//! Listings for a tank are cached until the next save for that tank.

use chrono::{Datelike, DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use super::{load_record, save_record, RecordStore, StorageError};
use crate::types::{Batch, BatchFilter, BatchPage};

const BATCH_PREFIX: &str = "batch_";
const INDEX_ENTITY: &str = "batch_index";
const SEQUENCE_ENTITY: &str = "batch_sequence";

fn batch_key(batch_id: &str) -> String {
    format!("{BATCH_PREFIX}{batch_id}")
}

#[derive(Default)]
struct CachedListing {
    /// Bumped on every save for the tank
    generation: u64,
    batches: Option<Arc<Vec<Batch>>>,
}

pub struct BatchRepository {
    store: Arc<dyn RecordStore>,
    numbering: Mutex<()>,
    tank_cache: RwLock<HashMap<String, CachedListing>>,
}

impl BatchRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            numbering: Mutex::new(()),
            tank_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Issue the next human-readable number for the year of `at`.
    ///
    /// Numbers are `BT-{year}-{seq:04}`, strictly increasing within a year.
    pub async fn next_number(&self, at: DateTime<Utc>) -> Result<String, StorageError> {
        let _guard = self.numbering.lock().await;
        let year = at.year().to_string();
        let last: u32 = load_record(self.store.as_ref(), SEQUENCE_ENTITY, &year)
            .await?
            .unwrap_or(0);
        let next = last + 1;
        save_record(self.store.as_ref(), SEQUENCE_ENTITY, &year, &next).await?;
        Ok(format!("BT-{year}-{next:04}"))
    }

    /// Insert or replace a batch.
    pub async fn save(&self, batch: &Batch) -> Result<(), StorageError> {
        save_record(self.store.as_ref(), &batch.tank_id, &batch_key(&batch.id), batch).await?;
        save_record(self.store.as_ref(), INDEX_ENTITY, &batch.id, &batch.tank_id).await?;
        self.invalidate(&batch.tank_id);
        Ok(())
    }

    pub async fn get(&self, batch_id: &str) -> Result<Option<Batch>, StorageError> {
        let tank: Option<String> = load_record(self.store.as_ref(), INDEX_ENTITY, batch_id).await?;
        match tank {
            Some(tank_id) => load_record(self.store.as_ref(), &tank_id, &batch_key(batch_id)).await,
            None => Ok(None),
        }
    }

    /// Every batch of one tank, newest first.
    pub async fn list_for_tank(&self, tank_id: &str) -> Result<Arc<Vec<Batch>>, StorageError> {
        let generation = match self.cached(tank_id) {
            (_, Some(cached)) => return Ok(cached),
            (generation, None) => generation,
        };

        let mut batches = Vec::new();
        for key in self.store.keys(tank_id, BATCH_PREFIX).await? {
            if let Some(batch) = load_record::<Batch>(self.store.as_ref(), tank_id, &key).await? {
                batches.push(batch);
            }
        }
        sort_newest_first(&mut batches);

        let batches = Arc::new(batches);
        let mut cache = self.tank_cache.write().unwrap_or_else(|e| e.into_inner());
        let entry = cache.entry(tank_id.to_string()).or_default();
        // A save that raced the load leaves the listing uncached
        if entry.generation == generation {
            entry.batches = Some(Arc::clone(&batches));
        }
        Ok(batches)
    }

    /// Filtered, paginated listing across one or all tanks.
    pub async fn list(&self, filter: &BatchFilter) -> Result<BatchPage, StorageError> {
        let tanks: Vec<String> = match filter.tank_id {
            Some(ref tank) => vec![tank.clone()],
            None => self.known_tanks().await?.into_iter().collect(),
        };

        let mut matching = Vec::new();
        for tank in &tanks {
            let batches = self.list_for_tank(tank).await?;
            matching.extend(batches.iter().filter(|b| filter.matches(b)).cloned());
        }
        sort_newest_first(&mut matching);

        let total_count = matching.len();
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(BatchPage {
            batches: page,
            total_count,
        })
    }

    async fn known_tanks(&self) -> Result<BTreeSet<String>, StorageError> {
        let mut tanks = BTreeSet::new();
        for batch_id in self.store.keys(INDEX_ENTITY, "").await? {
            if let Some(tank) =
                load_record::<String>(self.store.as_ref(), INDEX_ENTITY, &batch_id).await?
            {
                tanks.insert(tank);
            }
        }
        Ok(tanks)
    }

    fn cached(&self, tank_id: &str) -> (u64, Option<Arc<Vec<Batch>>>) {
        let cache = self.tank_cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .get(tank_id)
            .map_or((0, None), |c| (c.generation, c.batches.clone()))
    }

    fn invalidate(&self, tank_id: &str) {
        let mut cache = self.tank_cache.write().unwrap_or_else(|e| e.into_inner());
        let entry = cache.entry(tank_id.to_string()).or_default();
        entry.generation += 1;
        entry.batches = None;
    }
}

fn sort_newest_first(batches: &mut [Batch]) {
    batches.sort_by(|a, b| {
        b.stamps
            .created_at
            .cmp(&a.stamps.created_at)
            .then_with(|| b.number.cmp(&a.number))
    });
}
