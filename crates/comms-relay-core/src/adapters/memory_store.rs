//! # In-Memory Record Store
//!
//! Thread-safe in-memory implementation for testing and local runs.

use crate::records::NormalizedRecord;
use crate::store::{RecordStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;

/// Address of one stored document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    container: String,
    partition_key: String,
    id: String,
}

/// In-memory record store
///
/// Records are keyed by `(container, partitionKey, id)`. The store can be
/// switched into an unavailable state to exercise failure paths.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<RecordKey, NormalizedRecord>>,
    containers: RwLock<BTreeSet<String>>,
    unavailable: AtomicBool,
    upserts: AtomicUsize,
}

impl InMemoryRecordStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store with pre-declared containers
    pub fn with_containers<I, S>(containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            containers: RwLock::new(containers.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Get a stored record by its address
    pub async fn get(
        &self,
        container: &str,
        partition_key: &str,
        id: &str,
    ) -> Option<NormalizedRecord> {
        let key = RecordKey {
            container: container.to_string(),
            partition_key: partition_key.to_string(),
            id: id.to_string(),
        };
        self.records.read().await.get(&key).cloned()
    }

    /// All records stored in a container
    pub async fn records_in(&self, container: &str) -> Vec<NormalizedRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.container == container)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Number of stored records across all containers
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Number of successful upsert calls, including overwrites
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "in-memory store marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(&self, container: &str, record: &NormalizedRecord) -> Result<(), StoreError> {
        self.check_available()?;

        let key = RecordKey {
            container: container.to_string(),
            partition_key: record.partition_key().as_str().to_string(),
            id: record.id().as_str().to_string(),
        };

        self.records.write().await.insert(key, record.clone());
        self.containers.write().await.insert(container.to_string());
        self.upserts.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn list_containers(&self, max_items: usize) -> Result<Vec<String>, StoreError> {
        self.check_available()?;

        Ok(self
            .containers
            .read()
            .await
            .iter()
            .take(max_items)
            .cloned()
            .collect())
    }
}
