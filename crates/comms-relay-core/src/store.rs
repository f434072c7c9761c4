//! # Record Store
//!
//! Interface to the document store holding normalized records.
//!
//! A record is addressed by `(container, partitionKey, id)`. Writing the same
//! address twice replaces the stored document (last write wins); the store
//! never holds two documents for one address.

use crate::records::NormalizedRecord;
use async_trait::async_trait;

/// Insert-or-replace document store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert a record into the named container
    ///
    /// Durable once this returns `Ok`. Implementations do not retry
    /// internally.
    ///
    /// # Errors
    ///
    /// - `StoreError::Unavailable` when the store cannot be reached
    /// - `StoreError::Rejected` when the store refuses the write
    async fn upsert(&self, container: &str, record: &NormalizedRecord) -> Result<(), StoreError>;

    /// List up to `max_items` container names
    ///
    /// Used as a lightweight reachability probe.
    async fn list_containers(&self, max_items: usize) -> Result<Vec<String>, StoreError>;
}

/// Record store failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Record store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Record store rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Record serialization failed: {message}")]
    Serialization { message: String },

    #[error("Record store is misconfigured: {message}")]
    Configuration { message: String },
}

impl StoreError {
    /// Check if a later redelivery may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
