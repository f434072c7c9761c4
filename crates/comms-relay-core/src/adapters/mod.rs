//! # Infrastructure Adapters
//!
//! Record store implementations: in-memory for tests and local runs, a
//! filesystem store for development, and the Cosmos DB REST adapter.

pub mod cosmos_store;
pub mod filesystem_store;
pub mod memory_store;

pub use cosmos_store::{CosmosAuth, CosmosRecordStore};
pub use filesystem_store::FilesystemRecordStore;
pub use memory_store::InMemoryRecordStore;
