//! # Filesystem Record Store
//!
//! Local filesystem implementation of [`RecordStore`] for development.
//!
//! Each record is one JSON document at
//! `{root}/{container}/{partitionKey}/{id}.json`. Path segments are
//! percent-encoded so partition keys containing separators stay inside their
//! directory. Segments whose encoding would not fit in a file name are
//! replaced by their SHA-256 digest.

use crate::records::NormalizedRecord;
use crate::store::{RecordStore, StoreError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[cfg(test)]
#[path = "filesystem_store_tests.rs"]
mod tests;

/// Longest encoded path segment kept verbatim
///
/// Leaves room for the `.{uuid}.tmp` suffix within the common 255-byte file
/// name limit.
const MAX_SEGMENT_LENGTH: usize = 160;

/// Filesystem-based record store
///
/// # Examples
///
/// ```no_run
/// use comms_relay_core::adapters::FilesystemRecordStore;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FilesystemRecordStore::new(PathBuf::from("./data/records")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemRecordStore {
    base_path: PathBuf,
}

impl FilesystemRecordStore {
    /// Create new filesystem record store
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the base directory cannot be
    /// created.
    pub async fn new(base_path: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("Failed to create base directory: {}", e),
            })?;

        Ok(Self { base_path })
    }

    /// Base directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Read a stored record back
    pub async fn get(
        &self,
        container: &str,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<NormalizedRecord>, StoreError> {
        let path = self.record_path(container, partition_key, id);

        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Unavailable {
                    message: format!("Failed to read record: {}", e),
                })
            }
        };

        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|e| StoreError::Serialization {
                message: format!("Failed to deserialize record: {}", e),
            })
    }

    fn record_path(&self, container: &str, partition_key: &str, id: &str) -> PathBuf {
        self.base_path
            .join(path_segment(container))
            .join(path_segment(partition_key))
            .join(format!("{}.json", path_segment(id)))
    }
}

#[async_trait]
impl RecordStore for FilesystemRecordStore {
    async fn upsert(&self, container: &str, record: &NormalizedRecord) -> Result<(), StoreError> {
        let record_path = self.record_path(
            container,
            record.partition_key().as_str(),
            record.id().as_str(),
        );

        if let Some(parent) = record_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable {
                    message: format!("Failed to create directory structure: {}", e),
                })?;
        }

        let json =
            serde_json::to_vec_pretty(record).map_err(|e| StoreError::Serialization {
                message: format!("Failed to serialize record: {}", e),
            })?;

        // Unique temp name so concurrent writers of one record never share a file
        let temp_path = record_path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("Failed to create temp file: {}", e),
            })?;

        file.write_all(&json)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("Failed to write record: {}", e),
            })?;

        file.sync_all()
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("Failed to flush record: {}", e),
            })?;
        drop(file);

        fs::rename(&temp_path, &record_path)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("Failed to move record into place: {}", e),
            })?;

        debug!(path = %record_path.display(), "Record written");
        Ok(())
    }

    async fn list_containers(&self, max_items: usize) -> Result<Vec<String>, StoreError> {
        let mut entries =
            fs::read_dir(&self.base_path)
                .await
                .map_err(|e| StoreError::Unavailable {
                    message: format!("Failed to read base directory: {}", e),
                })?;

        let mut containers = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("Failed to read directory entry: {}", e),
            })?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            let raw = entry.file_name().to_string_lossy().into_owned();
            let name = match urlencoding::decode(&raw) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => raw.clone(),
            };
            containers.push(name);
        }

        containers.sort();
        containers.truncate(max_items);
        Ok(containers)
    }
}

fn path_segment(value: &str) -> String {
    let encoded = urlencoding::encode(value).into_owned();
    if encoded.len() > MAX_SEGMENT_LENGTH {
        // `%~` never occurs in percent-encoded output, so digests cannot
        // collide with a short segment
        return format!("%~{:x}", Sha256::digest(value.as_bytes()));
    }
    // `.` and `..` must never resolve to a parent directory
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded,
    }
}
