//! # Comms Relay Core
//!
//! Core logic for the Comms Relay event ingestion pipeline.
//!
//! This crate decodes communication platform notifications (SMS received, chat
//! messages, thread and participant changes, call recordings), routes each one
//! to the handler for its kind and persists the resulting normalized records in
//! a document store with upsert semantics.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`RecordStore`],
//!   [`IngestMetrics`], [`TokenCredential`](credentials::TokenCredential))
//! - Infrastructure implementations live in [`adapters`] and are injected at
//!   start-up
//! - Every failure on the ingestion path propagates to the caller so the
//!   delivery infrastructure can redeliver
//!
//! ## Usage
//!
//! ```rust
//! use comms_relay_core::{events::parse_envelope, EventId};
//!
//! let event = parse_envelope(br#"{"id":"evt-1","eventType":"Custom.Event","data":{}}"#).unwrap();
//! assert_eq!(event.id, EventId::new("evt-1").unwrap());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Identifier of an inbound event, used as the idempotency key
///
/// Assigned by the delivery infrastructure and echoed as the `id` of every
/// record derived from the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Create new event ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "id".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EventId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EventId> for String {
    fn from(value: EventId) -> Self {
        value.0
    }
}

/// Grouping key that co-locates related records in the store
///
/// Derived from a kind-specific payload field (message, thread or call id),
/// never from the event id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Create new partition key with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "partitionKey".to_string(),
            });
        }

        if value.len() > 2048 {
            return Err(ValidationError::TooLong {
                field: "partitionKey".to_string(),
                max_length: 2048,
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartitionKey> for String {
    fn from(value: PartitionKey) -> Self {
        value.0
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Create timestamp from seconds since the Unix epoch
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        DateTime::from_timestamp(seconds, 0).map(Self)
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Format as an RFC 1123 HTTP date (`Tue, 01 Jan 2024 00:00:00 GMT`)
    pub fn to_http_date(&self) -> String {
        self.0.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add seconds to timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        let duration = chrono::Duration::seconds(seconds as i64);
        Self(self.0 + duration)
    }

    /// Subtract duration from timestamp
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Truncate an identifier for log output
///
/// Communication identifiers are long and partially sensitive, so log lines
/// only carry their first 20 characters.
pub fn truncate_for_log(value: &str) -> &str {
    match value.char_indices().nth(20) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Envelope parsing and event kinds
pub mod events;

/// Normalized record shapes persisted by the pipeline
pub mod records;

/// Per-kind event handlers
pub mod handlers;

/// Event routing
pub mod router;

/// Record store interface
pub mod store;

/// Store adapters (in-memory, filesystem, Cosmos DB)
pub mod adapters;

/// Credentials for platform and store access
pub mod credentials;

/// Environment-driven endpoint and credential settings
pub mod settings;

/// Periodic store health reporting
pub mod health;

/// Ingestion metrics collection
pub mod monitoring;

// Re-export key types for convenience
pub use adapters::{CosmosRecordStore, FilesystemRecordStore, InMemoryRecordStore};
pub use events::{parse_batch, parse_envelope, EnvelopeError, EventKind, InboundEvent};
pub use health::{HealthReporter, HealthSnapshot, StoreStatus};
pub use monitoring::{IngestMetrics, NoOpIngestMetrics};
pub use records::{
    ChatMessageRecord, NormalizedRecord, RecordingChunk, RecordingRecord, SmsDirection, SmsRecord,
};
pub use router::{EventRouter, IngestError, RouteOutcome};
pub use store::{RecordStore, StoreError};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
