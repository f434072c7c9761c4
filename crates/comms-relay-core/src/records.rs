//! # Normalized Records
//!
//! The document shapes written to the record store, one variant per persisted
//! event kind. Every record carries the originating event id as its `id` and a
//! kind-specific `partitionKey`.

use crate::{EventId, PartitionKey, Timestamp};
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;

/// Container holding SMS and recording records
pub const CALL_LOGS_CONTAINER: &str = "call-logs";

/// Container holding chat message records
pub const CHAT_HISTORY_CONTAINER: &str = "chat-history";

/// Direction of an SMS relative to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsDirection {
    Inbound,
}

/// Record derived from an `SMSReceived` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsRecord {
    pub id: EventId,
    /// The platform message id
    pub partition_key: PartitionKey,
    pub direction: SmsDirection,
    pub from: Option<String>,
    pub to: Option<String>,
    pub message: Option<String>,
    pub received_at: Option<String>,
    pub processed_at: Timestamp,
}

/// Record derived from a `ChatMessageReceived` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    pub id: EventId,
    /// The chat thread id
    pub partition_key: PartitionKey,
    pub sender_id: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<String>,
    pub processed_at: Timestamp,
}

/// One stored recording chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingChunk {
    pub content_location: Option<String>,
    pub delete_location: Option<String>,
}

/// Record derived from a `RecordingFileStatusUpdated` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRecord {
    pub id: EventId,
    /// The server call id
    pub partition_key: PartitionKey,
    pub status: String,
    pub chunks: Vec<RecordingChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_duration_ms: Option<i64>,
    pub processed_at: Timestamp,
}

/// A record ready to be upserted
///
/// Serializes with a `type` discriminator (`sms`, `chat_message`,
/// `recording`) next to the variant's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedRecord {
    Sms(SmsRecord),
    ChatMessage(ChatMessageRecord),
    Recording(RecordingRecord),
}

impl NormalizedRecord {
    /// Record id (the originating event id)
    pub fn id(&self) -> &EventId {
        match self {
            Self::Sms(record) => &record.id,
            Self::ChatMessage(record) => &record.id,
            Self::Recording(record) => &record.id,
        }
    }

    pub fn partition_key(&self) -> &PartitionKey {
        match self {
            Self::Sms(record) => &record.partition_key,
            Self::ChatMessage(record) => &record.partition_key,
            Self::Recording(record) => &record.partition_key,
        }
    }

    /// Default container for this record's kind
    pub fn container(&self) -> &'static str {
        match self {
            Self::Sms(_) | Self::Recording(_) => CALL_LOGS_CONTAINER,
            Self::ChatMessage(_) => CHAT_HISTORY_CONTAINER,
        }
    }

    /// Value of the `type` discriminator
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Sms(_) => "sms",
            Self::ChatMessage(_) => "chat_message",
            Self::Recording(_) => "recording",
        }
    }
}
