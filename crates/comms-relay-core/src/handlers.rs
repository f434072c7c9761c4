//! # Per-Kind Event Handlers
//!
//! Field extraction for each known event kind. The persisting handlers build a
//! [`NormalizedRecord`] from the event's `data`; the chat thread and
//! participant handlers only log.
//!
//! Handlers are pure apart from logging. Writing the record is the router's
//! job, so every builder can be tested without a store.
//!
//! Optional payload fields that are absent become `None` (serialized as
//! `null`). A present field with the wrong JSON type fails the event, and so
//! does a partition key field that is absent, since the record cannot be
//! addressed without it.

use crate::events::InboundEvent;
use crate::records::{
    ChatMessageRecord, NormalizedRecord, RecordingChunk, RecordingRecord, SmsDirection, SmsRecord,
};
use crate::router::IngestError;
use crate::{truncate_for_log, PartitionKey, Timestamp, ValidationError};
use serde_json::{Map, Value};
use tracing::info;

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;

// ============================================================================
// Persisting Handlers
// ============================================================================

/// Build the record for an `SMSReceived` event
///
/// The partition key is the platform `messageId`.
pub fn build_sms_record(
    event: &InboundEvent,
    processed_at: Timestamp,
) -> Result<NormalizedRecord, IngestError> {
    let partition_key = partition_key(event, "messageId")?;
    let from = optional_string(event, "from")?;
    let to = optional_string(event, "to")?;

    info!(
        event_id = %event.id,
        from = from.as_deref().map(truncate_for_log).unwrap_or("<none>"),
        to = to.as_deref().map(truncate_for_log).unwrap_or("<none>"),
        "SMS received"
    );

    Ok(NormalizedRecord::Sms(SmsRecord {
        id: event.id.clone(),
        partition_key,
        direction: SmsDirection::Inbound,
        from,
        to,
        message: optional_string(event, "message")?,
        received_at: optional_string(event, "receivedTimestamp")?,
        processed_at,
    }))
}

/// Build the record for a `ChatMessageReceived` event
///
/// The partition key is the `threadId`; `messageBody` becomes `message`.
pub fn build_chat_message_record(
    event: &InboundEvent,
    processed_at: Timestamp,
) -> Result<NormalizedRecord, IngestError> {
    let partition_key = partition_key(event, "threadId")?;
    let sender_id = optional_string(event, "senderId")?;

    info!(
        event_id = %event.id,
        thread_id = truncate_for_log(partition_key.as_str()),
        sender_id = sender_id.as_deref().map(truncate_for_log).unwrap_or("<none>"),
        "Chat message received"
    );

    let timestamp = match optional_string(event, "composeTime")? {
        Some(compose_time) => Some(compose_time),
        None => optional_string(event, "transactionId")?,
    };

    Ok(NormalizedRecord::ChatMessage(ChatMessageRecord {
        id: event.id.clone(),
        partition_key,
        sender_id,
        message: optional_string(event, "messageBody")?,
        timestamp,
        processed_at,
    }))
}

/// Build the record for a `RecordingFileStatusUpdated` event
///
/// One chunk entry per element of `recordingStorageInfo.recordingChunks`, in
/// order. A missing storage info object yields an empty chunk list.
pub fn build_recording_record(
    event: &InboundEvent,
    processed_at: Timestamp,
) -> Result<NormalizedRecord, IngestError> {
    let partition_key = partition_key(event, "serverCallId")?;

    let storage_info = match event.data.get("recordingStorageInfo") {
        Some(Value::Object(info)) => Some(info),
        Some(Value::Null) | None => None,
        Some(_) => return Err(invalid_field(event, "recordingStorageInfo", "an object")),
    };

    let raw_chunks: &[Value] = match storage_info.and_then(|info| info.get("recordingChunks")) {
        Some(Value::Array(chunks)) => chunks.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => {
            return Err(invalid_field(
                event,
                "recordingStorageInfo.recordingChunks",
                "an array",
            ))
        }
    };

    let mut chunks = Vec::with_capacity(raw_chunks.len());
    for raw in raw_chunks {
        let Value::Object(chunk) = raw else {
            return Err(invalid_field(
                event,
                "recordingStorageInfo.recordingChunks",
                "an array of objects",
            ));
        };

        let chunk = RecordingChunk {
            content_location: string_in(event, chunk, "contentLocation")?,
            delete_location: string_in(event, chunk, "deleteLocation")?,
        };

        info!(
            event_id = %event.id,
            content_location = chunk.content_location.as_deref().unwrap_or("<none>"),
            "Recording available"
        );
        chunks.push(chunk);
    }

    let recording_duration_ms = match event.data.get("recordingDurationMs") {
        Some(Value::Null) | None => None,
        Some(value) => Some(
            value
                .as_i64()
                .ok_or_else(|| invalid_field(event, "recordingDurationMs", "an integer"))?,
        ),
    };

    Ok(NormalizedRecord::Recording(RecordingRecord {
        id: event.id.clone(),
        partition_key,
        status: "available".to_string(),
        chunks,
        recording_start_time: optional_string(event, "recordingStartTime")?,
        recording_duration_ms,
        processed_at,
    }))
}

// ============================================================================
// Log-Only Handlers
// ============================================================================

/// Log a `ChatThreadCreated` event
pub fn log_thread_created(event: &InboundEvent) -> Result<(), IngestError> {
    let thread_id = optional_string(event, "threadId")?;
    let created_by = optional_string(event, "createdBy")?;

    info!(
        event_id = %event.id,
        thread_id = thread_id.as_deref().map(truncate_for_log).unwrap_or("<none>"),
        created_by = created_by.as_deref().map(truncate_for_log).unwrap_or("<none>"),
        "Chat thread created"
    );

    Ok(())
}

/// Log a `ChatParticipantAdded` event, one line per added participant
pub fn log_participants_added(event: &InboundEvent) -> Result<(), IngestError> {
    let thread_id = optional_string(event, "threadId")?;
    let thread_id = thread_id.as_deref().map(truncate_for_log).unwrap_or("<none>");

    let participants: &[Value] = match event.data.get("participantsAdded") {
        Some(Value::Array(participants)) => participants.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => return Err(invalid_field(event, "participantsAdded", "an array")),
    };

    for participant in participants {
        let participant_id = participant
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default();

        info!(
            event_id = %event.id,
            thread_id,
            participant_id = truncate_for_log(participant_id),
            "Participant added to chat thread"
        );
    }

    Ok(())
}

// ============================================================================
// Field Extraction
// ============================================================================

fn partition_key(event: &InboundEvent, field: &str) -> Result<PartitionKey, IngestError> {
    let value = match event.data.get(field) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Null) | None => return Err(missing_field(event, field)),
        Some(_) => return Err(invalid_field(event, field, "a string")),
    };

    PartitionKey::new(value).map_err(|e| match e {
        ValidationError::Required { .. } => missing_field(event, field),
        other => IngestError::InvalidField {
            kind: event.event_type.clone(),
            field: field.to_string(),
            expected: other.to_string(),
        },
    })
}

fn optional_string(event: &InboundEvent, field: &str) -> Result<Option<String>, IngestError> {
    string_in(event, &event.data, field)
}

fn string_in(
    event: &InboundEvent,
    map: &Map<String, Value>,
    field: &str,
) -> Result<Option<String>, IngestError> {
    match map.get(field) {
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(invalid_field(event, field, "a string")),
    }
}

fn missing_field(event: &InboundEvent, field: &str) -> IngestError {
    IngestError::MissingField {
        kind: event.event_type.clone(),
        field: field.to_string(),
    }
}

fn invalid_field(event: &InboundEvent, field: &str, expected: &str) -> IngestError {
    IngestError::InvalidField {
        kind: event.event_type.clone(),
        field: field.to_string(),
        expected: expected.to_string(),
    }
}
