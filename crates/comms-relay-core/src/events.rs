//! # Event Envelope Parsing
//!
//! Decodes inbound notifications into typed [`InboundEvent`]s.
//!
//! Notifications arrive in the Event Grid schema: an `id`, an `eventType`
//! tag, an informational `subject` and a kind-specific `data` object. The
//! parser only checks the envelope itself; field validation inside `data` is
//! left to the handler for the event's kind.

use crate::{EventId, ValidationError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;

/// Event type tag for inbound SMS messages
pub const SMS_RECEIVED: &str = "Microsoft.Communication.SMSReceived";

/// Event type tag for chat messages delivered to a thread
pub const CHAT_MESSAGE_RECEIVED: &str = "Microsoft.Communication.ChatMessageReceived";

/// Event type tag for newly created chat threads
pub const CHAT_THREAD_CREATED: &str = "Microsoft.Communication.ChatThreadCreated";

/// Event type tag for participants joining a chat thread
pub const CHAT_PARTICIPANT_ADDED: &str = "Microsoft.Communication.ChatParticipantAdded";

/// Event type tag for call recordings becoming available
pub const RECORDING_FILE_STATUS_UPDATED: &str =
    "Microsoft.Communication.RecordingFileStatusUpdated";

/// Event type tag of the Event Grid subscription handshake
pub const SUBSCRIPTION_VALIDATION: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

// ============================================================================
// Event Kinds
// ============================================================================

/// Closed set of event kinds the pipeline knows how to handle
///
/// Anything else lands in [`EventKind::Unrecognized`] so newer platform event
/// types can be delivered before the deployment knows about them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    SmsReceived,
    ChatMessageReceived,
    ChatThreadCreated,
    ChatParticipantAdded,
    RecordingFileStatusUpdated,
    SubscriptionValidation,
    Unrecognized(String),
}

impl EventKind {
    /// Resolve an event type tag by exact (case-sensitive) match
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            SMS_RECEIVED => Self::SmsReceived,
            CHAT_MESSAGE_RECEIVED => Self::ChatMessageReceived,
            CHAT_THREAD_CREATED => Self::ChatThreadCreated,
            CHAT_PARTICIPANT_ADDED => Self::ChatParticipantAdded,
            RECORDING_FILE_STATUS_UPDATED => Self::RecordingFileStatusUpdated,
            SUBSCRIPTION_VALIDATION => Self::SubscriptionValidation,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Get the event type tag for this kind
    pub fn as_str(&self) -> &str {
        match self {
            Self::SmsReceived => SMS_RECEIVED,
            Self::ChatMessageReceived => CHAT_MESSAGE_RECEIVED,
            Self::ChatThreadCreated => CHAT_THREAD_CREATED,
            Self::ChatParticipantAdded => CHAT_PARTICIPANT_ADDED,
            Self::RecordingFileStatusUpdated => RECORDING_FILE_STATUS_UPDATED,
            Self::SubscriptionValidation => SUBSCRIPTION_VALIDATION,
            Self::Unrecognized(event_type) => event_type,
        }
    }

    /// Short label used for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::SmsReceived => "sms_received",
            Self::ChatMessageReceived => "chat_message_received",
            Self::ChatThreadCreated => "chat_thread_created",
            Self::ChatParticipantAdded => "chat_participant_added",
            Self::RecordingFileStatusUpdated => "recording_file_status_updated",
            Self::SubscriptionValidation => "subscription_validation",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Inbound Event
// ============================================================================

/// A decoded notification envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundEvent {
    pub id: EventId,
    pub event_type: String,
    #[serde(skip)]
    pub kind: EventKind,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub event_time: Option<String>,
    pub data_version: Option<String>,
    pub data: Map<String, Value>,
}

impl InboundEvent {
    /// Decode a single envelope from an already-parsed JSON value
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let mut envelope = match value {
            Value::Object(map) => map,
            other => {
                return Err(EnvelopeError::NotAnObject {
                    found: json_type_name(&other).to_string(),
                })
            }
        };

        let id = match envelope.get("id") {
            Some(Value::String(id)) => EventId::new(id.as_str())?,
            Some(other) => {
                return Err(EnvelopeError::InvalidFieldType {
                    field: "id".to_string(),
                    expected: "string".to_string(),
                    found: json_type_name(other).to_string(),
                })
            }
            None => {
                return Err(EnvelopeError::MissingField {
                    field: "id".to_string(),
                })
            }
        };

        let event_type = match envelope.get("eventType").or_else(|| envelope.get("event_type")) {
            Some(Value::String(event_type)) if !event_type.is_empty() => event_type.clone(),
            Some(Value::String(_)) | None => {
                return Err(EnvelopeError::MissingField {
                    field: "eventType".to_string(),
                })
            }
            Some(other) => {
                return Err(EnvelopeError::InvalidFieldType {
                    field: "eventType".to_string(),
                    expected: "string".to_string(),
                    found: json_type_name(other).to_string(),
                })
            }
        };

        let data = match envelope.remove("data") {
            Some(Value::Object(data)) => data,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(EnvelopeError::InvalidFieldType {
                    field: "data".to_string(),
                    expected: "object".to_string(),
                    found: json_type_name(&other).to_string(),
                })
            }
        };

        let optional_string = |key: &str| {
            envelope
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Ok(Self {
            id,
            kind: EventKind::from_event_type(&event_type),
            event_type,
            subject: optional_string("subject"),
            topic: optional_string("topic"),
            event_time: optional_string("eventTime"),
            data_version: optional_string("dataVersion"),
            data,
        })
    }

    /// Validation code carried by an Event Grid subscription handshake
    ///
    /// Returns `None` for every other kind of event.
    pub fn subscription_validation_code(&self) -> Option<&str> {
        if self.kind != EventKind::SubscriptionValidation {
            return None;
        }

        self.data.get("validationCode").and_then(Value::as_str)
    }
}

/// Parse one envelope from raw bytes
pub fn parse_envelope(body: &[u8]) -> Result<InboundEvent, EnvelopeError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| EnvelopeError::InvalidJson {
        message: e.to_string(),
    })?;

    InboundEvent::from_value(value)
}

/// Parse a delivery that holds either one envelope or an array of envelopes
///
/// A single malformed element fails the whole batch.
pub fn parse_batch(body: &[u8]) -> Result<Vec<InboundEvent>, EnvelopeError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| EnvelopeError::InvalidJson {
        message: e.to_string(),
    })?;

    match value {
        Value::Array(items) => items.into_iter().map(InboundEvent::from_value).collect(),
        object @ Value::Object(_) => Ok(vec![InboundEvent::from_value(object)?]),
        other => Err(EnvelopeError::NotAnObject {
            found: json_type_name(&other).to_string(),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Malformed envelope failures
///
/// Every variant means the notification could not be decoded; none of them
/// is retried by the pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Envelope is not valid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Envelope must be a JSON object, got {found}")]
    NotAnObject { found: String },

    #[error("Envelope field '{field}' is required")]
    MissingField { field: String },

    #[error("Envelope field '{field}' must be a {expected}, got {found}")]
    InvalidFieldType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Envelope id is invalid: {0}")]
    InvalidId(#[from] ValidationError),
}
