//! # Event Routing
//!
//! Dispatches each decoded event to the handler for its kind and persists the
//! resulting record.
//!
//! Routing rules:
//! - At most one handler runs per event
//! - Unrecognized kinds are logged and dropped without failing the delivery
//! - Handler and store failures propagate unchanged so the delivery
//!   infrastructure can redeliver

use crate::events::{parse_batch, EnvelopeError, EventKind, InboundEvent};
use crate::handlers;
use crate::monitoring::IngestMetrics;
use crate::records::{NormalizedRecord, CALL_LOGS_CONTAINER, CHAT_HISTORY_CONTAINER};
use crate::store::{RecordStore, StoreError};
use crate::{truncate_for_log, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;

// ============================================================================
// Outcomes and Configuration
// ============================================================================

/// What happened to a routed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// A record was upserted into the named container
    Persisted { container: String },
    /// The kind is log-only; nothing was written
    Logged,
    /// A record was built but no store is configured
    Skipped,
    /// The kind is not recognized
    Dropped,
}

impl RouteOutcome {
    /// Short label used for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Persisted { .. } => "persisted",
            Self::Logged => "logged",
            Self::Skipped => "skipped",
            Self::Dropped => "dropped",
        }
    }
}

/// Container names records are written to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerNames {
    /// SMS and recording records
    pub call_logs: String,
    /// Chat message records
    pub chat_history: String,
}

impl Default for ContainerNames {
    fn default() -> Self {
        Self {
            call_logs: CALL_LOGS_CONTAINER.to_string(),
            chat_history: CHAT_HISTORY_CONTAINER.to_string(),
        }
    }
}

impl ContainerNames {
    /// Container a record belongs in
    pub fn for_record(&self, record: &NormalizedRecord) -> &str {
        match record {
            NormalizedRecord::Sms(_) | NormalizedRecord::Recording(_) => &self.call_logs,
            NormalizedRecord::ChatMessage(_) => &self.chat_history,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routes decoded events to their handlers
///
/// The store is optional: without one, persisting handlers still extract and
/// log their fields and the event completes as [`RouteOutcome::Skipped`].
#[derive(Clone)]
pub struct EventRouter {
    store: Option<Arc<dyn RecordStore>>,
    metrics: Arc<dyn IngestMetrics>,
    containers: ContainerNames,
}

impl EventRouter {
    /// Create a router writing to the default containers
    pub fn new(store: Option<Arc<dyn RecordStore>>, metrics: Arc<dyn IngestMetrics>) -> Self {
        Self {
            store,
            metrics,
            containers: ContainerNames::default(),
        }
    }

    /// Override the container names
    pub fn with_containers(mut self, containers: ContainerNames) -> Self {
        self.containers = containers;
        self
    }

    /// Check whether a record store is configured
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Decode a delivery body into events
    ///
    /// Records a malformed-envelope metric when decoding fails.
    pub fn parse_delivery(&self, body: &[u8]) -> Result<Vec<InboundEvent>, IngestError> {
        parse_batch(body).map_err(|e| {
            warn!(error = %e, "Rejecting malformed envelope");
            self.metrics.record_malformed_envelope();
            IngestError::MalformedEnvelope(e)
        })
    }

    /// Decode a delivery body and route every event in it
    pub async fn ingest(&self, body: &[u8]) -> Result<Vec<RouteOutcome>, IngestError> {
        let events = self.parse_delivery(body)?;
        self.route_batch(&events).await
    }

    /// Route events one at a time, in order
    ///
    /// Stops at the first failure. Events routed before the failure keep
    /// their effects; redelivering the batch is safe because writes are
    /// upserts.
    pub async fn route_batch(
        &self,
        events: &[InboundEvent],
    ) -> Result<Vec<RouteOutcome>, IngestError> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(self.route(event).await?);
        }
        Ok(outcomes)
    }

    /// Route a single event to the handler for its kind
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn route(&self, event: &InboundEvent) -> Result<RouteOutcome, IngestError> {
        let started = Instant::now();
        let kind = event.kind.label();

        let result = self.dispatch(event).await;

        match &result {
            Ok(outcome) => {
                debug!(kind, outcome = outcome.label(), "Event routed");
                self.metrics
                    .record_event_routed(kind, outcome.label(), started.elapsed());
            }
            Err(e) => {
                error!(kind, error = %e, transient = e.is_transient(), "Event handling failed");
                self.metrics.record_event_failed(kind, e.is_transient());
            }
        }

        result
    }

    async fn dispatch(&self, event: &InboundEvent) -> Result<RouteOutcome, IngestError> {
        let processed_at = Timestamp::now();

        match &event.kind {
            EventKind::SmsReceived => {
                let record = handlers::build_sms_record(event, processed_at)?;
                self.persist(record).await
            }
            EventKind::ChatMessageReceived => {
                let record = handlers::build_chat_message_record(event, processed_at)?;
                self.persist(record).await
            }
            EventKind::RecordingFileStatusUpdated => {
                let record = handlers::build_recording_record(event, processed_at)?;
                self.persist(record).await
            }
            EventKind::ChatThreadCreated => {
                handlers::log_thread_created(event)?;
                Ok(RouteOutcome::Logged)
            }
            EventKind::ChatParticipantAdded => {
                handlers::log_participants_added(event)?;
                Ok(RouteOutcome::Logged)
            }
            EventKind::SubscriptionValidation => {
                info!("Subscription validation event received");
                Ok(RouteOutcome::Logged)
            }
            EventKind::Unrecognized(event_type) => {
                warn!(event_type = %event_type, "Unrecognized event kind, dropping");
                Ok(RouteOutcome::Dropped)
            }
        }
    }

    async fn persist(&self, record: NormalizedRecord) -> Result<RouteOutcome, IngestError> {
        let Some(store) = &self.store else {
            info!(
                record_id = %record.id(),
                record_type = record.type_name(),
                "Record store not configured, skipping write"
            );
            return Ok(RouteOutcome::Skipped);
        };

        let container = self.containers.for_record(&record);
        store.upsert(container, &record).await?;

        info!(
            record_id = %record.id(),
            partition_key = truncate_for_log(record.partition_key().as_str()),
            container,
            "Record persisted"
        );

        Ok(RouteOutcome::Persisted {
            container: container.to_string(),
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures while ingesting a delivery
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] EnvelopeError),

    #[error("Event {kind} is missing required field '{field}'")]
    MissingField { kind: String, field: String },

    #[error("Event {kind} field '{field}' must be {expected}")]
    InvalidField {
        kind: String,
        field: String,
        expected: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Check if redelivering the event may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::MalformedEnvelope(_) | Self::MissingField { .. } | Self::InvalidField { .. } => {
                false
            }
        }
    }
}
