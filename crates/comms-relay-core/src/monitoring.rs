//! Ingestion metrics.
//!
//! The pipeline reports what it does through the [`IngestMetrics`] trait; the
//! HTTP layer implements it with Prometheus. Recording a metric never fails and
//! never affects event handling.
//!
//! # Examples
//!
//! ```rust
//! use comms_relay_core::monitoring::{IngestMetrics, NoOpIngestMetrics};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let metrics: Arc<dyn IngestMetrics> = Arc::new(NoOpIngestMetrics);
//!
//! metrics.record_event_routed("sms_received", "persisted", Duration::from_millis(12));
//! metrics.record_store_health(true);
//! ```

use std::time::Duration;

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;

/// Metrics sink for the ingestion pipeline
///
/// All methods take `&self` so one collector can be shared as
/// `Arc<dyn IngestMetrics>` across request tasks.
pub trait IngestMetrics: Send + Sync {
    /// Record one routed event.
    ///
    /// # Parameters
    ///
    /// - `kind`: Event kind label (e.g. `sms_received`, `unrecognized`)
    /// - `outcome`: `persisted`, `logged`, `skipped` or `dropped`
    /// - `duration`: Time spent handling the event
    fn record_event_routed(&self, kind: &str, outcome: &str, duration: Duration);

    /// Record an event that failed handling.
    ///
    /// # Parameters
    ///
    /// - `kind`: Event kind label
    /// - `is_transient`: Whether redelivery may succeed
    fn record_event_failed(&self, kind: &str, is_transient: bool);

    /// Record a delivery rejected before routing because its envelope was malformed.
    fn record_malformed_envelope(&self);

    /// Record the result of a store health probe (`true` = healthy).
    fn record_store_health(&self, healthy: bool);
}

/// Metrics sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpIngestMetrics;

impl IngestMetrics for NoOpIngestMetrics {
    fn record_event_routed(&self, _kind: &str, _outcome: &str, _duration: Duration) {
        // No-op
    }

    fn record_event_failed(&self, _kind: &str, _is_transient: bool) {
        // No-op
    }

    fn record_malformed_envelope(&self) {
        // No-op
    }

    fn record_store_health(&self, _healthy: bool) {
        // No-op
    }
}
