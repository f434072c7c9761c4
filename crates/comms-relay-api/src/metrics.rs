//! Metrics collection for the API service.
//!
//! Every metric is registered in a registry owned by the [`ServiceMetrics`]
//! instance rather than the process-global default, so several instances
//! (one per test, for example) can coexist.

use comms_relay_core::monitoring::IngestMetrics;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: Histogram,

    // Ingestion metrics
    pub events_routed_total: IntCounterVec,
    pub event_handling_duration: HistogramVec,
    pub events_failed_total: IntCounterVec,
    pub malformed_envelopes_total: IntCounter,

    // Store health
    pub store_healthy: IntGauge,

    // Platform calls
    pub platform_requests_total: IntCounterVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request processing time",
            )
            .buckets(vec![0.001, 0.01, 0.1, 1.0, 10.0]),
        )?;

        let events_routed_total = IntCounterVec::new(
            Opts::new("events_routed_total", "Events routed by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let event_handling_duration = HistogramVec::new(
            HistogramOpts::new(
                "event_handling_duration_seconds",
                "Time to handle one event",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0]),
            &["kind"],
        )?;
        let events_failed_total = IntCounterVec::new(
            Opts::new("events_failed_total", "Events that failed handling"),
            &["kind", "transient"],
        )?;
        let malformed_envelopes_total = IntCounter::new(
            "malformed_envelopes_total",
            "Deliveries rejected before routing",
        )?;

        let store_healthy = IntGauge::new(
            "record_store_healthy",
            "1 when the last store probe succeeded, 0 otherwise",
        )?;

        let platform_requests_total = IntCounterVec::new(
            Opts::new(
                "platform_requests_total",
                "Requests forwarded to the communication platform",
            ),
            &["operation", "result"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(events_routed_total.clone()))?;
        registry.register(Box::new(event_handling_duration.clone()))?;
        registry.register(Box::new(events_failed_total.clone()))?;
        registry.register(Box::new(malformed_envelopes_total.clone()))?;
        registry.register(Box::new(store_healthy.clone()))?;
        registry.register(Box::new(platform_requests_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration,
            events_routed_total,
            event_handling_duration,
            events_failed_total,
            malformed_envelopes_total,
            store_healthy,
            platform_requests_total,
        }))
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.http_request_duration.observe(duration.as_secs_f64());
    }

    pub fn record_platform_request(&self, operation: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.platform_requests_total
            .with_label_values(&[operation, result])
            .inc();
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

impl IngestMetrics for ServiceMetrics {
    fn record_event_routed(&self, kind: &str, outcome: &str, duration: Duration) {
        self.events_routed_total
            .with_label_values(&[kind, outcome])
            .inc();
        self.event_handling_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    fn record_event_failed(&self, kind: &str, is_transient: bool) {
        let transient = if is_transient { "true" } else { "false" };
        self.events_failed_total
            .with_label_values(&[kind, transient])
            .inc();
    }

    fn record_malformed_envelope(&self) {
        self.malformed_envelopes_total.inc();
    }

    fn record_store_health(&self, healthy: bool) {
        self.store_healthy.set(if healthy { 1 } else { 0 });
    }
}
