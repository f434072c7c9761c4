//! Tests for ingestion metrics.

use super::*;
use std::sync::{Arc, Mutex};

/// Test that NoOpIngestMetrics can be shared across threads.
#[test]
fn test_noop_metrics_is_shareable() {
    let metrics: Arc<dyn IngestMetrics> = Arc::new(NoOpIngestMetrics);
    let clone = Arc::clone(&metrics);

    let handle = std::thread::spawn(move || {
        clone.record_event_routed("sms_received", "persisted", Duration::from_millis(5));
    });
    handle.join().unwrap();

    metrics.record_event_failed("chat_message_received", true);
}

/// Test that every NoOpIngestMetrics method is callable.
#[test]
fn test_noop_metrics_accepts_all_calls() {
    let metrics = NoOpIngestMetrics;

    metrics.record_event_routed("unrecognized", "dropped", Duration::ZERO);
    metrics.record_event_failed("recording_file_status_updated", false);
    metrics.record_malformed_envelope();
    metrics.record_store_health(false);
}

#[derive(Default)]
struct CountingMetrics {
    routed: Mutex<Vec<(String, String)>>,
}

impl IngestMetrics for CountingMetrics {
    fn record_event_routed(&self, kind: &str, outcome: &str, _duration: Duration) {
        self.routed
            .lock()
            .unwrap()
            .push((kind.to_string(), outcome.to_string()));
    }

    fn record_event_failed(&self, _kind: &str, _is_transient: bool) {}

    fn record_malformed_envelope(&self) {}

    fn record_store_health(&self, _healthy: bool) {}
}

/// Test that a custom implementation works behind the trait object.
#[test]
fn test_custom_metrics_through_trait_object() {
    let counting = Arc::new(CountingMetrics::default());
    let metrics: Arc<dyn IngestMetrics> = counting.clone();

    metrics.record_event_routed("sms_received", "persisted", Duration::from_millis(1));

    let routed = counting.routed.lock().unwrap();
    assert_eq!(
        routed.as_slice(),
        &[("sms_received".to_string(), "persisted".to_string())]
    );
}
