//! Tests for store health reporting.

use super::*;
use crate::adapters::InMemoryRecordStore;
use crate::monitoring::NoOpIngestMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct HealthGauge {
    values: Mutex<Vec<bool>>,
}

impl IngestMetrics for HealthGauge {
    fn record_event_routed(&self, _kind: &str, _outcome: &str, _duration: Duration) {}
    fn record_event_failed(&self, _kind: &str, _is_transient: bool) {}
    fn record_malformed_envelope(&self) {}
    fn record_store_health(&self, healthy: bool) {
        self.values.lock().unwrap().push(healthy);
    }
}

/// Store that counts probes
#[derive(Default)]
struct CountingStore {
    probes: AtomicUsize,
}

#[async_trait::async_trait]
impl RecordStore for CountingStore {
    async fn upsert(
        &self,
        _container: &str,
        _record: &crate::records::NormalizedRecord,
    ) -> Result<(), crate::store::StoreError> {
        Ok(())
    }

    async fn list_containers(
        &self,
        _max_items: usize,
    ) -> Result<Vec<String>, crate::store::StoreError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["call-logs".to_string()])
    }
}

#[tokio::test]
async fn test_reachable_store_is_healthy() {
    let gauge = Arc::new(HealthGauge::default());
    let store = Arc::new(InMemoryRecordStore::with_containers(["call-logs"]));
    let reporter = HealthReporter::new(Some(store), gauge.clone(), DEFAULT_HEALTH_INTERVAL);

    let snapshot = reporter.check().await;

    assert_eq!(snapshot.store_status, StoreStatus::Healthy);
    assert_eq!(*gauge.values.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn test_unreachable_store_is_unhealthy_with_reason() {
    let store = Arc::new(InMemoryRecordStore::new());
    store.set_available(false);
    let reporter = HealthReporter::new(
        Some(store),
        Arc::new(NoOpIngestMetrics),
        DEFAULT_HEALTH_INTERVAL,
    );

    let snapshot = reporter.check().await;

    match snapshot.store_status {
        StoreStatus::Unhealthy { reason } => assert!(!reason.is_empty()),
        other => panic!("expected unhealthy, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unconfigured_store_is_not_configured_without_probe() {
    let gauge = Arc::new(HealthGauge::default());
    let reporter = HealthReporter::new(None, gauge.clone(), DEFAULT_HEALTH_INTERVAL);

    let snapshot = reporter.check().await;

    assert_eq!(snapshot.store_status, StoreStatus::NotConfigured);
    assert!(gauge.values.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_snapshot_is_replaced_each_check() {
    let store = Arc::new(InMemoryRecordStore::new());
    let reporter = HealthReporter::new(
        Some(store.clone()),
        Arc::new(NoOpIngestMetrics),
        DEFAULT_HEALTH_INTERVAL,
    );
    assert!(reporter.latest().await.is_none());

    reporter.check().await;
    assert_eq!(
        reporter.latest().await.unwrap().store_status,
        StoreStatus::Healthy
    );

    store.set_available(false);
    reporter.check().await;
    assert!(!reporter.latest().await.unwrap().store_status.is_healthy());
}

#[test]
fn test_snapshot_serialization() {
    let snapshot = HealthSnapshot {
        timestamp: Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
        store_status: StoreStatus::Unhealthy {
            reason: "connection refused".to_string(),
        },
    };

    let value = serde_json::to_value(&snapshot).unwrap();

    assert_eq!(value["storeStatus"], "unhealthy: connection refused");
    assert!(value["timestamp"].is_string());
}

#[test]
fn test_store_status_serializes_as_plain_string() {
    assert_eq!(
        serde_json::to_value(StoreStatus::Healthy).unwrap(),
        serde_json::json!("healthy")
    );
    assert_eq!(
        serde_json::to_value(StoreStatus::NotConfigured).unwrap(),
        serde_json::json!("not_configured")
    );
}

#[tokio::test(start_paused = true)]
async fn test_spawned_reporter_probes_on_schedule() {
    let store = Arc::new(CountingStore::default());
    let reporter = HealthReporter::new(
        Some(store.clone()),
        Arc::new(NoOpIngestMetrics),
        Duration::from_secs(300),
    );

    let handle = reporter.spawn();

    // First probe fires immediately, the next after one interval
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.probes.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(store.probes.load(Ordering::SeqCst), 2);

    handle.abort();
    assert!(reporter.latest().await.is_some());
}
