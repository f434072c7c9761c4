//! # Store Health Reporting
//!
//! Periodically probes the record store and publishes a [`HealthSnapshot`].
//!
//! A probe never raises: failures become [`StoreStatus::Unhealthy`] with the
//! error text, and a deployment without a store reports
//! [`StoreStatus::NotConfigured`] without attempting a connection. Each tick
//! replaces the previous snapshot.

use crate::monitoring::IngestMetrics;
use crate::store::RecordStore;
use crate::Timestamp;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;

/// Default interval between probes
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Reachability of the record store
///
/// Serializes as a flat string: `healthy`, `not_configured` or
/// `unhealthy: <reason>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreStatus {
    Healthy,
    Unhealthy { reason: String },
    NotConfigured,
}

impl StoreStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy { .. } => "unhealthy",
            Self::NotConfigured => "not_configured",
        }
    }
}

impl Serialize for StoreStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unhealthy { reason } => {
                serializer.serialize_str(&format!("unhealthy: {}", reason))
            }
            other => serializer.serialize_str(other.label()),
        }
    }
}

/// Result of one health probe
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub timestamp: Timestamp,
    pub store_status: StoreStatus,
}

/// Scheduled store health probe
#[derive(Clone)]
pub struct HealthReporter {
    store: Option<Arc<dyn RecordStore>>,
    metrics: Arc<dyn IngestMetrics>,
    interval: Duration,
    latest: Arc<RwLock<Option<HealthSnapshot>>>,
}

impl HealthReporter {
    /// Create a reporter; `store` is `None` when no store is configured
    pub fn new(
        store: Option<Arc<dyn RecordStore>>,
        metrics: Arc<dyn IngestMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            interval,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Interval between scheduled probes
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one probe and publish its snapshot
    pub async fn check(&self) -> HealthSnapshot {
        let store_status = match &self.store {
            None => StoreStatus::NotConfigured,
            Some(store) => match store.list_containers(1).await {
                Ok(_) => StoreStatus::Healthy,
                Err(e) => {
                    error!(error = %e, "Record store health check failed");
                    StoreStatus::Unhealthy {
                        reason: e.to_string(),
                    }
                }
            },
        };

        if !matches!(store_status, StoreStatus::NotConfigured) {
            self.metrics.record_store_health(store_status.is_healthy());
        }

        let snapshot = HealthSnapshot {
            timestamp: Timestamp::now(),
            store_status,
        };

        info!(
            timestamp = %snapshot.timestamp,
            store_status = snapshot.store_status.label(),
            "Health check complete"
        );

        *self.latest.write().await = Some(snapshot.clone());
        snapshot
    }

    /// Most recent snapshot, `None` before the first probe
    pub async fn latest(&self) -> Option<HealthSnapshot> {
        self.latest.read().await.clone()
    }

    /// Spawn the scheduled probe loop
    ///
    /// The first probe runs immediately. Abort the returned handle to stop.
    pub fn spawn(&self) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reporter.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                reporter.check().await;
            }
        })
    }
}
