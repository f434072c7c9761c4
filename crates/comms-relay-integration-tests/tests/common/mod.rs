//! Common test utilities for comms-relay-api integration tests
//!
//! This module provides:
//! - A recording mock of the communication platform
//! - A record store wrapper that can be made to fail
//! - Helpers for building the application and sending requests

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use comms_relay_api::platform::{CreatedUser, IssuedToken, SmsRequest, SmsSendResult};
use comms_relay_api::{
    create_router, AppState, CommunicationPlatform, PlatformError, ServiceConfig, ServiceMetrics,
};
use comms_relay_core::{
    EventRouter, HealthReporter, InMemoryRecordStore, NormalizedRecord, RecordStore, StoreError,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

// ============================================================================
// Mock Communication Platform
// ============================================================================

/// Platform double recording every call
#[derive(Default)]
#[allow(dead_code)]
pub struct MockPlatform {
    calls: Mutex<Vec<String>>,
}

impl MockPlatform {
    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CommunicationPlatform for MockPlatform {
    async fn create_user(
        &self,
        scopes: &[String],
        expires_in_minutes: u32,
    ) -> Result<CreatedUser, PlatformError> {
        self.record(format!("create_user {} {}", scopes.join(","), expires_in_minutes));
        Ok(CreatedUser {
            user_id: "8:acs:11111111-2222-3333-4444-555555555555".to_string(),
            token: IssuedToken {
                token: "token-1".to_string(),
                expires_on: "2024-01-02T00:00:00Z".to_string(),
            },
        })
    }

    async fn issue_token(
        &self,
        user_id: &str,
        scopes: &[String],
    ) -> Result<IssuedToken, PlatformError> {
        self.record(format!("issue_token {} {}", user_id, scopes.join(",")));
        Ok(IssuedToken {
            token: "token-2".to_string(),
            expires_on: "2024-01-02T00:00:00Z".to_string(),
        })
    }

    async fn revoke_tokens(&self, user_id: &str) -> Result<(), PlatformError> {
        self.record(format!("revoke_tokens {}", user_id));
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), PlatformError> {
        self.record(format!("delete_user {}", user_id));
        if user_id.ends_with("missing") {
            return Err(PlatformError::Upstream {
                status: 404,
                code: Some("IdentityNotFound".to_string()),
                message: "Identity not found".to_string(),
            });
        }
        Ok(())
    }

    async fn send_sms(&self, request: &SmsRequest) -> Result<Vec<SmsSendResult>, PlatformError> {
        self.record(format!("send_sms {} -> {}", request.from, request.to.join(",")));
        Ok(request
            .to
            .iter()
            .enumerate()
            .map(|(index, to)| SmsSendResult {
                to: to.clone(),
                message_id: Some(format!("msg-{}", index + 1)),
                http_status: 202,
                successful: true,
                error_message: None,
            })
            .collect())
    }
}

// ============================================================================
// Failing Record Store
// ============================================================================

/// Store that can be switched into an outage after a number of writes
///
/// Successful writes are delegated to an in-memory store.
#[allow(dead_code)]
pub struct FlakyStore {
    pub inner: InMemoryRecordStore,
    writes_before_outage: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            writes_before_outage: AtomicUsize::new(usize::MAX),
        }
    }

    /// Let `count` more writes through, then fail every write
    pub fn fail_after(&self, count: usize) {
        self.writes_before_outage.store(count, Ordering::SeqCst);
    }

    /// End the outage
    pub fn recover(&self) {
        self.writes_before_outage.store(usize::MAX, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn upsert(&self, container: &str, record: &NormalizedRecord) -> Result<(), StoreError> {
        let allowed = self
            .writes_before_outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StoreError::Unavailable {
                message: "injected outage".to_string(),
            });
        }
        self.inner.upsert(container, record).await
    }

    async fn list_containers(&self, max_items: usize) -> Result<Vec<String>, StoreError> {
        self.inner.list_containers(max_items).await
    }
}

// ============================================================================
// App Builders
// ============================================================================

/// Build application state around a store and an optional platform
#[allow(dead_code)]
pub fn create_test_app_state(
    store: Option<Arc<dyn RecordStore>>,
    platform: Option<Arc<MockPlatform>>,
) -> AppState {
    let metrics = ServiceMetrics::new().unwrap();
    let router = EventRouter::new(store.clone(), metrics.clone());
    let health = HealthReporter::new(store, metrics.clone(), Duration::from_secs(300));

    let state = AppState::new(ServiceConfig::default(), router, health, metrics);
    match platform {
        Some(platform) => state.with_platform(platform, "https://contoso.communication.azure.com"),
        None => state,
    }
}

/// Send one request through a fresh router, returning status and JSON body
#[allow(dead_code)]
pub async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = create_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[allow(dead_code)]
pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
