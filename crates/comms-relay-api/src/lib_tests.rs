//! Tests for the HTTP routes, handlers and middleware.

use super::*;
use crate::platform::{CreatedUser, IssuedToken, SmsRequest, SmsSendResult};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use comms_relay_core::{InMemoryRecordStore, StoreStatus};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tower::ServiceExt;

// ============================================================================
// Mock CommunicationPlatform
// ============================================================================

/// Test double that records every call in order
#[derive(Default)]
struct MockPlatform {
    calls: Mutex<Vec<String>>,
    fail_with: Option<PlatformError>,
}

impl MockPlatform {
    fn failing(error: PlatformError) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_with: Some(error),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), PlatformError> {
        self.calls.lock().unwrap().push(call);
        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CommunicationPlatform for MockPlatform {
    async fn create_user(
        &self,
        scopes: &[String],
        expires_in_minutes: u32,
    ) -> Result<CreatedUser, PlatformError> {
        self.record(format!("create_user {} {}", scopes.join(","), expires_in_minutes))?;
        Ok(CreatedUser {
            user_id: "8:acs:00000000-0000-0000-0000-000000000001".to_string(),
            token: IssuedToken {
                token: "eyJ0".to_string(),
                expires_on: "2024-01-02T00:00:00Z".to_string(),
            },
        })
    }

    async fn issue_token(
        &self,
        user_id: &str,
        scopes: &[String],
    ) -> Result<IssuedToken, PlatformError> {
        self.record(format!("issue_token {} {}", user_id, scopes.join(",")))?;
        Ok(IssuedToken {
            token: "eyJ1".to_string(),
            expires_on: "2024-01-02T00:00:00Z".to_string(),
        })
    }

    async fn revoke_tokens(&self, user_id: &str) -> Result<(), PlatformError> {
        self.record(format!("revoke_tokens {}", user_id))
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), PlatformError> {
        self.record(format!("delete_user {}", user_id))
    }

    async fn send_sms(&self, request: &SmsRequest) -> Result<Vec<SmsSendResult>, PlatformError> {
        self.record(format!("send_sms {}", request.to.join(",")))?;
        Ok(request
            .to
            .iter()
            .enumerate()
            .map(|(index, to)| SmsSendResult {
                to: to.clone(),
                message_id: Some(format!("sms-{}", index + 1)),
                http_status: 202,
                successful: true,
                error_message: None,
            })
            .collect())
    }
}

// ============================================================================
// Test helpers
// ============================================================================

struct TestApp {
    state: AppState,
    store: Arc<InMemoryRecordStore>,
}

fn test_app(platform: Option<Arc<MockPlatform>>) -> TestApp {
    let metrics = ServiceMetrics::new().unwrap();
    let store = Arc::new(InMemoryRecordStore::with_containers(["call-logs"]));
    let router = EventRouter::new(Some(store.clone()), metrics.clone());
    let health = HealthReporter::new(Some(store.clone()), metrics.clone(), Duration::from_secs(300));

    let mut state = AppState::new(ServiceConfig::default(), router, health, metrics);
    if let Some(platform) = platform {
        state = state.with_platform(platform, "https://contoso.communication.azure.com");
    }

    TestApp { state, store }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = create_router(app.state.clone())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, headers, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// Health Tests
// ============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_service_and_version() {
        let app = test_app(None);

        let (status, _, body) = send(&app, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "acs-api");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_readiness_reports_endpoint() {
        let app = test_app(Some(Arc::new(MockPlatform::default())));

        let (status, _, body) = send(&app, get("/health/ready")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["acs_endpoint"], "https://contoso.communication.azure.com");
    }

    #[tokio::test]
    async fn test_readiness_without_platform_is_validation_error() {
        let app = test_app(None);

        let (status, _, body) = send(&app, get("/health/ready")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "validation_error");
    }

    #[tokio::test]
    async fn test_store_health_pending_until_first_probe() {
        let app = test_app(None);

        let (status, _, body) = send(&app, get("/health/store")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "pending");
    }

    #[tokio::test]
    async fn test_store_health_reflects_latest_probe() {
        let app = test_app(None);

        app.state.health.check().await;
        let (status, _, body) = send(&app, get("/health/store")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["storeStatus"], "healthy");

        app.store.set_available(false);
        let snapshot = app.state.health.check().await;
        assert!(matches!(snapshot.store_status, StoreStatus::Unhealthy { .. }));

        let (status, _, body) = send(&app, get("/health/store")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["storeStatus"]
            .as_str()
            .unwrap()
            .starts_with("unhealthy: "));
    }
}

// ============================================================================
// Event Ingestion Tests
// ============================================================================

mod ingestion_tests {
    use super::*;

    fn sms_envelope(id: &str, message_id: &str) -> Value {
        json!({
            "id": id,
            "eventType": "Microsoft.Communication.SMSReceived",
            "subject": "/phonenumber/+2",
            "data": {
                "messageId": message_id,
                "from": "+1",
                "to": "+2",
                "message": "hi",
                "receivedTimestamp": "2024-01-01T00:00:00Z"
            }
        })
    }

    #[tokio::test]
    async fn test_single_envelope_is_persisted() {
        let app = test_app(None);

        let (status, _, body) =
            send(&app, post_json("/api/v1/events", sms_envelope("evt-1", "m1"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processed"], 1);
        assert_eq!(body["outcomes"][0]["outcome"], "persisted");
        assert!(app.store.get("call-logs", "m1", "evt-1").await.is_some());
    }

    #[tokio::test]
    async fn test_subscription_validation_is_answered() {
        let app = test_app(None);
        let handshake = json!([{
            "id": "2d1781af-3a4c-4d7c-bd0c-e34b19da4e66",
            "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent",
            "subject": "",
            "data": { "validationCode": "512d38b6-c7b8-40c8-89fe-f46f9e9622b6" }
        }]);

        let (status, _, body) = send(&app, post_json("/api/v1/events", handshake)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "validationResponse": "512d38b6-c7b8-40c8-89fe-f46f9e9622b6" })
        );
        assert!(app.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_rejected() {
        let app = test_app(None);

        let (status, _, body) = send(
            &app,
            post_json("/api/v1/events", json!({ "eventType": "Custom.Event" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "malformed_envelope");
        assert_eq!(app.state.metrics.malformed_envelopes_total.get(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_asks_for_redelivery() {
        let app = test_app(None);
        app.store.set_available(false);

        let (status, headers, body) =
            send(&app, post_json("/api/v1/events", sms_envelope("evt-1", "m1"))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(headers.contains_key("retry-after"));
        assert_eq!(body["type"], "store_unavailable");
    }
}

// ============================================================================
// Identity Tests
// ============================================================================

mod identity_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_user_with_defaults() {
        let platform = Arc::new(MockPlatform::default());
        let app = test_app(Some(platform.clone()));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/identity/users")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user_id"], "8:acs:00000000-0000-0000-0000-000000000001");
        assert_eq!(body["token"], "eyJ0");
        assert_eq!(body["expires_on"], "2024-01-02T00:00:00Z");
        assert_eq!(platform.calls(), vec!["create_user voip,chat 1440"]);
    }

    #[tokio::test]
    async fn test_create_user_rejects_out_of_range_expiry() {
        let platform = Arc::new(MockPlatform::default());
        let app = test_app(Some(platform.clone()));

        let (status, _, body) = send(
            &app,
            post_json(
                "/api/v1/identity/users",
                json!({ "token_expires_hours": 48 }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "validation_error");
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_issue_token_forwards_scopes() {
        let platform = Arc::new(MockPlatform::default());
        let app = test_app(Some(platform.clone()));

        let (status, _, body) = send(
            &app,
            post_json(
                "/api/v1/identity/users/8:acs:user-1/token",
                json!({ "scopes": ["chat"] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token"], "eyJ1");
        assert_eq!(platform.calls(), vec!["issue_token 8:acs:user-1 chat"]);
    }

    #[tokio::test]
    async fn test_delete_user_revokes_before_deleting() {
        let platform = Arc::new(MockPlatform::default());
        let app = test_app(Some(platform.clone()));

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/v1/identity/users/8:acs:user-1")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
        assert_eq!(
            platform.calls(),
            vec!["revoke_tokens 8:acs:user-1", "delete_user 8:acs:user-1"]
        );
    }

    #[tokio::test]
    async fn test_upstream_error_passes_status_through() {
        let platform = Arc::new(MockPlatform::failing(PlatformError::Upstream {
            status: 404,
            code: Some("IdentityNotFound".to_string()),
            message: "Identity not found".to_string(),
        }));
        let app = test_app(Some(platform.clone()));

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/v1/identity/users/8:acs:missing")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "acs_error");
        assert_eq!(body["status_code"], 404);
        // Delete is never attempted after a failed revoke
        assert_eq!(platform.calls(), vec!["revoke_tokens 8:acs:missing"]);
    }

    #[tokio::test]
    async fn test_identity_without_platform_is_validation_error() {
        let app = test_app(None);

        let (status, _, body) =
            send(&app, post_json("/api/v1/identity/users", json!({}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ACS_ENDPOINT environment variable not set");
    }
}

// ============================================================================
// SMS Tests
// ============================================================================

mod sms_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_sms_returns_first_result() {
        let platform = Arc::new(MockPlatform::default());
        let app = test_app(Some(platform.clone()));

        let (status, _, body) = send(
            &app,
            post_json(
                "/api/v1/sms/send",
                json!({ "from": "+1", "to": "+2", "message": "hi" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "message_id": "sms-1", "to": "+2", "successful": true, "http_status": 202 })
        );
    }

    #[tokio::test]
    async fn test_send_sms_requires_body() {
        let app = test_app(Some(Arc::new(MockPlatform::default())));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/sms/send")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Request body required");
    }

    #[tokio::test]
    async fn test_send_sms_reports_missing_field() {
        let app = test_app(Some(Arc::new(MockPlatform::default())));

        let (status, _, body) = send(
            &app,
            post_json("/api/v1/sms/send", json!({ "from": "+1", "to": "+2" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required field: message");
    }

    #[tokio::test]
    async fn test_bulk_sms_lists_every_recipient() {
        let platform = Arc::new(MockPlatform::default());
        let app = test_app(Some(platform.clone()));

        let (status, _, body) = send(
            &app,
            post_json(
                "/api/v1/sms/send-bulk",
                json!({ "from": "+1", "to": ["+2", "+3"], "message": "hi" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
        assert_eq!(body["results"][1]["to"], "+3");
        assert_eq!(platform.calls(), vec!["send_sms +2,+3"]);
    }

    #[tokio::test]
    async fn test_invalid_json_is_validation_error() {
        let app = test_app(Some(Arc::new(MockPlatform::default())));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/sms/send")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "validation_error");
    }
}

// ============================================================================
// Middleware Tests
// ============================================================================

mod middleware_tests {
    use super::*;

    #[tokio::test]
    async fn test_correlation_id_is_echoed() {
        let app = test_app(None);

        let request = Request::builder()
            .uri("/health")
            .header("x-correlation-id", "corr-123")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = send(&app, request).await;

        assert_eq!(headers.get("x-correlation-id").unwrap(), "corr-123");
    }

    #[tokio::test]
    async fn test_correlation_id_is_generated_when_absent() {
        let app = test_app(None);

        let (_, headers, _) = send(&app, get("/health")).await;

        let generated = headers.get("x-correlation-id").unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());
    }

    #[tokio::test]
    async fn test_metrics_label_requests_by_route_template() {
        let app = test_app(Some(Arc::new(MockPlatform::default())));

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/v1/identity/users/8:acs:user-1")
            .body(Body::empty())
            .unwrap();
        send(&app, request).await;

        let (status, _, body) = send(&app, get("/metrics")).await;

        assert_eq!(status, StatusCode::OK);
        let text = body.as_str().unwrap();
        assert!(text.contains("path=\"/api/v1/identity/users/{user_id}\""));
        assert!(!text.contains("8:acs:user-1"));
    }
}
