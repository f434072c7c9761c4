//! # Comms Relay HTTP Service
//!
//! HTTP layer for the Comms Relay event ingestion pipeline and the thin REST
//! facade over the communication platform.
//!
//! This service provides:
//! - Event Grid ingestion endpoint (`POST /api/v1/events`)
//! - Identity endpoints (create user, issue token, delete user)
//! - SMS endpoints (single and bulk send)
//! - Health, readiness and store health endpoints
//! - Prometheus metrics endpoint

pub mod config;
pub mod errors;
pub mod metrics;
pub mod platform;
pub mod responses;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

pub use config::{HealthConfig, LoggingConfig, ServerConfig, ServiceConfig, StoreConfig};
pub use errors::{ApiError, ConfigError, ServiceError};
pub use metrics::ServiceMetrics;
pub use platform::{AcsAuth, AcsRestClient, CommunicationPlatform, PlatformError};

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use bytes::Bytes;
use comms_relay_core::{truncate_for_log, EventRouter, HealthReporter};
use responses::{
    BulkSmsRequest, BulkSmsResponse, CreateUserRequest, CreateUserResponse,
    EventDeliveryResponse, HealthResponse, IssueTokenRequest, ReadinessResponse, SendSmsRequest,
    SmsSendResponse, SubscriptionValidationResponse, TokenResponse,
};
use serde::de::DeserializeOwned;
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Routes ingested events to their handlers
    pub router: EventRouter,

    /// Communication platform client, absent when no endpoint is configured
    pub platform: Option<Arc<dyn CommunicationPlatform>>,

    /// Endpoint reported by the readiness check
    pub platform_endpoint: Option<String>,

    /// Latest store health snapshot
    pub health: HealthReporter,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state without a platform client
    pub fn new(
        config: ServiceConfig,
        router: EventRouter,
        health: HealthReporter,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            router,
            platform: None,
            platform_endpoint: None,
            health,
            metrics,
        }
    }

    /// Attach the communication platform client
    pub fn with_platform(
        mut self,
        platform: Arc<dyn CommunicationPlatform>,
        endpoint: impl Into<String>,
    ) -> Self {
        self.platform = Some(platform);
        self.platform_endpoint = Some(endpoint.into());
        self
    }

    fn platform(&self) -> Result<&Arc<dyn CommunicationPlatform>, ApiError> {
        self.platform.as_ref().ok_or(ApiError::PlatformNotConfigured)
    }

    /// Count a platform call and convert its error
    fn track<T>(&self, operation: &str, result: Result<T, PlatformError>) -> Result<T, ApiError> {
        self.metrics
            .record_platform_request(operation, result.is_ok());
        result.map_err(|e| {
            warn!(
                operation,
                error = %e,
                transient = e.is_transient(),
                "Platform request failed"
            );
            ApiError::from(e)
        })
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/health/ready", get(handle_readiness_check))
        .route("/health/store", get(handle_store_health));

    let identity_routes = Router::new()
        .route("/api/v1/identity/users", post(create_user))
        .route("/api/v1/identity/users/{user_id}", delete(delete_user))
        .route("/api/v1/identity/users/{user_id}/token", post(issue_token));

    let sms_routes = Router::new()
        .route("/api/v1/sms/send", post(send_sms))
        .route("/api/v1/sms/send-bulk", post(send_bulk_sms));

    let event_routes = Router::new().route("/api/v1/events", post(handle_event_delivery));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let mut router = Router::new()
        .merge(health_routes)
        .merge(identity_routes)
        .merge(sms_routes)
        .merge(event_routes)
        .merge(observability_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(state.config.server.max_body_size))
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        );

    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Start HTTP server and run until a shutdown signal arrives
pub async fn start_server(state: AppState) -> Result<(), ServiceError> {
    let address = format!("{}:{}", state.config.server.host, state.config.server.port);
    let addr: SocketAddr = address.parse().map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("Invalid listen address '{}': {}", address, e),
        })
    })?;

    let app = create_router(state);

    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.to_string(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    // In-flight requests complete before the server returns
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

// ============================================================================
// Event Ingestion Handler
// ============================================================================

/// Handle an Event Grid delivery
///
/// The body is a single envelope or an array of envelopes. A subscription
/// validation handshake is answered with its code and nothing is routed.
/// Otherwise events are routed in order and the first failure fails the
/// request, so Event Grid redelivers the batch.
#[instrument(skip(state, body), fields(body_size = body.len()))]
async fn handle_event_delivery(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let events = state.router.parse_delivery(&body)?;

    if let Some(code) = events
        .iter()
        .find_map(|event| event.subscription_validation_code())
    {
        info!("Answering event subscription validation handshake");
        return Ok(Json(SubscriptionValidationResponse {
            validation_response: code.to_string(),
        })
        .into_response());
    }

    let outcomes = state.router.route_batch(&events).await?;

    info!(processed = outcomes.len(), "Event delivery processed");

    Ok(Json(EventDeliveryResponse {
        processed: outcomes.len(),
        outcomes,
    })
    .into_response())
}

// ============================================================================
// Identity Handlers
// ============================================================================

/// Create a communication user and its first token
#[instrument(skip(state, body))]
async fn create_user(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
    let request: CreateUserRequest = parse_optional_body(&body)?;
    let (scopes, expires_in_minutes) = request.validate()?;

    let platform = state.platform()?;
    let created = state.track(
        "create_user",
        platform.create_user(&scopes, expires_in_minutes).await,
    )?;

    info!(user_id = truncate_for_log(&created.user_id), "Created user");

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user_id: created.user_id,
            token: created.token.token,
            expires_on: created.token.expires_on,
        }),
    ))
}

/// Issue a new token for an existing user
#[instrument(skip(state, user_id, body))]
async fn issue_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<Json<TokenResponse>, ApiError> {
    let request: IssueTokenRequest = parse_optional_body(&body)?;
    let scopes = request.scopes();

    let platform = state.platform()?;
    let token = state.track("issue_token", platform.issue_token(&user_id, &scopes).await)?;

    info!(user_id = truncate_for_log(&user_id), "Issued token");

    Ok(Json(TokenResponse {
        token: token.token,
        expires_on: token.expires_on,
    }))
}

/// Revoke a user's tokens, then delete the user
#[instrument(skip(state, user_id))]
async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let platform = state.platform()?;

    state.track("revoke_tokens", platform.revoke_tokens(&user_id).await)?;
    state.track("delete_user", platform.delete_user(&user_id).await)?;

    info!(user_id = truncate_for_log(&user_id), "Deleted user");

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// SMS Handlers
// ============================================================================

/// Send one SMS
#[instrument(skip(state, body))]
async fn send_sms(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SmsSendResponse>, ApiError> {
    let request: SendSmsRequest = parse_required_body(&body)?;
    let sms = request.validate()?;

    let platform = state.platform()?;
    let result = state
        .track("send_sms", platform.send_sms(&sms).await)?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Internal {
            message: "platform returned no send result".to_string(),
        })?;

    info!(
        message_id = result.message_id.as_deref().unwrap_or_default(),
        successful = result.successful,
        "SMS sent"
    );

    Ok(Json(SmsSendResponse::from(result)))
}

/// Send one SMS to several recipients
#[instrument(skip(state, body))]
async fn send_bulk_sms(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BulkSmsResponse>, ApiError> {
    let request: BulkSmsRequest = parse_required_body(&body)?;
    let sms = request.validate()?;

    let platform = state.platform()?;
    let results = state.track("send_sms", platform.send_sms(&sms).await)?;

    info!(recipients = results.len(), "Bulk SMS sent");

    Ok(Json(BulkSmsResponse::from(results)))
}

/// Decode a JSON body that must be present
fn parse_required_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    decode_body::<T>(body)?.ok_or_else(|| ApiError::validation("Request body required"))
}

/// Decode a JSON body whose absence means "all defaults"
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    Ok(decode_body::<T>(body)?.unwrap_or_default())
}

/// Empty and `null` bodies decode to `None`
fn decode_body<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice::<Option<T>>(body)
        .map_err(|e| ApiError::validation(format!("Invalid JSON body: {}", e)))
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Liveness check
#[instrument(skip_all)]
async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "acs-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check; fails when no platform endpoint is configured
#[instrument(skip(state))]
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, ApiError> {
    let endpoint = state
        .platform_endpoint
        .clone()
        .ok_or(ApiError::PlatformNotConfigured)?;

    Ok(Json(ReadinessResponse {
        status: "ready".to_string(),
        acs_endpoint: endpoint,
    }))
}

/// Latest store health snapshot
///
/// `503` until the first probe completes or while the store is unhealthy.
#[instrument(skip(state))]
async fn handle_store_health(State(state): State<AppState>) -> Response {
    match state.health.latest().await {
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "pending" })),
        )
            .into_response(),
        Some(snapshot) => {
            let status = if matches!(
                snapshot.store_status,
                comms_relay_core::StoreStatus::Unhealthy { .. }
            ) {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            (status, Json(snapshot)).into_response()
        }
    }
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.encode().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Uses the caller's `x-correlation-id` when present, otherwise generates
/// one, and echoes it on the response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());

    request.extensions_mut().insert(correlation_id.clone());

    info!(
        correlation_id = %correlation_id,
        method = %method,
        uri = %uri,
        "Request started"
    );

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

/// Metrics collection middleware
///
/// Labels requests by their route template, not the raw path, so user ids
/// do not create new series.
async fn metrics_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    state.metrics.record_http_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );

    response
}
