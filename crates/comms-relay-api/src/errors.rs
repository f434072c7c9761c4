//! Error types for the HTTP service
//!
//! Every handler failure is converted into a response by
//! [`ApiError::into_response`], producing a `{"error": ..., "type": ...}` JSON
//! body:
//!
//! | condition | status | `type` |
//! |-----------|--------|--------|
//! | request validation, platform not configured | 400 | `validation_error` |
//! | malformed event envelope | 400 | `malformed_envelope` |
//! | event missing or mistyping a required field | 400 | `validation_error` |
//! | record store unavailable | 503 + `Retry-After` | `store_unavailable` |
//! | record store rejected the write | 502 | `store_error` |
//! | platform returned an error | upstream status | `acs_error` |
//! | anything else | 500 | `internal_error` |

use crate::platform::PlatformError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use comms_relay_core::{IngestError, StoreError};
use serde_json::json;
use tracing::{error, warn};

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Seconds the delivery infrastructure is asked to wait before redelivering
const RETRY_AFTER_SECONDS: u64 = 60;

/// Handler errors with HTTP status code mapping
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request body or parameters failed validation
    #[error("{message}")]
    Validation { message: String },

    /// No platform endpoint is configured
    #[error("ACS_ENDPOINT environment variable not set")]
    PlatformNotConfigured,

    /// Event ingestion failed
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// A platform call failed
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// Unexpected internal failure; details are logged, not returned
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

struct ErrorParts {
    status: StatusCode,
    kind: &'static str,
    message: String,
    upstream_status: Option<u16>,
    retry_after: Option<u64>,
}

impl ErrorParts {
    fn new(status: StatusCode, kind: &'static str, message: String) -> Self {
        Self {
            status,
            kind,
            message,
            upstream_status: None,
            retry_after: None,
        }
    }

    fn internal(detail: &str) -> Self {
        error!(error = %detail, "Internal server error occurred");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error".to_string(),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let parts = match &self {
            Self::Validation { .. } | Self::PlatformNotConfigured => {
                warn!(error = %self, "Validation error");
                ErrorParts::new(StatusCode::BAD_REQUEST, "validation_error", self.to_string())
            }
            Self::Ingest(IngestError::MalformedEnvelope(_)) => ErrorParts::new(
                StatusCode::BAD_REQUEST,
                "malformed_envelope",
                self.to_string(),
            ),
            Self::Ingest(IngestError::MissingField { .. } | IngestError::InvalidField { .. }) => {
                warn!(error = %self, "Event failed field validation");
                ErrorParts::new(StatusCode::BAD_REQUEST, "validation_error", self.to_string())
            }
            Self::Ingest(IngestError::Store(store_error)) => match store_error {
                StoreError::Unavailable { .. } => {
                    warn!(error = %store_error, "Record store unavailable");
                    ErrorParts {
                        retry_after: Some(RETRY_AFTER_SECONDS),
                        ..ErrorParts::new(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "store_unavailable",
                            store_error.to_string(),
                        )
                    }
                }
                StoreError::Rejected { .. } => {
                    error!(error = %store_error, "Record store rejected write");
                    ErrorParts::new(StatusCode::BAD_GATEWAY, "store_error", store_error.to_string())
                }
                StoreError::Serialization { .. } | StoreError::Configuration { .. } => {
                    ErrorParts::internal(&store_error.to_string())
                }
            },
            Self::Platform(PlatformError::Upstream {
                status, message, ..
            }) => {
                error!(upstream_status = status, error = %message, "Platform error");
                ErrorParts {
                    upstream_status: Some(*status),
                    ..ErrorParts::new(
                        StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                        "acs_error",
                        self.to_string(),
                    )
                }
            }
            Self::Platform(e) => ErrorParts::internal(&e.to_string()),
            Self::Internal { message } => ErrorParts::internal(message),
        };

        let mut body = json!({
            "error": parts.message,
            "type": parts.kind,
        });
        if let Some(status) = parts.upstream_status {
            body["status_code"] = json!(status);
        }

        let mut response = (parts.status, Json(body)).into_response();

        if let Some(retry_seconds) = parts.retry_after {
            if let Ok(header_value) = retry_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}
