//! Request bodies, response types, and their validation rules for the API.

use crate::errors::ApiError;
use crate::platform::{SmsRequest, SmsSendResult};
use comms_relay_core::RouteOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(test)]
#[path = "responses_tests.rs"]
mod tests;

/// Scopes granted when a request names none
pub const DEFAULT_SCOPES: [&str; 2] = ["voip", "chat"];

/// Token lifetime when a request names none
pub const DEFAULT_TOKEN_EXPIRES_HOURS: i64 = 24;

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Request Types
// ============================================================================

/// Body of `POST /api/v1/identity/users`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUserRequest {
    pub scopes: Option<Vec<String>>,
    pub token_expires_hours: Option<i64>,
}

impl CreateUserRequest {
    /// Resolve scopes and token lifetime in minutes
    pub fn validate(self) -> Result<(Vec<String>, u32), ApiError> {
        let hours = self
            .token_expires_hours
            .unwrap_or(DEFAULT_TOKEN_EXPIRES_HOURS);
        if !(1..=24).contains(&hours) {
            return Err(ApiError::validation(
                "token_expires_hours must be between 1 and 24",
            ));
        }

        let minutes = u32::try_from(hours * 60)
            .map_err(|_| ApiError::validation("token_expires_hours is out of range"))?;
        Ok((self.scopes.unwrap_or_else(default_scopes), minutes))
    }
}

/// Body of `POST /api/v1/identity/users/{user_id}/token`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueTokenRequest {
    pub scopes: Option<Vec<String>>,
}

impl IssueTokenRequest {
    pub fn scopes(self) -> Vec<String> {
        self.scopes.unwrap_or_else(default_scopes)
    }
}

/// Body of `POST /api/v1/sms/send`
#[derive(Debug, Clone, Deserialize)]
pub struct SendSmsRequest {
    pub from: Option<String>,
    pub to: Option<String>,
    pub message: Option<String>,
    pub enable_delivery_report: Option<bool>,
    pub tag: Option<String>,
}

impl SendSmsRequest {
    /// Check required fields and build the platform request
    pub fn validate(self) -> Result<SmsRequest, ApiError> {
        let from = required(self.from, "from")?;
        let to = required(self.to, "to")?;
        let message = required(self.message, "message")?;

        Ok(SmsRequest {
            from,
            to: vec![to],
            message,
            enable_delivery_report: self.enable_delivery_report.unwrap_or(true),
            tag: self.tag,
        })
    }
}

/// Body of `POST /api/v1/sms/send-bulk`
///
/// `to` is kept as raw JSON so a non-list value gets a precise error.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkSmsRequest {
    pub from: Option<String>,
    pub to: Option<Value>,
    pub message: Option<String>,
    pub enable_delivery_report: Option<bool>,
}

impl BulkSmsRequest {
    /// Check required fields and build the platform request
    pub fn validate(self) -> Result<SmsRequest, ApiError> {
        let not_a_list = || ApiError::validation("'to' must be a list of phone numbers");

        let recipients = match self.to {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(number) => Ok(number),
                    _ => Err(not_a_list()),
                })
                .collect::<Result<Vec<String>, ApiError>>()?,
            _ => return Err(not_a_list()),
        };
        if recipients.is_empty() {
            return Err(ApiError::validation("'to' must name at least one recipient"));
        }

        Ok(SmsRequest {
            from: required(self.from, "from")?,
            to: recipients,
            message: required(self.message, "message")?,
            enable_delivery_report: self.enable_delivery_report.unwrap_or(true),
            tag: None,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value.ok_or_else(|| ApiError::validation(format!("Missing required field: {}", field)))
}

// ============================================================================
// Response Types
// ============================================================================

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Readiness response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub acs_endpoint: String,
}

/// Created user with its first token
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: String,
    pub token: String,
    pub expires_on: String,
}

/// Newly issued token
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_on: String,
}

/// Single SMS send result
#[derive(Debug, Serialize)]
pub struct SmsSendResponse {
    pub message_id: Option<String>,
    pub to: String,
    pub successful: bool,
    pub http_status: u16,
}

impl From<SmsSendResult> for SmsSendResponse {
    fn from(result: SmsSendResult) -> Self {
        Self {
            message_id: result.message_id,
            to: result.to,
            successful: result.successful,
            http_status: result.http_status,
        }
    }
}

/// One recipient in a bulk send
#[derive(Debug, Serialize)]
pub struct BulkSmsResult {
    pub message_id: Option<String>,
    pub to: String,
    pub successful: bool,
}

/// Bulk SMS send results, in recipient order
#[derive(Debug, Serialize)]
pub struct BulkSmsResponse {
    pub results: Vec<BulkSmsResult>,
}

impl From<Vec<SmsSendResult>> for BulkSmsResponse {
    fn from(results: Vec<SmsSendResult>) -> Self {
        Self {
            results: results
                .into_iter()
                .map(|result| BulkSmsResult {
                    message_id: result.message_id,
                    to: result.to,
                    successful: result.successful,
                })
                .collect(),
        }
    }
}

/// Event delivery accepted
#[derive(Debug, Serialize)]
pub struct EventDeliveryResponse {
    pub processed: usize,
    pub outcomes: Vec<RouteOutcome>,
}

/// Answer to the Event Grid subscription validation handshake
#[derive(Debug, Serialize)]
pub struct SubscriptionValidationResponse {
    #[serde(rename = "validationResponse")]
    pub validation_response: String,
}
