//! # Communication Platform Client
//!
//! The REST facade forwards identity and SMS operations to the communication
//! platform. [`CommunicationPlatform`] is the seam handlers depend on;
//! [`AcsRestClient`] implements it against the platform's REST API.
//!
//! Requests are authenticated either by signing them with the access key from
//! a connection string (`HMAC-SHA256` over verb, path, date, host and content
//! hash) or with a managed identity bearer token.

use async_trait::async_trait;
use comms_relay_core::credentials::{
    content_hash, AccountKey, CredentialError, ManagedIdentityCredential, TokenCredential,
};
use comms_relay_core::settings::{CredentialMode, PlatformSettings};
use comms_relay_core::Timestamp;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "platform_tests.rs"]
mod tests;

/// Identity API version
pub const IDENTITY_API_VERSION: &str = "2023-10-01";

/// SMS API version
pub const SMS_API_VERSION: &str = "2021-03-07";

/// Token audience for managed identity requests
pub const PLATFORM_RESOURCE: &str = "https://communication.azure.com";

// ============================================================================
// Domain Types
// ============================================================================

/// Access token issued for a communication user
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_on: String,
}

/// Newly created communication user with its first token
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedUser {
    pub user_id: String,
    pub token: IssuedToken,
}

/// One SMS send request, fanned out to every recipient
#[derive(Debug, Clone, PartialEq)]
pub struct SmsRequest {
    pub from: String,
    pub to: Vec<String>,
    pub message: String,
    pub enable_delivery_report: bool,
    pub tag: Option<String>,
}

/// Per-recipient send result
#[derive(Debug, Clone, PartialEq)]
pub struct SmsSendResult {
    pub to: String,
    pub message_id: Option<String>,
    pub http_status: u16,
    pub successful: bool,
    pub error_message: Option<String>,
}

/// Operations the REST facade forwards to the platform
#[async_trait]
pub trait CommunicationPlatform: Send + Sync {
    /// Create a user and issue its first token
    ///
    /// `expires_in_minutes` bounds the token lifetime.
    async fn create_user(
        &self,
        scopes: &[String],
        expires_in_minutes: u32,
    ) -> Result<CreatedUser, PlatformError>;

    /// Issue a new token for an existing user
    async fn issue_token(
        &self,
        user_id: &str,
        scopes: &[String],
    ) -> Result<IssuedToken, PlatformError>;

    /// Revoke every token issued to a user
    async fn revoke_tokens(&self, user_id: &str) -> Result<(), PlatformError>;

    /// Delete a user
    async fn delete_user(&self, user_id: &str) -> Result<(), PlatformError>;

    /// Send one message to every recipient in the request
    ///
    /// Results are returned in recipient order.
    async fn send_sms(&self, request: &SmsRequest) -> Result<Vec<SmsSendResult>, PlatformError>;
}

// ============================================================================
// REST Client
// ============================================================================

/// How platform requests are authenticated
#[derive(Clone)]
pub enum AcsAuth {
    /// Access key from a connection string
    SharedKey(AccountKey),
    /// Bearer token for [`PLATFORM_RESOURCE`]
    Token(Arc<dyn TokenCredential>),
}

impl fmt::Debug for AcsAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedKey(_) => f.write_str("SharedKey(<REDACTED>)"),
            Self::Token(_) => f.write_str("Token"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody {
    token: String,
    expires_on: String,
}

#[derive(Debug, Deserialize)]
struct IdentityBody {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserBody {
    identity: IdentityBody,
    access_token: Option<TokenBody>,
}

#[derive(Debug, Deserialize)]
struct SmsSendBody {
    #[serde(default)]
    value: Vec<SmsResultBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmsResultBody {
    to: String,
    #[serde(default)]
    message_id: Option<String>,
    http_status_code: u16,
    successful: bool,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Platform REST API client
#[derive(Debug, Clone)]
pub struct AcsRestClient {
    http: reqwest::Client,
    endpoint: String,
    auth: AcsAuth,
}

impl AcsRestClient {
    /// Create a client for a platform endpoint
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` if the endpoint is not an
    /// absolute URL with a host.
    pub fn new(endpoint: &str, auth: AcsAuth) -> Result<Self, PlatformError> {
        let parsed = url::Url::parse(endpoint).map_err(|e| PlatformError::Configuration {
            message: format!("Invalid platform endpoint '{}': {}", endpoint, e),
        })?;
        if parsed.host_str().is_none() {
            return Err(PlatformError::Configuration {
                message: format!("Platform endpoint '{}' has no host", endpoint),
            });
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Create a client from resolved platform settings
    pub fn from_settings(settings: &PlatformSettings) -> Result<Self, PlatformError> {
        let auth = match &settings.credential {
            CredentialMode::SharedKey(connection_string) => {
                let key = connection_string.access_key()?;
                AcsAuth::SharedKey(AccountKey::from_base64(&key)?)
            }
            CredentialMode::ManagedIdentity { client_id } => AcsAuth::Token(Arc::new(
                ManagedIdentityCredential::from_env(client_id.clone()),
            )),
        };

        Self::new(&settings.endpoint, auth)
    }

    /// Endpoint requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send an authenticated request and check its status
    async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Value>,
    ) -> Result<Response, PlatformError> {
        let url = url::Url::parse(&format!("{}{}", self.endpoint, path_and_query)).map_err(
            |e| PlatformError::Configuration {
                message: format!("Invalid request URL: {}", e),
            },
        )?;
        let body = match body {
            Some(value) => serde_json::to_vec(&value).map_err(|e| {
                PlatformError::InvalidResponse {
                    message: format!("Failed to serialize request: {}", e),
                }
            })?,
            None => Vec::new(),
        };

        let mut request = self.http.request(method.clone(), url.clone());
        match &self.auth {
            AcsAuth::SharedKey(key) => {
                let date = Timestamp::now().to_http_date();
                let hash = content_hash(&body);
                let signed_path = match url.query() {
                    Some(query) => format!("{}?{}", url.path(), query),
                    None => url.path().to_string(),
                };
                let authorization = shared_key_authorization(
                    key,
                    method.as_str(),
                    &signed_path,
                    &date,
                    &host_header(&url),
                    &hash,
                )?;
                request = request
                    .header("x-ms-date", date)
                    .header("x-ms-content-sha256", hash)
                    .header("authorization", authorization);
            }
            AcsAuth::Token(credential) => {
                let token = credential.get_token(PLATFORM_RESOURCE).await?;
                request = request.bearer_auth(token.token.expose_secret());
            }
        }

        if !body.is_empty() {
            request = request.header("content-type", "application/json").body(body);
        }

        let response = request.send().await.map_err(|e| PlatformError::Transport {
            message: format!("Request to communication platform failed: {}", e),
        })?;

        check_status(response).await
    }
}

#[async_trait]
impl CommunicationPlatform for AcsRestClient {
    #[instrument(skip(self))]
    async fn create_user(
        &self,
        scopes: &[String],
        expires_in_minutes: u32,
    ) -> Result<CreatedUser, PlatformError> {
        let path = format!("/identities?api-version={}", IDENTITY_API_VERSION);
        let body = json!({
            "createTokenFor": scopes,
            "expiresInMinutes": expires_in_minutes,
        });

        let response = self.send(Method::POST, &path, Some(body)).await?;
        let created: CreateUserBody = decode(response).await?;
        let token = created
            .access_token
            .ok_or_else(|| PlatformError::InvalidResponse {
                message: "identity response carries no access token".to_string(),
            })?;

        Ok(CreatedUser {
            user_id: created.identity.id,
            token: IssuedToken {
                token: token.token,
                expires_on: token.expires_on,
            },
        })
    }

    #[instrument(skip(self, user_id))]
    async fn issue_token(
        &self,
        user_id: &str,
        scopes: &[String],
    ) -> Result<IssuedToken, PlatformError> {
        let path = format!(
            "/identities/{}/:issueAccessToken?api-version={}",
            urlencoding::encode(user_id),
            IDENTITY_API_VERSION
        );

        let response = self
            .send(Method::POST, &path, Some(json!({ "scopes": scopes })))
            .await?;
        let token: TokenBody = decode(response).await?;

        Ok(IssuedToken {
            token: token.token,
            expires_on: token.expires_on,
        })
    }

    async fn revoke_tokens(&self, user_id: &str) -> Result<(), PlatformError> {
        let path = format!(
            "/identities/{}/:revokeAccessTokens?api-version={}",
            urlencoding::encode(user_id),
            IDENTITY_API_VERSION
        );

        self.send(Method::POST, &path, None).await?;
        debug!("Tokens revoked");
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), PlatformError> {
        let path = format!(
            "/identities/{}?api-version={}",
            urlencoding::encode(user_id),
            IDENTITY_API_VERSION
        );

        self.send(Method::DELETE, &path, None).await?;
        debug!("User deleted");
        Ok(())
    }

    #[instrument(skip(self, request), fields(recipients = request.to.len()))]
    async fn send_sms(&self, request: &SmsRequest) -> Result<Vec<SmsSendResult>, PlatformError> {
        let path = format!("/sms?api-version={}", SMS_API_VERSION);
        let recipients: Vec<Value> = request.to.iter().map(|to| json!({ "to": to })).collect();
        let mut options = json!({ "enableDeliveryReport": request.enable_delivery_report });
        if let Some(tag) = &request.tag {
            options["tag"] = json!(tag);
        }
        let body = json!({
            "from": request.from,
            "smsRecipients": recipients,
            "message": request.message,
            "smsSendOptions": options,
        });

        let response = self.send(Method::POST, &path, Some(body)).await?;
        let sent: SmsSendBody = decode(response).await?;

        Ok(sent
            .value
            .into_iter()
            .map(|result| SmsSendResult {
                to: result.to,
                message_id: result.message_id,
                http_status: result.http_status_code,
                successful: result.successful,
                error_message: result.error_message,
            })
            .collect())
    }
}

/// `Authorization` header value for a shared-key signed request
fn shared_key_authorization(
    key: &AccountKey,
    verb: &str,
    path_and_query: &str,
    date: &str,
    host: &str,
    content_hash: &str,
) -> Result<String, CredentialError> {
    let string_to_sign = format!(
        "{}\n{}\n{};{};{}",
        verb.to_uppercase(),
        path_and_query,
        date,
        host,
        content_hash
    );
    let signature = key.sign(&string_to_sign)?;

    Ok(format!(
        "HMAC-SHA256 SignedHeaders=x-ms-date;host;x-ms-content-sha256&Signature={}",
        signature
    ))
}

/// Host as sent on the wire, with the port when it is not the default
fn host_header(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
    response
        .json()
        .await
        .map_err(|e| PlatformError::InvalidResponse {
            message: e.to_string(),
        })
}

async fn check_status(response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) => (
            envelope.error.code,
            envelope.error.message.unwrap_or_else(|| text.clone()),
        ),
        Err(_) if text.is_empty() => (
            None,
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
        ),
        Err(_) => (None, text),
    };

    Err(PlatformError::Upstream {
        status: status.as_u16(),
        code,
        message,
    })
}

// ============================================================================
// Errors
// ============================================================================

/// Failures talking to the communication platform
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlatformError {
    /// The platform answered with a non-success status
    #[error("Platform returned status {status}: {message}")]
    Upstream {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Communication platform unreachable: {message}")]
    Transport { message: String },

    #[error("Platform authentication failed: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid platform response: {message}")]
    InvalidResponse { message: String },

    #[error("Invalid platform configuration: {message}")]
    Configuration { message: String },
}

impl PlatformError {
    /// Check if retrying the request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Upstream { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            Self::Credential(e) => e.is_transient(),
            Self::InvalidResponse { .. } | Self::Configuration { .. } => false,
        }
    }
}
