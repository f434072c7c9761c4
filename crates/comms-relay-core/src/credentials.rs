//! # Credentials
//!
//! Secrets and token sources used to authenticate against the communication
//! platform and the record store.
//!
//! Two authentication styles are supported:
//! - **Shared key**: a base64 account key taken from a connection string, used
//!   to HMAC-sign each request
//! - **Managed identity**: bearer tokens fetched from the hosting
//!   environment's identity endpoint (App Service or the instance metadata
//!   service) and cached until shortly before they expire

use crate::Timestamp;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

/// Default instance metadata service token endpoint
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Tokens are refreshed this long before they expire
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Secret Values
// ============================================================================

/// Secret string that is zeroed on drop and never printed
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    inner: Zeroizing<String>,
}

impl SecretValue {
    /// Wrap a secret string
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: Zeroizing::new(value.into()),
        }
    }

    /// Get the secret for immediate use
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<REDACTED>)")
    }
}

/// Decoded shared account key used for request signing
#[derive(Clone)]
pub struct AccountKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl AccountKey {
    /// Decode a base64 account key
    pub fn from_base64(encoded: &SecretValue) -> Result<Self, CredentialError> {
        let bytes = BASE64
            .decode(encoded.expose_secret().trim())
            .map_err(|e| CredentialError::InvalidKey {
                message: format!("Account key is not valid base64: {}", e),
            })?;

        if bytes.is_empty() {
            return Err(CredentialError::InvalidKey {
                message: "Account key is empty".to_string(),
            });
        }

        Ok(Self {
            bytes: Zeroizing::new(bytes),
        })
    }

    /// HMAC-SHA256 sign a message, returning the base64 signature
    pub fn sign(&self, message: &str) -> Result<String, CredentialError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.bytes).map_err(|e| CredentialError::InvalidKey {
                message: e.to_string(),
            })?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(<REDACTED>)")
    }
}

/// Base64 SHA-256 digest of a request body
pub fn content_hash(body: &[u8]) -> String {
    use sha2::Digest;
    BASE64.encode(Sha256::digest(body))
}

// ============================================================================
// Connection Strings
// ============================================================================

/// Parsed `key=value;key=value` connection string
///
/// Keys are matched case-insensitively. Values may themselves contain `=`
/// (base64 padding), so each pair is split on its first `=` only.
#[derive(Clone)]
pub struct ConnectionString {
    fields: HashMap<String, SecretValue>,
}

impl ConnectionString {
    /// Parse a connection string
    pub fn parse(value: &str) -> Result<Self, CredentialError> {
        let mut fields = HashMap::new();

        for pair in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, field_value) =
                pair.split_once('=')
                    .ok_or_else(|| CredentialError::InvalidConnectionString {
                        message: "every segment must be a key=value pair".to_string(),
                    })?;

            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(CredentialError::InvalidConnectionString {
                    message: "empty key".to_string(),
                });
            }
            fields.insert(key, SecretValue::new(field_value.trim()));
        }

        if fields.is_empty() {
            return Err(CredentialError::InvalidConnectionString {
                message: "connection string is empty".to_string(),
            });
        }

        Ok(Self { fields })
    }

    /// Get a field by name
    pub fn get(&self, key: &str) -> Option<&SecretValue> {
        self.fields.get(&key.to_ascii_lowercase())
    }

    /// Service endpoint (`endpoint` or `AccountEndpoint`)
    pub fn endpoint(&self) -> Result<String, CredentialError> {
        self.get("endpoint")
            .or_else(|| self.get("accountendpoint"))
            .map(|v| v.expose_secret().to_string())
            .ok_or_else(|| CredentialError::InvalidConnectionString {
                message: "missing endpoint".to_string(),
            })
    }

    /// Shared access key (`accesskey` or `AccountKey`)
    pub fn access_key(&self) -> Result<SecretValue, CredentialError> {
        self.get("accesskey")
            .or_else(|| self.get("accountkey"))
            .cloned()
            .ok_or_else(|| CredentialError::InvalidConnectionString {
                message: "missing access key".to_string(),
            })
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        f.debug_struct("ConnectionString")
            .field("keys", &keys)
            .finish()
    }
}

// ============================================================================
// Token Credentials
// ============================================================================

/// Bearer token with its expiry
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: SecretValue,
    pub expires_on: Timestamp,
}

impl AccessToken {
    /// Check if the token is inside the refresh margin
    pub fn needs_refresh(&self, now: Timestamp) -> bool {
        now >= self.expires_on.subtract_duration(TOKEN_REFRESH_MARGIN)
    }
}

/// Source of bearer tokens for a resource
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Get a token valid for `resource`
    async fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError>;
}

/// Where managed identity tokens are requested from
#[derive(Debug, Clone)]
pub enum IdentityEndpoint {
    /// App Service / Functions identity endpoint
    AppService { endpoint: String, header: SecretValue },
    /// Azure instance metadata service
    Imds { endpoint: String },
}

impl IdentityEndpoint {
    /// Detect the endpoint from `IDENTITY_ENDPOINT` / `IDENTITY_HEADER`,
    /// falling back to the instance metadata service
    pub fn from_env() -> Self {
        match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) if !endpoint.is_empty() => Self::AppService {
                endpoint,
                header: SecretValue::new(header),
            },
            _ => Self::Imds {
                endpoint: IMDS_TOKEN_ENDPOINT.to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<Value>,
    #[serde(default)]
    expires_in: Option<Value>,
}

/// Managed identity token source with a per-resource cache
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: IdentityEndpoint,
    client_id: Option<String>,
    cache: RwLock<HashMap<String, AccessToken>>,
}

impl ManagedIdentityCredential {
    /// Create a credential against an explicit identity endpoint
    ///
    /// `client_id` selects a user-assigned identity.
    pub fn new(endpoint: IdentityEndpoint, client_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            client_id,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Create a credential for the current hosting environment
    pub fn from_env(client_id: Option<String>) -> Self {
        Self::new(IdentityEndpoint::from_env(), client_id)
    }

    async fn request_token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        let mut query: Vec<(&str, &str)> = vec![("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.endpoint {
            IdentityEndpoint::AppService { endpoint, header } => self
                .http
                .get(endpoint)
                .query(&[("api-version", "2019-08-01")])
                .header("X-IDENTITY-HEADER", header.expose_secret()),
            IdentityEndpoint::Imds { endpoint } => self
                .http
                .get(endpoint)
                .query(&[("api-version", "2018-02-01")])
                .header("Metadata", "true"),
        };

        let response = request.query(&query).send().await.map_err(|e| {
            CredentialError::TokenRequestFailed {
                status: None,
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenRequestFailed {
                status: Some(status.as_u16()),
                message,
            });
        }

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| CredentialError::InvalidTokenResponse {
                    message: e.to_string(),
                })?;

        let expires_on = token_expiry(&body)?;
        Ok(AccessToken {
            token: SecretValue::new(body.access_token),
            expires_on,
        })
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    #[instrument(skip(self))]
    async fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        if let Some(cached) = self.cache.read().await.get(resource) {
            if !cached.needs_refresh(Timestamp::now()) {
                return Ok(cached.clone());
            }
        }

        debug!("Requesting managed identity token");
        let token = self.request_token(resource).await?;

        self.cache
            .write()
            .await
            .insert(resource.to_string(), token.clone());

        Ok(token)
    }
}

impl fmt::Debug for ManagedIdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedIdentityCredential")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Resolve the expiry of a token response
///
/// `expires_on` is unix seconds, as a number or a numeric string depending on
/// the endpoint. `expires_in` (seconds from now) is the fallback.
fn token_expiry(body: &TokenResponse) -> Result<Timestamp, CredentialError> {
    if let Some(seconds) = body.expires_on.as_ref().and_then(json_integer) {
        return Timestamp::from_unix_seconds(seconds).ok_or_else(|| {
            CredentialError::InvalidTokenResponse {
                message: format!("expires_on out of range: {}", seconds),
            }
        });
    }

    if let Some(seconds) = body.expires_in.as_ref().and_then(json_integer) {
        return Ok(Timestamp::now().add_seconds(seconds.max(0) as u64));
    }

    Err(CredentialError::InvalidTokenResponse {
        message: "token response carries no expiry".to_string(),
    })
}

fn json_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Credential failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CredentialError {
    #[error("Setting '{name}' is required")]
    MissingSetting { name: String },

    #[error("Setting '{name}' is invalid: {message}")]
    InvalidSetting { name: String, message: String },

    #[error("Invalid connection string: {message}")]
    InvalidConnectionString { message: String },

    #[error("Invalid key: {message}")]
    InvalidKey { message: String },

    #[error("Token request failed (status {status:?}): {message}")]
    TokenRequestFailed {
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid token response: {message}")]
    InvalidTokenResponse { message: String },
}

impl CredentialError {
    /// Check if retrying the token request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TokenRequestFailed { status: None, .. } => true,
            Self::TokenRequestFailed {
                status: Some(status),
                ..
            } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
