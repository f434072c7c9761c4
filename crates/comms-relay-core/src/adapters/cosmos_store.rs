//! # Cosmos DB Record Store
//!
//! [`RecordStore`] backed by the Cosmos DB SQL REST API.
//!
//! Upserts are `POST dbs/{db}/colls/{container}/docs` with
//! `x-ms-documentdb-is-upsert: True`, so the document's `(id, partitionKey)`
//! pair addresses one slot and a repeated write replaces it. Requests are
//! authorized either with the account master key (HMAC-SHA256 over the verb,
//! resource type, resource link and date) or with an Entra ID bearer token.

use crate::credentials::{AccountKey, ConnectionString, CredentialError, TokenCredential};
use crate::records::NormalizedRecord;
use crate::store::{RecordStore, StoreError};
use crate::Timestamp;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "cosmos_store_tests.rs"]
mod tests;

/// REST API version sent with every request
pub const COSMOS_API_VERSION: &str = "2018-12-31";

/// Longest document id the service accepts
pub const MAX_DOCUMENT_ID_LENGTH: usize = 255;

/// How requests are authorized
#[derive(Clone)]
pub enum CosmosAuth {
    /// Account master key from a connection string
    MasterKey(AccountKey),
    /// Entra ID token (managed identity)
    Token(Arc<dyn TokenCredential>),
}

impl fmt::Debug for CosmosAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MasterKey(_) => f.write_str("MasterKey(<REDACTED>)"),
            Self::Token(_) => f.write_str("Token"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    #[serde(rename = "DocumentCollections", default)]
    document_collections: Vec<CollectionEntry>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CosmosErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Cosmos DB REST record store
#[derive(Debug, Clone)]
pub struct CosmosRecordStore {
    http: reqwest::Client,
    endpoint: String,
    database: String,
    auth: CosmosAuth,
}

impl CosmosRecordStore {
    /// Create a store for an account endpoint and database
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Configuration` if the endpoint is not an absolute
    /// URL.
    pub fn new(
        endpoint: &str,
        database: impl Into<String>,
        auth: CosmosAuth,
    ) -> Result<Self, StoreError> {
        let parsed = url::Url::parse(endpoint).map_err(|e| StoreError::Configuration {
            message: format!("Invalid store endpoint '{}': {}", endpoint, e),
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            database: database.into(),
            auth,
        })
    }

    /// Create a store from an `AccountEndpoint=...;AccountKey=...` connection string
    pub fn from_connection_string(
        connection_string: &ConnectionString,
        database: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let endpoint = connection_string.endpoint().map_err(credential_to_store)?;
        let key = connection_string
            .access_key()
            .and_then(|key| AccountKey::from_base64(&key))
            .map_err(credential_to_store)?;

        Self::new(&endpoint, database, CosmosAuth::MasterKey(key))
    }

    /// Database name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Build the `authorization` header value for one request
    async fn authorization(
        &self,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> Result<String, StoreError> {
        let token = match &self.auth {
            CosmosAuth::MasterKey(key) => {
                let string_to_sign = format!(
                    "{}\n{}\n{}\n{}\n\n",
                    verb.to_lowercase(),
                    resource_type.to_lowercase(),
                    resource_link,
                    date.to_lowercase()
                );
                let signature = key.sign(&string_to_sign).map_err(credential_to_store)?;
                format!("type=master&ver=1.0&sig={}", signature)
            }
            CosmosAuth::Token(credential) => {
                let token = credential
                    .get_token(&self.endpoint)
                    .await
                    .map_err(credential_to_store)?;
                format!("type=aad&ver=1.0&sig={}", token.token.expose_secret())
            }
        };

        Ok(urlencoding::encode(&token).into_owned())
    }
}

#[async_trait]
impl RecordStore for CosmosRecordStore {
    #[instrument(skip(self, record), fields(record_id = %record.id()))]
    async fn upsert(&self, container: &str, record: &NormalizedRecord) -> Result<(), StoreError> {
        check_document_id(record.id().as_str())?;

        let resource_link = format!("dbs/{}/colls/{}", self.database, container);
        let url = format!("{}/{}/docs", self.endpoint, resource_link);
        let date = Timestamp::now().to_http_date();
        let authorization = self
            .authorization("POST", "docs", &resource_link, &date)
            .await?;

        let body = serde_json::to_vec(record).map_err(|e| StoreError::Serialization {
            message: format!("Failed to serialize record: {}", e),
        })?;
        let partition_key = serde_json::to_string(&[record.partition_key().as_str()])
            .map_err(|e| StoreError::Serialization {
                message: format!("Failed to serialize partition key: {}", e),
            })?;

        let response = self
            .http
            .post(&url)
            .header("authorization", authorization)
            .header("x-ms-date", &date)
            .header("x-ms-version", COSMOS_API_VERSION)
            .header("x-ms-documentdb-is-upsert", "True")
            .header("x-ms-documentdb-partitionkey", partition_key)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response).await?;
        debug!(container, "Document upserted");
        Ok(())
    }

    async fn list_containers(&self, max_items: usize) -> Result<Vec<String>, StoreError> {
        let resource_link = format!("dbs/{}", self.database);
        let url = format!("{}/{}/colls", self.endpoint, resource_link);
        let date = Timestamp::now().to_http_date();
        let authorization = self
            .authorization("GET", "colls", &resource_link, &date)
            .await?;

        let response = self
            .http
            .get(&url)
            .header("authorization", authorization)
            .header("x-ms-date", &date)
            .header("x-ms-version", COSMOS_API_VERSION)
            .header("x-ms-max-item-count", max_items.to_string())
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        let list: CollectionList = response.json().await.map_err(|e| StoreError::Serialization {
            message: format!("Failed to decode container list: {}", e),
        })?;

        Ok(list
            .document_collections
            .into_iter()
            .take(max_items)
            .map(|entry| entry.id)
            .collect())
    }
}

fn transport_error(error: reqwest::Error) -> StoreError {
    StoreError::Unavailable {
        message: format!("Request to record store failed: {}", error),
    }
}

fn credential_to_store(error: CredentialError) -> StoreError {
    if error.is_transient() {
        StoreError::Unavailable {
            message: error.to_string(),
        }
    } else {
        StoreError::Configuration {
            message: error.to_string(),
        }
    }
}

/// Map a non-success response onto a store error
///
/// Timeouts, throttling and server errors are unavailability; anything else
/// is a rejection of the request itself.
/// Reject ids the service cannot store before sending anything
fn check_document_id(id: &str) -> Result<(), StoreError> {
    if id.len() > MAX_DOCUMENT_ID_LENGTH {
        return Err(StoreError::Rejected {
            status: 400,
            message: format!(
                "document id exceeds {} characters",
                MAX_DOCUMENT_ID_LENGTH
            ),
        });
    }

    if id.contains(['/', '\\', '?', '#']) {
        return Err(StoreError::Rejected {
            status: 400,
            message: "document id contains '/', '\\', '?' or '#'".to_string(),
        });
    }

    Ok(())
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<CosmosErrorBody>(&text) {
        Ok(CosmosErrorBody {
            code: Some(code),
            message: Some(message),
        }) => format!("{}: {}", code, message),
        Ok(CosmosErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ => text,
    };

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Err(StoreError::Unavailable {
            message: format!("status {}: {}", status.as_u16(), message),
        })
    } else {
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
