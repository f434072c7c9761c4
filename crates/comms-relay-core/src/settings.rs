//! # Endpoint and Credential Settings
//!
//! Resolves where the communication platform and the record store live and how
//! to authenticate against them, from the deployment's environment variables:
//!
//! | variable | meaning |
//! |----------|---------|
//! | `ACS_ENDPOINT` | platform endpoint |
//! | `ACS_CONNECTION_STRING` | `endpoint=...;accesskey=...` |
//! | `COSMOS_DB_ENDPOINT` | store account endpoint |
//! | `COSMOS_DB_CONNECTION_STRING` | `AccountEndpoint=...;AccountKey=...` |
//! | `COSMOS_DB_DATABASE` | store database, default `acs-database` |
//! | `USE_MANAGED_IDENTITY` | prefer managed identity over shared keys |
//! | `AZURE_CLIENT_ID` | user-assigned managed identity |
//! | `RECORD_STORE_PATH` | filesystem store for local runs |
//!
//! `USE_MANAGED_IDENTITY` defaults to `true` unless a connection string is
//! present.

use crate::adapters::{CosmosAuth, CosmosRecordStore, FilesystemRecordStore};
use crate::credentials::{AccountKey, ConnectionString, CredentialError, ManagedIdentityCredential};
use crate::store::{RecordStore, StoreError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;

/// Default store database
pub const DEFAULT_DATABASE: &str = "acs-database";

/// How a client authenticates
#[derive(Debug, Clone)]
pub enum CredentialMode {
    /// Shared key from a connection string
    SharedKey(ConnectionString),
    /// Managed identity, optionally user-assigned
    ManagedIdentity { client_id: Option<String> },
}

impl CredentialMode {
    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::SharedKey(_) => "shared_key",
            Self::ManagedIdentity { .. } => "managed_identity",
        }
    }
}

/// Platform endpoint and credentials
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub endpoint: String,
    pub credential: CredentialMode,
}

impl PlatformSettings {
    /// Load from the process environment
    ///
    /// Returns `Ok(None)` when neither an endpoint nor a connection string is
    /// set.
    pub fn from_env() -> Result<Option<Self>, CredentialError> {
        Self::from_lookup(env_lookup)
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(service) = resolve_service(&lookup, "ACS_ENDPOINT", "ACS_CONNECTION_STRING")?
        else {
            return Ok(None);
        };

        Ok(Some(Self {
            endpoint: service.endpoint,
            credential: service.credential,
        }))
    }
}

/// Cosmos DB endpoint, database and credentials
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub endpoint: String,
    pub database: String,
    pub credential: CredentialMode,
}

/// Which record store the deployment uses
#[derive(Debug, Clone)]
pub enum RecordStoreSettings {
    Cosmos(StoreSettings),
    Filesystem { path: PathBuf },
    NotConfigured,
}

impl RecordStoreSettings {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, CredentialError> {
        Self::from_lookup(env_lookup)
    }

    /// Load from an arbitrary variable source
    ///
    /// Cosmos DB wins over `RECORD_STORE_PATH` when both are set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(service) =
            resolve_service(&lookup, "COSMOS_DB_ENDPOINT", "COSMOS_DB_CONNECTION_STRING")?
        {
            let database = lookup("COSMOS_DB_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.into());
            return Ok(Self::Cosmos(StoreSettings {
                endpoint: service.endpoint,
                database,
                credential: service.credential,
            }));
        }

        if let Some(path) = lookup("RECORD_STORE_PATH") {
            return Ok(Self::Filesystem {
                path: PathBuf::from(path),
            });
        }

        Ok(Self::NotConfigured)
    }
}

/// Build the record store described by the settings
///
/// Returns `Ok(None)` when no store is configured.
pub async fn build_record_store(
    settings: &RecordStoreSettings,
) -> Result<Option<Arc<dyn RecordStore>>, StoreError> {
    match settings {
        RecordStoreSettings::Cosmos(store) => {
            let auth = match &store.credential {
                CredentialMode::SharedKey(connection_string) => {
                    let key = connection_string
                        .access_key()
                        .and_then(|key| AccountKey::from_base64(&key))
                        .map_err(|e| StoreError::Configuration {
                            message: e.to_string(),
                        })?;
                    CosmosAuth::MasterKey(key)
                }
                CredentialMode::ManagedIdentity { client_id } => CosmosAuth::Token(Arc::new(
                    ManagedIdentityCredential::from_env(client_id.clone()),
                )),
            };

            let cosmos = CosmosRecordStore::new(&store.endpoint, store.database.clone(), auth)?;
            info!(
                endpoint = %store.endpoint,
                database = cosmos.database(),
                credential = store.credential.label(),
                "Using Cosmos DB record store"
            );
            Ok(Some(Arc::new(cosmos)))
        }
        RecordStoreSettings::Filesystem { path } => {
            let filesystem = FilesystemRecordStore::new(path.clone()).await?;
            info!(
                path = %filesystem.base_path().display(),
                "Using filesystem record store"
            );
            Ok(Some(Arc::new(filesystem)))
        }
        RecordStoreSettings::NotConfigured => {
            info!("No record store configured");
            Ok(None)
        }
    }
}

struct ServiceSettings {
    endpoint: String,
    credential: CredentialMode,
}

fn resolve_service<F>(
    lookup: &F,
    endpoint_var: &str,
    connection_string_var: &str,
) -> Result<Option<ServiceSettings>, CredentialError>
where
    F: Fn(&str) -> Option<String>,
{
    let endpoint = lookup(endpoint_var).filter(|v| !v.trim().is_empty());
    let connection_string = lookup(connection_string_var)
        .filter(|v| !v.trim().is_empty())
        .map(|v| ConnectionString::parse(&v))
        .transpose()?;

    if endpoint.is_none() && connection_string.is_none() {
        return Ok(None);
    }

    let use_managed_identity = match lookup("USE_MANAGED_IDENTITY") {
        Some(value) => parse_bool("USE_MANAGED_IDENTITY", &value)?,
        None => connection_string.is_none(),
    };

    let endpoint = match (endpoint, &connection_string) {
        (Some(endpoint), _) => endpoint,
        (None, Some(connection_string)) => connection_string.endpoint()?,
        (None, None) => {
            return Err(CredentialError::MissingSetting {
                name: endpoint_var.to_string(),
            })
        }
    };

    let credential = if use_managed_identity {
        CredentialMode::ManagedIdentity {
            client_id: lookup("AZURE_CLIENT_ID").filter(|v| !v.is_empty()),
        }
    } else {
        match connection_string {
            Some(connection_string) => CredentialMode::SharedKey(connection_string),
            None => {
                return Err(CredentialError::MissingSetting {
                    name: connection_string_var.to_string(),
                })
            }
        }
    };

    Ok(Some(ServiceSettings {
        endpoint,
        credential,
    }))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, CredentialError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(CredentialError::InvalidSetting {
            name: name.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
