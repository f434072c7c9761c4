//! Configuration types for the HTTP service

use comms_relay_core::health::DEFAULT_HEALTH_INTERVAL;
use comms_relay_core::router::ContainerNames;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Service configuration
///
/// Every field has a default, so an empty source yields a working
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Store health reporting
    pub health: HealthConfig,

    /// Record store layout
    pub store: StoreConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Enable permissive CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_size: 1024 * 1024, // 1MB
            enable_cors: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "comms_relay_service=info,comms_relay_api=info,comms_relay_core=info,tower_http=debug"
                .to_string(),
            json_format: false,
        }
    }
}

/// Store health reporting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between store probes
    pub interval_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_HEALTH_INTERVAL.as_secs(),
        }
    }
}

impl HealthConfig {
    /// Probe interval, never shorter than one second
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

/// Record store layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Container names per record kind
    pub containers: ContainerNames,
}
