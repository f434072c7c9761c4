//! Start-up helpers: configuration loading, logging and dependency wiring.

use comms_relay_api::{AcsRestClient, AppState, ConfigError, ServiceConfig, ServiceMetrics};
use comms_relay_core::settings::{build_record_store, PlatformSettings, RecordStoreSettings};
use comms_relay_core::{EventRouter, HealthReporter};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;

/// Environment variable naming an extra configuration file
pub const CONFIG_FILE_ENV: &str = "RELAY_CONFIG_FILE";

/// Prefix of configuration environment variables (`RELAY__SERVER__PORT`)
pub const CONFIG_ENV_PREFIX: &str = "RELAY";

/// Load the service configuration
///
/// Sources, later ones overriding earlier ones:
///  1. `/etc/comms-relay/service.yaml`
///  2. `./config/service.yaml`
///  3. the file named by `explicit_path` (required when given)
///  4. environment variables prefixed `RELAY__`, e.g. `RELAY__SERVER__PORT=9090`
///
/// Absent optional files are skipped and every field has a default. A
/// malformed file or a value of the wrong type is an error.
pub fn load_service_config(explicit_path: Option<&str>) -> Result<ServiceConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/comms-relay/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Some(path) = explicit_path.filter(|p| !p.is_empty()) {
        builder = builder.add_source(
            config::File::with_name(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    let config = builder
        .add_source(config::Environment::with_prefix(CONFIG_ENV_PREFIX).separator("__"))
        .build()
        .map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })?;

    config.try_deserialize().map_err(|e| ConfigError::Invalid {
        message: e.to_string(),
    })
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured filter.
pub fn init_tracing(logging: &comms_relay_api::LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the application state from resolved settings
///
/// The record store and platform client are both optional: without a store
/// events are extracted and logged but not persisted, and without a platform
/// the identity and SMS endpoints answer with a validation error.
pub async fn build_app_state(
    config: ServiceConfig,
    store_settings: &RecordStoreSettings,
    platform_settings: Option<PlatformSettings>,
) -> anyhow::Result<AppState> {
    let metrics = ServiceMetrics::new()?;

    let store = build_record_store(store_settings).await?;
    if store.is_none() {
        warn!("No record store configured; events will be logged but not persisted");
    }

    let router = EventRouter::new(store.clone(), metrics.clone())
        .with_containers(config.store.containers.clone());
    let health = HealthReporter::new(store, metrics.clone(), config.health.interval());

    let mut state = AppState::new(config, router, health, metrics);

    match platform_settings {
        Some(settings) => {
            let client = AcsRestClient::from_settings(&settings)?;
            info!(
                endpoint = %client.endpoint(),
                credential = settings.credential.label(),
                "Communication platform client configured"
            );
            let endpoint = settings.endpoint.clone();
            state = state.with_platform(Arc::new(client), endpoint);
        }
        None => {
            warn!("ACS_ENDPOINT not set; identity and SMS endpoints are unavailable");
        }
    }

    Ok(state)
}
