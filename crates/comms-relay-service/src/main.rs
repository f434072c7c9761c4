//! # Comms Relay Service
//!
//! Binary entry point for the Comms Relay HTTP service.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes logging
//! - Resolves the record store and communication platform from the
//!   deployment's environment variables
//! - Spawns the store health reporter
//! - Starts the HTTP server from comms-relay-api

mod bootstrap;

use comms_relay_api::{start_server, LoggingConfig, ServiceError};
use comms_relay_core::settings::{PlatformSettings, RecordStoreSettings};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let explicit_path = std::env::var(bootstrap::CONFIG_FILE_ENV).ok();
    let loaded = bootstrap::load_service_config(explicit_path.as_deref());

    // Logging comes up before the configuration error is reported
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_else(|_| LoggingConfig::default());
    bootstrap::init_tracing(&logging);

    info!("Starting Comms Relay Service");

    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(
                error = %e,
                "Could not load service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    let store_settings = match RecordStoreSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Record store settings are invalid; aborting");
            std::process::exit(3);
        }
    };

    let platform_settings = match PlatformSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Communication platform settings are invalid; aborting");
            std::process::exit(3);
        }
    };

    let state = match bootstrap::build_app_state(
        service_config,
        &store_settings,
        platform_settings,
    )
    .await
    {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialise service dependencies; aborting");
            std::process::exit(3);
        }
    };

    info!(
        host = %state.config.server.host,
        port = state.config.server.port,
        health_interval_seconds = state.health.interval().as_secs(),
        "Starting HTTP server"
    );

    let health_task = state.health.spawn();
    let result = start_server(state).await;
    health_task.abort();

    if let Err(e) = result {
        error!("Server stopped with error: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => 3,
        };

        std::process::exit(exit_code);
    }

    info!("Comms Relay Service stopped");
    Ok(())
}
