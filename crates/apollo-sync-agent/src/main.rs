#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use apollo_sync::{AppConfig, ConfigError, CountingTelemetry, SyncService, TelemetryCounters};

const CONFIG_FILE_ENV: &str = "APOLLO_CONFIG_FILE";
const LOG_LEVEL_ENV: &str = "APOLLO_LOG_LEVEL";

fn load_app_config() -> Result<AppConfig, ConfigError> {
    match env::var(CONFIG_FILE_ENV) {
        Ok(path) if !path.trim().is_empty() => AppConfig::from_json_file(path.trim()),
        _ => AppConfig::from_os_env(),
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var(LOG_LEVEL_ENV)
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let app = match load_app_config() {
        Ok(app) => app,
        Err(e) => {
            error!("Error loading Apollo app config: {e}");
            return;
        }
    };
    info!(
        app_id = %app.app_id,
        cluster = %app.cluster,
        namespaces = ?app.namespaces(),
        "Starting apollo-sync agent"
    );

    let counters = Arc::new(TelemetryCounters::default());
    let service = match SyncService::builder(app)
        .with_telemetry(Arc::new(CountingTelemetry::new(counters.clone())))
        .build()
    {
        Ok(service) => service,
        Err(e) => {
            error!("Error building sync service: {e}");
            return;
        }
    };

    let report = service.bootstrap().await;
    for entry in &report.namespaces {
        match &entry.error {
            Some(err) => warn!(
                namespace = %entry.namespace,
                source = ?entry.source,
                error = %err,
                "Namespace bootstrapped without the config service"
            ),
            None => debug!(namespace = %entry.namespace, "Namespace bootstrapped"),
        }
    }
    info!(
        loaded = report.loaded(),
        total = report.namespaces.len(),
        "Bootstrap finished"
    );

    let handle = match service.start() {
        Ok(handle) => handle,
        Err(e) => {
            error!("Error starting sync loops: {e}");
            return;
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received, stopping sync loops");
    handle.shutdown().await;

    let status = service.status_handle().to_json().await;
    info!(status = %status, telemetry = %counters.snapshot(), "apollo-sync agent stopped");
}
