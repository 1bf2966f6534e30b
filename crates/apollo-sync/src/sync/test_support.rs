//! Shared fixtures for sync service tests.

#![cfg(test)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use httptest::Server;
use serde_json::json;

use super::{RetryPolicy, SyncConfig, SyncService, SyncTelemetry};
use crate::config::AppConfig;

pub(crate) const APP_ID: &str = "100004458";
pub(crate) const RELEASE_KEY: &str = "20170430092936-dee2d58e74515ff3";

/// Timings small enough for tests: three attempts, no host backoff, short pauses.
pub(crate) fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            host_backoff: Duration::ZERO,
            retry_interval: Duration::from_millis(10),
        },
        fetch_timeout: Duration::from_secs(2),
        poll_timeout: Duration::from_secs(2),
        poll_error_delay: Duration::from_millis(10),
        server_list_refresh_interval: Duration::from_millis(50),
        enforce_limits: false,
    }
}

/// Base URL of a mock server without the trailing slash.
pub(crate) fn host(server: &Server) -> String {
    server.url_str("").trim_end_matches('/').to_string()
}

pub(crate) fn app_config(hosts: &[String], namespaces: &str, backup_dir: &Path) -> AppConfig {
    AppConfig {
        app_id: APP_ID.into(),
        namespace_name: namespaces.into(),
        ip: hosts.join(","),
        backup_config_path: backup_dir.display().to_string(),
        ..AppConfig::default()
    }
}

/// Config-service response body for `namespace`.
pub(crate) fn config_body(namespace: &str, pairs: &[(&str, &str)]) -> String {
    let configurations: serde_json::Map<String, serde_json::Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    json!({
        "appId": APP_ID,
        "cluster": "default",
        "namespaceName": namespace,
        "configurations": configurations,
        "releaseKey": RELEASE_KEY,
    })
    .to_string()
}

pub(crate) fn notifications_body(entries: &[(&str, i64)]) -> String {
    let entries: Vec<_> = entries
        .iter()
        .map(|(namespace, id)| json!({"namespaceName": namespace, "notificationId": id}))
        .collect();
    serde_json::Value::Array(entries).to_string()
}

pub(crate) fn config_path(namespace: &str) -> String {
    format!("/configs/{APP_ID}/default/{namespace}")
}

pub(crate) fn build_service(app: AppConfig) -> SyncService {
    SyncService::builder(app)
        .with_config(fast_config())
        .build()
        .expect("service builds")
}

pub(crate) fn build_service_with_telemetry(
    app: AppConfig,
    telemetry: Arc<dyn SyncTelemetry>,
) -> SyncService {
    SyncService::builder(app)
        .with_config(fast_config())
        .with_telemetry(telemetry)
        .build()
        .expect("service builds")
}
