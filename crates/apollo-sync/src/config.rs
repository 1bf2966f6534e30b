//! Application identity and connection settings.
//!
//! An [`AppConfig`] names the application, cluster and namespaces to mirror
//! and where the config service lives. It can be read from the JSON
//! `app.properties` layout used by Apollo clients or from `APOLLO_*`
//! environment variables. The orchestrator never holds on to one: it asks an
//! [`AppConfigProvider`] for a fresh snapshot at the start of every cycle.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_APP_ID: &str = "APOLLO_APP_ID";
const ENV_CLUSTER: &str = "APOLLO_CLUSTER";
const ENV_NAMESPACE: &str = "APOLLO_NAMESPACE";
const ENV_IP: &str = "APOLLO_IP";
const ENV_SECRET: &str = "APOLLO_SECRET";
const ENV_BACKUP_ENABLED: &str = "APOLLO_BACKUP_ENABLED";
const ENV_BACKUP_DIR: &str = "APOLLO_BACKUP_DIR";
const ENV_LABEL: &str = "APOLLO_LABEL";
const ENV_SYNC_SERVER_LIST: &str = "APOLLO_SYNC_SERVER_LIST";

pub const DEFAULT_CLUSTER: &str = "default";
pub const DEFAULT_NAMESPACE: &str = "application";

/// Errors raised while loading an [`AppConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read app config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse app config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("app config is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Identity of the application being mirrored plus connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub app_id: String,
    pub cluster: String,
    /// Comma-separated namespace list.
    pub namespace_name: String,
    /// Config service address, or meta server address when
    /// `sync_server_list` is set. Several addresses may be comma-separated.
    pub ip: String,
    pub secret: Option<String>,
    pub is_backup_config: bool,
    pub backup_config_path: String,
    /// Gray-release label forwarded on config fetches.
    pub label: Option<String>,
    pub sync_server_list: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            cluster: DEFAULT_CLUSTER.to_string(),
            namespace_name: DEFAULT_NAMESPACE.to_string(),
            ip: String::new(),
            secret: None,
            is_backup_config: true,
            backup_config_path: String::new(),
            label: None,
            sync_server_list: false,
        }
    }
}

impl AppConfig {
    /// Loads the JSON app config stored at `path` and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = serde_json::from_slice(&bytes)?;
        config.validate()
    }

    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Result<Self, ConfigError> {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let defaults = AppConfig::default();
        let get = |name: &str| map.get(name).and_then(|value| sanitize_non_empty(value));

        let config = AppConfig {
            app_id: get(ENV_APP_ID).unwrap_or_default(),
            cluster: get(ENV_CLUSTER).unwrap_or(defaults.cluster),
            namespace_name: get(ENV_NAMESPACE).unwrap_or(defaults.namespace_name),
            ip: get(ENV_IP).unwrap_or_default(),
            secret: get(ENV_SECRET),
            is_backup_config: parse_bool(
                map.get(ENV_BACKUP_ENABLED).map(String::as_str),
                defaults.is_backup_config,
            ),
            backup_config_path: get(ENV_BACKUP_DIR).unwrap_or_default(),
            label: get(ENV_LABEL),
            sync_server_list: parse_bool(
                map.get(ENV_SYNC_SERVER_LIST).map(String::as_str),
                defaults.sync_server_list,
            ),
        };
        config.validate()
    }

    /// Rejects configs that cannot address the config service.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::MissingField("appId"));
        }
        if self.hosts().is_empty() {
            return Err(ConfigError::MissingField("ip"));
        }
        Ok(self)
    }

    /// Returns the configured namespaces, trimmed and without duplicates,
    /// preserving their declaration order.
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = Vec::new();
        for name in self.namespace_name.split(',') {
            let name = name.trim();
            if !name.is_empty() && !namespaces.iter().any(|known| known == name) {
                namespaces.push(name.to_string());
            }
        }
        namespaces
    }

    /// Returns the configured server addresses as normalised base URLs.
    pub fn hosts(&self) -> Vec<String> {
        self.ip
            .split(',')
            .filter_map(normalize_host)
            .fold(Vec::new(), |mut hosts, host| {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
                hosts
            })
    }

    /// Directory holding the local file cache.
    pub fn backup_dir(&self) -> PathBuf {
        if self.backup_config_path.trim().is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(self.backup_config_path.trim())
        }
    }

    /// Returns the signing secret when one is configured.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|secret| !secret.is_empty())
    }
}

/// Source of [`AppConfig`] snapshots.
///
/// The orchestrator calls [`AppConfigProvider::app_config`] once per cycle so
/// edits made between cycles are picked up without racing a cycle in flight.
pub trait AppConfigProvider: Send + Sync {
    fn app_config(&self) -> AppConfig;
}

impl AppConfigProvider for AppConfig {
    fn app_config(&self) -> AppConfig {
        self.clone()
    }
}

impl<F> AppConfigProvider for F
where
    F: Fn() -> AppConfig + Send + Sync,
{
    fn app_config(&self) -> AppConfig {
        self()
    }
}

/// Turns `host:port`, `http://host:port/` and friends into a base URL without
/// a trailing slash. Blank entries are dropped.
pub(crate) fn normalize_host(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("http://{trimmed}"))
    }
}

fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings, falling back to the provided default.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
