//! Wire and snapshot types shared by the fetcher, the notification poller and
//! the local file cache.
//!
//! The config service speaks camelCase JSON. Only the fields needed to keep a
//! namespace mirrored are modelled; unknown fields are ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Notification ID advertised for namespaces that have never been notified.
pub const DEFAULT_NOTIFICATION_ID: i64 = -1;

/// Point-in-time snapshot of a single namespace.
///
/// Snapshots are never mutated once parsed; a newer fetch replaces the whole
/// value in the store and in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApolloConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub cluster: String,
    pub namespace_name: String,
    #[serde(default)]
    pub configurations: HashMap<String, String>,
    /// Opaque release token. Informational only, never used to detect changes.
    #[serde(default)]
    pub release_key: String,
}

impl ApolloConfig {
    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.configurations.get(key).map(String::as_str)
    }

    /// Returns the release key, or `None` when the service did not send one.
    pub fn release_key(&self) -> Option<&str> {
        if self.release_key.is_empty() {
            None
        } else {
            Some(&self.release_key)
        }
    }
}

/// Change signal for one namespace as exchanged with `/notifications/v2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub namespace_name: String,
    pub notification_id: i64,
}

impl Notification {
    pub fn new(namespace_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            namespace_name: namespace_name.into(),
            notification_id,
        }
    }
}

/// Parses a config-service response body into an [`ApolloConfig`].
///
/// Malformed input always yields an error and never a partially filled
/// snapshot.
pub fn parse_apollo_config(bytes: &[u8]) -> Result<ApolloConfig, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Parses a long-poll response body.
///
/// An empty (or whitespace-only) body is the service's way of saying that
/// nothing changed and maps to an empty list.
pub fn parse_notifications(bytes: &[u8]) -> Result<Vec<Notification>, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes)
}
