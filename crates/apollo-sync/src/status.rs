//! Health summary exposed to embedders.
//!
//! Tracks whether bootstrap finished, which namespaces hold a snapshot and
//! the last error of a sync cycle. Rendered as a small JSON document for
//! status endpoints.

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared status handle updated by the sync service.
#[derive(Debug)]
pub struct SyncStatus {
    bootstrapped: AtomicBool,
    namespaces: RwLock<Vec<String>>,
    last_error: RwLock<Option<String>>,
}

impl SyncStatus {
    /// Creates a handle with no bootstrap recorded and no error.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bootstrapped: AtomicBool::new(false),
            namespaces: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
        })
    }

    pub fn bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::Relaxed)
    }

    pub fn set_bootstrapped(&self, done: bool) {
        self.bootstrapped.store(done, Ordering::Relaxed);
    }

    /// Namespaces currently holding a snapshot.
    pub async fn namespaces(&self) -> Vec<String> {
        self.namespaces.read().await.clone()
    }

    pub async fn set_namespaces(&self, namespaces: Vec<String>) {
        *self.namespaces.write().await = namespaces;
    }

    /// Returns the last cycle error (if any).
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Stores the last cycle error, or clears it when `None`.
    pub async fn set_last_error(&self, error: Option<String>) {
        *self.last_error.write().await = error;
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            bootstrapped: self.bootstrapped(),
            namespaces: self.namespaces().await,
            last_error: self.last_error().await,
        }
    }

    /// Renders `{"bootstrapped":..,"namespaces":[..],"lastError":..}`.
    pub async fn to_json(&self) -> Value {
        self.snapshot().await.to_json()
    }
}

/// Point-in-time copy of [`SyncStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub bootstrapped: bool,
    pub namespaces: Vec<String>,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("bootstrapped".into(), Value::Bool(self.bootstrapped));
        map.insert(
            "namespaces".into(),
            Value::Array(self.namespaces.iter().cloned().map(Value::String).collect()),
        );
        map.insert(
            "lastError".into(),
            self.last_error
                .as_ref()
                .map_or(Value::Null, |err| Value::String(err.clone())),
        );
        map
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_map())
    }
}
