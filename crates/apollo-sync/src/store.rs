//! In-memory view of the mirrored namespaces.
//!
//! Snapshots are stored behind `Arc` and swapped whole, so a reader either
//! sees the previous snapshot of a namespace or the new one, never a mix.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::ApolloConfig;

/// Committed namespace snapshots, readable from any thread.
///
/// Only the sync service commits; application code reads.
#[derive(Debug, Default)]
pub struct ConfigStore {
    namespaces: RwLock<HashMap<String, Arc<ApolloConfig>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot of `namespace`.
    pub(crate) fn commit(&self, namespace: &str, config: ApolloConfig) -> Arc<ApolloConfig> {
        let config = Arc::new(config);
        self.namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string(), config.clone());
        config
    }

    /// Returns the committed snapshot of `namespace`.
    pub fn get(&self, namespace: &str) -> Option<Arc<ApolloConfig>> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    /// Looks up a single key in `namespace`.
    pub fn value(&self, namespace: &str, key: &str) -> Option<String> {
        self.get(namespace)
            .and_then(|config| config.get(key).map(str::to_string))
    }

    /// Names of the namespaces holding a snapshot, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
