//! Durable per-namespace mirror of the last good snapshot.
//!
//! The cache has no in-memory authority: the orchestrator writes to it after a
//! successful fetch and reads from it only when the remote path fails during
//! bootstrap. Each namespace lives in its own file under the backup directory
//! and is replaced atomically (temp file in the same directory, then rename)
//! so a concurrent or later `load` never sees a torn write.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::model::ApolloConfig;

/// Errors raised by [`LocalFileCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// No snapshot was ever written for the namespace.
    #[error("no cached snapshot for namespace {0}")]
    NotFound(String),
    /// The stored bytes could not be decoded.
    #[error("cached snapshot for namespace {namespace} is corrupt: {reason}")]
    Corrupt { namespace: String, reason: String },
    #[error("cache io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

impl CacheError {
    /// Whether the caller can carry on with an absent configuration.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CacheError::NotFound(_) | CacheError::Corrupt { .. })
    }
}

/// On-disk representation of a snapshot.
pub trait FileCodec: Send + Sync + std::fmt::Debug {
    /// File suffix, without the leading dot.
    fn extension(&self) -> &str;
    fn encode(&self, config: &ApolloConfig) -> Result<Vec<u8>, String>;
    fn decode(&self, bytes: &[u8]) -> Result<ApolloConfig, String>;
}

/// Stores snapshots as the same camelCase JSON the config service returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl FileCodec for JsonCodec {
    fn extension(&self) -> &str {
        "json"
    }

    fn encode(&self, config: &ApolloConfig) -> Result<Vec<u8>, String> {
        serde_json::to_vec(config).map_err(|err| err.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<ApolloConfig, String> {
        serde_json::from_slice(bytes).map_err(|err| err.to_string())
    }
}

/// One file per namespace under `dir`, named `{namespace}.{extension}`.
#[derive(Debug)]
pub struct LocalFileCache {
    dir: PathBuf,
    codec: Arc<dyn FileCodec>,
    /// Resolved paths, filled lazily per namespace.
    paths: RwLock<HashMap<String, PathBuf>>,
}

impl LocalFileCache {
    pub fn new(dir: impl Into<PathBuf>, codec: Arc<dyn FileCodec>) -> Self {
        Self {
            dir: dir.into(),
            codec,
            paths: RwLock::new(HashMap::new()),
        }
    }

    /// Cache using [`JsonCodec`].
    pub fn json(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, Arc::new(JsonCodec))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file backing `namespace`.
    pub fn path_for(&self, namespace: &str) -> PathBuf {
        if let Some(path) = self
            .paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
        {
            return path.clone();
        }
        let path = self
            .dir
            .join(format!("{namespace}.{}", self.codec.extension()));
        self.paths
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(namespace.to_string())
            .or_insert(path)
            .clone()
    }

    /// Atomically replaces the snapshot stored for `namespace`.
    pub fn write(&self, namespace: &str, config: &ApolloConfig) -> Result<(), CacheError> {
        let bytes = self.codec.encode(config).map_err(CacheError::Encode)?;
        let target = self.path_for(namespace);
        fs::create_dir_all(&self.dir)?;
        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|err| CacheError::Io(err.error))?;
        tracing::debug!(
            namespace,
            path = %target.display(),
            bytes = bytes.len(),
            "apollo-sync cache written"
        );
        Ok(())
    }

    /// Loads the snapshot stored for `namespace`.
    pub fn load(&self, namespace: &str) -> Result<ApolloConfig, CacheError> {
        let path = self.path_for(namespace);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(namespace.to_string()));
            }
            Err(err) => return Err(CacheError::Io(err)),
        };
        self.codec
            .decode(&bytes)
            .map_err(|reason| CacheError::Corrupt {
                namespace: namespace.to_string(),
                reason,
            })
    }
}
