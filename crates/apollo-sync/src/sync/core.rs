//! Sync service orchestration.
//!
//! This module wires the fetcher, the notification poller, the host registry
//! and the local file cache into a service that bootstraps every configured
//! namespace once and then keeps the in-memory store current from a
//! background long-poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use super::config::SyncConfig;
use super::refresh::SyncShared;
use super::state::SyncState;
use super::telemetry::{NoopTelemetry, SyncTelemetry};
use crate::auth::{ApolloSigner, RequestSigner};
use crate::cache::{CacheError, FileCodec, JsonCodec, LocalFileCache};
use crate::config::AppConfigProvider;
use crate::fetcher::ConfigFetcher;
use crate::http::{HttpClient, HttpClientOptions, HttpError};
use crate::model::Notification;
use crate::poller::NotificationPoller;
use crate::servers::{RoundRobin, SelectionStrategy, ServerError, ServerRegistry};
use crate::status::SyncStatus;
use crate::store::ConfigStore;

/// Error type surfaced by sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A failure that switching hosts cannot fix (malformed payload, bad request).
    #[error("http error: {0}")]
    Http(#[from] HttpError),
    #[error(transparent)]
    NoAvailableServer(#[from] ServerError),
    /// The bounded retry-with-failover policy gave up for this cycle.
    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    /// `start` was called while background tasks from an earlier call still run.
    #[error("sync service is already running")]
    AlreadyRunning,
}

/// Where a namespace's initial snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceSource {
    Remote,
    /// The remote failed and the local cache supplied the snapshot.
    Cache,
    /// Neither the remote nor the cache had a usable snapshot.
    Empty,
}

/// Bootstrap result for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceBootstrap {
    pub namespace: String,
    pub source: NamespaceSource,
    /// Remote (and, for `Empty`, cache) failure that led to a fallback.
    pub error: Option<String>,
}

/// Per-namespace outcome of [`SyncService::bootstrap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub namespaces: Vec<NamespaceBootstrap>,
}

impl BootstrapReport {
    pub fn source(&self, namespace: &str) -> Option<NamespaceSource> {
        self.namespaces
            .iter()
            .find(|entry| entry.namespace == namespace)
            .map(|entry| entry.source)
    }

    /// Whether every namespace was served by the config service.
    pub fn all_remote(&self) -> bool {
        self.namespaces
            .iter()
            .all(|entry| entry.source == NamespaceSource::Remote)
    }

    /// Number of namespaces that hold a snapshot after bootstrap.
    pub fn loaded(&self) -> usize {
        self.namespaces
            .iter()
            .filter(|entry| entry.source != NamespaceSource::Empty)
            .count()
    }
}

/// Outcome of one long-poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Fresh notifications that triggered a refresh.
    pub changed: Vec<Notification>,
    /// Namespaces whose refresh committed; their notification ID advanced.
    pub refreshed: Vec<String>,
    /// Namespaces whose refresh failed; their notification ID is unchanged.
    pub failed: Vec<String>,
}

impl PollOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Handle returned by [`SyncService::start`] to manage background tasks.
pub struct SyncHandle {
    shared: Arc<SyncShared>,
    shutdown: broadcast::Sender<()>,
    join_handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("join_handles", &self.join_handles.len())
            .finish()
    }
}

impl SyncHandle {
    /// Stops background workers and waits for all tasks to terminate.
    pub async fn shutdown(self) {
        let SyncHandle {
            shared,
            shutdown,
            mut join_handles,
        } = self;
        let _ = shutdown.send(());
        for handle in join_handles.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        shared.running.store(false, Ordering::Release);
        debug!("apollo-sync background tasks stopped");
    }
}

/// Keeps the configured namespaces mirrored from the config service.
#[derive(Debug, Clone)]
pub struct SyncService {
    shared: Arc<SyncShared>,
}

impl SyncService {
    /// Starts building a service around `provider`, queried once per cycle.
    pub fn builder<P>(provider: P) -> SyncServiceBuilder
    where
        P: AppConfigProvider + 'static,
    {
        SyncServiceBuilder::new(Arc::new(provider))
    }

    /// Fetches every configured namespace once, falling back to the local
    /// cache for namespaces the config service could not serve.
    ///
    /// Never fails as a whole: the report says where each namespace came from.
    pub async fn bootstrap(&self) -> BootstrapReport {
        self.shared.bootstrap().await
    }

    /// Runs a single long-poll cycle and refreshes every namespace it reports
    /// as changed.
    pub async fn poll_once(&self) -> Result<PollOutcome, SyncError> {
        self.shared.poll_once().await
    }

    /// Asks the meta server for the current config-service hosts. A no-op
    /// unless the app config enables server-list sync.
    pub async fn refresh_server_list(&self) -> Result<Vec<String>, SyncError> {
        self.shared.refresh_server_list().await
    }

    /// Spawns the long-poll loop (and the server-list refresher when enabled)
    /// and returns a handle controlling them.
    ///
    /// Fails with [`SyncError::AlreadyRunning`] until the previous handle has
    /// been shut down.
    pub fn start(&self) -> Result<SyncHandle, SyncError> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(SyncError::AlreadyRunning);
        }
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut join_handles = Vec::new();

        let shared = self.shared.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        join_handles.push(tokio::spawn(async move {
            shared.run_poll_loop(&mut shutdown_rx).await;
        }));

        if self.shared.provider.app_config().sync_server_list {
            let shared = self.shared.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            join_handles.push(tokio::spawn(async move {
                shared.run_server_list_refresher(&mut shutdown_rx).await;
            }));
        }

        Ok(SyncHandle {
            shared: self.shared.clone(),
            shutdown: shutdown_tx,
            join_handles,
        })
    }

    /// Committed namespace snapshots.
    pub fn store(&self) -> Arc<ConfigStore> {
        self.shared.store.clone()
    }

    /// Returns a handle exposing bootstrap state, loaded namespaces and last error.
    pub fn status_handle(&self) -> Arc<SyncStatus> {
        self.shared.status.clone()
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.shared.registry
    }

    pub fn cache(&self) -> &LocalFileCache {
        &self.shared.cache
    }

    /// Last notification ID reflected in the store for `namespace`.
    pub async fn notification_id(&self, namespace: &str) -> Option<i64> {
        self.shared.state.lock().await.notification_id(namespace)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }
}

/// Collects the pluggable collaborators of a [`SyncService`].
pub struct SyncServiceBuilder {
    provider: Arc<dyn AppConfigProvider>,
    config: SyncConfig,
    http_options: HttpClientOptions,
    signer: Arc<dyn RequestSigner>,
    strategy: Arc<dyn SelectionStrategy>,
    codec: Arc<dyn FileCodec>,
    telemetry: Arc<dyn SyncTelemetry>,
}

impl std::fmt::Debug for SyncServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServiceBuilder")
            .field("config", &self.config)
            .field("http_options", &self.http_options)
            .field("signer", &self.signer)
            .field("strategy", &self.strategy)
            .field("codec", &self.codec)
            .finish()
    }
}

impl SyncServiceBuilder {
    fn new(provider: Arc<dyn AppConfigProvider>) -> Self {
        Self {
            provider,
            config: SyncConfig::default(),
            http_options: HttpClientOptions::default(),
            signer: Arc::new(ApolloSigner),
            strategy: Arc::new(RoundRobin::default()),
            codec: Arc::new(JsonCodec),
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_http_options(mut self, options: HttpClientOptions) -> Self {
        self.http_options = options;
        self
    }

    /// Replaces the default [`ApolloSigner`].
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Replaces the default [`RoundRobin`] host selection.
    pub fn with_strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the default [`JsonCodec`] used by the local cache.
    pub fn with_codec(mut self, codec: Arc<dyn FileCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn SyncTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Builds the service. The host list, backup directory and initial
    /// namespace set come from the provider's current snapshot.
    pub fn build(self) -> Result<SyncService, SyncError> {
        let config = self.config.sanitise();
        let app = self.provider.app_config();
        let http = HttpClient::new(self.http_options)?.with_signer(self.signer);
        let shared = SyncShared {
            fetcher: ConfigFetcher::new(http.clone(), config.fetch_timeout),
            poller: NotificationPoller::new(http.clone(), config.poll_timeout),
            http,
            registry: ServerRegistry::new(app.hosts(), self.strategy),
            cache: LocalFileCache::new(app.backup_dir(), self.codec),
            store: Arc::new(ConfigStore::new()),
            state: Mutex::new(SyncState::new(&app.namespaces())),
            telemetry: self.telemetry,
            status: SyncStatus::new(),
            running: AtomicBool::new(false),
            provider: self.provider,
            config,
        };
        Ok(SyncService {
            shared: Arc::new(shared),
        })
    }
}
