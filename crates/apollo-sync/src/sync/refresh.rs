//! Bootstrap, long-poll and refresh orchestration.
//!
//! This module hosts the shared service internals. Every remote call goes
//! through [`SyncShared::with_failover`], which applies the bounded
//! retry-with-failover policy on top of the host registry. Higher-level APIs
//! in `core.rs` delegate to these helpers.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::config::SyncConfig;
use super::state::{CycleErrorLevel, SyncState};
use super::telemetry::SyncTelemetry;
use super::{BootstrapReport, NamespaceBootstrap, NamespaceSource, PollOutcome, SyncError};
use crate::cache::LocalFileCache;
use crate::config::{AppConfig, AppConfigProvider};
use crate::fetcher::{ConfigFetcher, FetchOutcome};
use crate::http::{HttpClient, HttpError};
use crate::model::{ApolloConfig, Notification, DEFAULT_NOTIFICATION_ID};
use crate::poller::NotificationPoller;
use crate::servers::{discover_config_services, ServerError, ServerRegistry};
use crate::status::SyncStatus;
use crate::store::ConfigStore;

/// Shared service internals used by background tasks and API calls.
pub(crate) struct SyncShared {
    pub(crate) provider: Arc<dyn AppConfigProvider>,
    pub(crate) http: HttpClient,
    pub(crate) fetcher: ConfigFetcher,
    pub(crate) poller: NotificationPoller,
    /// Host table shared by the fetch, poll and discovery paths.
    pub(crate) registry: ServerRegistry,
    pub(crate) cache: LocalFileCache,
    pub(crate) store: Arc<ConfigStore>,
    /// Notification IDs and failure streak; only the orchestrator mutates it.
    pub(super) state: Mutex<SyncState>,
    pub(crate) telemetry: Arc<dyn SyncTelemetry>,
    pub(crate) status: Arc<SyncStatus>,
    /// Set while a [`super::SyncHandle`] owns the background tasks.
    pub(crate) running: AtomicBool,
    pub(crate) config: SyncConfig,
}

impl std::fmt::Debug for SyncShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncShared")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

impl SyncShared {
    /// Runs `call` against hosts picked from the registry until it succeeds,
    /// fails in a way no other host can fix, or the attempt budget runs out.
    ///
    /// Transport-class failures back the host off for the configured window.
    /// Running out of eligible hosts counts as a failed attempt.
    pub(crate) async fn with_failover<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, HttpError>>,
    {
        let policy = self.config.retry;
        let mut last_error = String::new();
        for attempt in 1..=policy.max_attempts {
            match self.registry.pick_server() {
                Ok(host) => match call(host.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_transport() => {
                        debug!(
                            operation,
                            host = %host,
                            attempt,
                            error = %err,
                            "apollo-sync attempt failed; backing off host"
                        );
                        self.registry.mark_unusable(&host, policy.host_backoff);
                        self.telemetry.on_host_unusable(&host);
                        last_error = err.to_string();
                    }
                    Err(err) => return Err(SyncError::Http(err)),
                },
                Err(err) => {
                    debug!(operation, attempt, error = %err, "apollo-sync no host to try");
                    last_error = err.to_string();
                }
            }
            if attempt < policy.max_attempts {
                sleep(policy.retry_interval).await;
            }
        }
        Err(SyncError::RetryBudgetExhausted {
            attempts: policy.max_attempts,
            last_error,
        })
    }

    pub(crate) async fn bootstrap(&self) -> BootstrapReport {
        let app = self.provider.app_config();
        self.adopt_configured_hosts(&app);
        if app.sync_server_list {
            if let Err(err) = self.refresh_server_list_for(&app).await {
                warn!(error = %err, "apollo-sync server discovery failed; using configured hosts");
            }
        }

        let namespaces = app.namespaces();
        {
            let mut state = self.state.lock().await;
            for namespace in &namespaces {
                state.advance(namespace, DEFAULT_NOTIFICATION_ID);
            }
        }

        let entries = join_all(
            namespaces
                .iter()
                .map(|namespace| self.bootstrap_namespace(&app, namespace)),
        )
        .await;
        let report = BootstrapReport { namespaces: entries };

        let failure = report
            .namespaces
            .iter()
            .find_map(|entry| entry.error.clone());
        self.status.set_last_error(failure).await;
        self.status.set_bootstrapped(true);
        info!(
            namespaces = report.namespaces.len(),
            loaded = report.loaded(),
            all_remote = report.all_remote(),
            "apollo-sync bootstrap finished"
        );
        report
    }

    /// Points the registry at the snapshot's `ip` hosts. Hosts learned from
    /// the meta server are left alone.
    fn adopt_configured_hosts(&self, app: &AppConfig) {
        if app.sync_server_list {
            return;
        }
        let configured = app.hosts();
        if configured != self.registry.hosts() {
            debug!(hosts = ?configured, "apollo-sync config service hosts changed");
            self.registry.replace_hosts(configured);
        }
    }

    async fn bootstrap_namespace(&self, app: &AppConfig, namespace: &str) -> NamespaceBootstrap {
        let remote_error = match self.fetch_namespace(app, namespace, None).await {
            Ok(FetchOutcome::Updated(config)) => {
                self.commit(app, namespace, config).await;
                self.telemetry.on_fetch_success(namespace);
                return NamespaceBootstrap {
                    namespace: namespace.to_string(),
                    source: NamespaceSource::Remote,
                    error: None,
                };
            }
            Ok(FetchOutcome::NotModified) if self.store.get(namespace).is_some() => {
                self.telemetry.on_fetch_success(namespace);
                return NamespaceBootstrap {
                    namespace: namespace.to_string(),
                    source: NamespaceSource::Remote,
                    error: None,
                };
            }
            Ok(FetchOutcome::NotModified) => {
                "config service answered 304 without a prior snapshot".to_string()
            }
            Err(err) => {
                self.telemetry.on_fetch_error(namespace, &err);
                err.to_string()
            }
        };

        warn!(
            namespace,
            error = %remote_error,
            "apollo-sync bootstrap fetch failed; trying local cache"
        );
        match self.cache.load(namespace) {
            Ok(config) => {
                self.store.commit(namespace, config);
                self.publish_namespaces().await;
                self.telemetry.on_cache_fallback(namespace);
                info!(namespace, "apollo-sync namespace loaded from local cache");
                NamespaceBootstrap {
                    namespace: namespace.to_string(),
                    source: NamespaceSource::Cache,
                    error: Some(remote_error),
                }
            }
            Err(err) => {
                let err = SyncError::Cache(err);
                warn!(
                    namespace,
                    error = %err,
                    "apollo-sync namespace starts without configuration"
                );
                NamespaceBootstrap {
                    namespace: namespace.to_string(),
                    source: NamespaceSource::Empty,
                    error: Some(format!("{remote_error}; {err}")),
                }
            }
        }
    }

    pub(crate) async fn poll_once(&self) -> Result<PollOutcome, SyncError> {
        let app = self.provider.app_config();
        self.adopt_configured_hosts(&app);
        let namespaces = app.namespaces();
        let known = self.state.lock().await.known_for(&namespaces);

        let notifications = {
            let poller = &self.poller;
            let (app, known) = (&app, &known);
            self.with_failover("poll", |host| async move {
                poller.poll(&host, app, known).await
            })
            .await
        };
        let notifications = match notifications {
            Ok(notifications) => notifications,
            Err(err) => {
                self.telemetry.on_poll_error(&err);
                self.handle_cycle_error("poll", &err).await;
                return Err(err);
            }
        };

        let changed = self
            .state
            .lock()
            .await
            .filter_fresh(notifications, &namespaces);
        self.telemetry.on_poll_success(changed.len());
        if changed.is_empty() {
            debug!("apollo-sync long poll returned without changes");
            self.handle_cycle_success().await;
            return Ok(PollOutcome::default());
        }

        let results = join_all(
            changed
                .iter()
                .map(|notification| self.refresh_namespace(&app, notification)),
        )
        .await;

        let mut outcome = PollOutcome {
            changed: changed.clone(),
            ..PollOutcome::default()
        };
        let mut first_error = None;
        for (notification, result) in changed.iter().zip(results) {
            match result {
                Ok(()) => {
                    self.state
                        .lock()
                        .await
                        .advance(&notification.namespace_name, notification.notification_id);
                    outcome.refreshed.push(notification.namespace_name.clone());
                }
                Err(err) => {
                    outcome.failed.push(notification.namespace_name.clone());
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => self.handle_cycle_error("refresh", &err).await,
            None => self.handle_cycle_success().await,
        }
        Ok(outcome)
    }

    /// Fetches `notification`'s namespace and commits it. The caller advances
    /// the notification ID only when this returns `Ok`.
    async fn refresh_namespace(
        &self,
        app: &AppConfig,
        notification: &Notification,
    ) -> Result<(), SyncError> {
        let namespace = notification.namespace_name.as_str();
        let release_key = self
            .store
            .get(namespace)
            .and_then(|config| config.release_key().map(str::to_string));

        match self
            .fetch_namespace(app, namespace, release_key.as_deref())
            .await
        {
            Ok(FetchOutcome::Updated(config)) => {
                let release_key = config.release_key.clone();
                self.commit(app, namespace, config).await;
                info!(
                    namespace,
                    notification_id = notification.notification_id,
                    release_key = %release_key,
                    "apollo-sync namespace refreshed"
                );
            }
            Ok(FetchOutcome::NotModified) => {
                debug!(
                    namespace,
                    notification_id = notification.notification_id,
                    "apollo-sync namespace already current"
                );
            }
            Err(err) => {
                warn!(
                    namespace,
                    notification_id = notification.notification_id,
                    error = %err,
                    "apollo-sync namespace refresh failed"
                );
                self.telemetry.on_fetch_error(namespace, &err);
                return Err(err);
            }
        }
        self.telemetry.on_fetch_success(namespace);
        Ok(())
    }

    async fn fetch_namespace(
        &self,
        app: &AppConfig,
        namespace: &str,
        release_key: Option<&str>,
    ) -> Result<FetchOutcome, SyncError> {
        let fetcher = &self.fetcher;
        self.with_failover("fetch", |host| async move {
            fetcher.fetch(&host, app, namespace, release_key).await
        })
        .await
    }

    /// Publishes a fresh snapshot to the store, then mirrors it to disk.
    async fn commit(&self, app: &AppConfig, namespace: &str, config: ApolloConfig) {
        let config = self.store.commit(namespace, config);
        self.publish_namespaces().await;
        if !app.is_backup_config {
            return;
        }
        if let Err(err) = self.cache.write(namespace, &config) {
            warn!(namespace, error = %err, "apollo-sync failed to write local cache");
        }
    }

    async fn publish_namespaces(&self) {
        self.status.set_namespaces(self.store.namespaces()).await;
    }

    pub(crate) async fn refresh_server_list(&self) -> Result<Vec<String>, SyncError> {
        let app = self.provider.app_config();
        if !app.sync_server_list {
            return Ok(self.registry.hosts());
        }
        self.refresh_server_list_for(&app).await
    }

    /// Tries each configured meta server in turn. An empty or failed answer
    /// keeps the current host list.
    async fn refresh_server_list_for(&self, app: &AppConfig) -> Result<Vec<String>, SyncError> {
        let mut last_error = None;
        for meta in app.hosts() {
            match discover_config_services(&self.http, &meta, app, self.config.fetch_timeout).await
            {
                Ok(hosts) if hosts.is_empty() => {
                    warn!(meta = %meta, "apollo-sync meta server returned no config services");
                    return Ok(self.registry.hosts());
                }
                Ok(hosts) => {
                    self.registry.replace_hosts(hosts);
                    let hosts = self.registry.hosts();
                    info!(meta = %meta, hosts = ?hosts, "apollo-sync config service list updated");
                    return Ok(hosts);
                }
                Err(err) => {
                    debug!(meta = %meta, error = %err, "apollo-sync discovery attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(match last_error {
            Some(err) => SyncError::Http(err),
            None => SyncError::NoAvailableServer(ServerError::NoAvailableServer { known: 0 }),
        })
    }

    async fn handle_cycle_success(&self) {
        self.state.lock().await.register_success();
        self.status.set_last_error(None).await;
    }

    pub(crate) async fn handle_cycle_error(&self, stage: &str, error: &SyncError) {
        let level = self.state.lock().await.register_error();
        match level {
            CycleErrorLevel::Warn => warn!(stage, %error, "apollo-sync cycle failed"),
            CycleErrorLevel::Error => error!(stage, %error, "apollo-sync cycle failed"),
        }
        self.status.set_last_error(Some(error.to_string())).await;
    }

    /// Long-polls until shutdown. A pending poll or pause is dropped as soon
    /// as the shutdown signal arrives.
    pub(crate) async fn run_poll_loop(self: Arc<Self>, shutdown_rx: &mut broadcast::Receiver<()>) {
        let mut next_delay = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!("apollo-sync poll loop shutting down");
                    break;
                }
                result = async {
                    sleep(next_delay).await;
                    self.poll_once().await
                } => {
                    next_delay = match result {
                        Ok(outcome) if outcome.failed.is_empty() => Duration::ZERO,
                        Ok(_) | Err(_) => self.config.poll_error_delay,
                    };
                }
            }
        }
    }

    pub(crate) async fn run_server_list_refresher(
        self: Arc<Self>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) {
        let interval = self.config.server_list_refresh_interval;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!("apollo-sync server list refresher shutting down");
                    break;
                }
                result = async {
                    sleep(interval).await;
                    self.refresh_server_list().await
                } => {
                    if let Err(err) = result {
                        warn!(error = %err, "apollo-sync server list refresh failed; keeping current hosts");
                    }
                }
            }
        }
    }
}
