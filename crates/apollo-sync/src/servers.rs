//! Config-service host registry.
//!
//! The registry holds the candidate hosts for one application, remembers which
//! of them recently failed and for how long they stay excluded, and delegates
//! the choice among eligible hosts to a [`SelectionStrategy`]. The host table
//! sits behind a single mutex so a pick never races a concurrent
//! `mark_unusable` from the fetch or poll path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{normalize_host, AppConfig};
use crate::http::{endpoint_url, HttpClient, HttpError};

/// Errors surfaced by [`ServerRegistry::pick_server`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("no available server: all {known} known hosts are backed off")]
    NoAvailableServer { known: usize },
}

/// Chooses one host among the currently eligible candidates.
pub trait SelectionStrategy: Send + Sync + std::fmt::Debug {
    /// Returns the index of the chosen candidate, `None` when `candidates` is empty.
    fn select(&self, candidates: &[String]) -> Option<usize>;
}

/// Cycles through eligible hosts in declaration order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl SelectionStrategy for RoundRobin {
    fn select(&self, candidates: &[String]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.next.fetch_add(1, Ordering::Relaxed) % candidates.len())
    }
}

/// Failure bookkeeping for a single host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub address: String,
    pub last_failure: Option<Instant>,
    pub next_eligible: Option<Instant>,
}

impl HostState {
    fn new(address: String) -> Self {
        Self {
            address,
            last_failure: None,
            next_eligible: None,
        }
    }

    fn is_eligible(&self, now: Instant) -> bool {
        self.next_eligible.map_or(true, |at| at <= now)
    }
}

/// Candidate hosts plus their backoff state.
#[derive(Debug)]
pub struct ServerRegistry {
    hosts: Mutex<Vec<HostState>>,
    strategy: Arc<dyn SelectionStrategy>,
}

impl ServerRegistry {
    pub fn new<I>(hosts: I, strategy: Arc<dyn SelectionStrategy>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let registry = Self {
            hosts: Mutex::new(Vec::new()),
            strategy,
        };
        registry.replace_hosts(hosts);
        registry
    }

    /// Picks the next host among those not currently backed off.
    pub fn pick_server(&self) -> Result<String, ServerError> {
        let hosts = self.lock();
        let now = Instant::now();
        let eligible: Vec<String> = hosts
            .iter()
            .filter(|host| host.is_eligible(now))
            .map(|host| host.address.clone())
            .collect();
        self.strategy
            .select(&eligible)
            .and_then(|index| eligible.get(index).cloned())
            .ok_or(ServerError::NoAvailableServer { known: hosts.len() })
    }

    /// Excludes `host` from selection for `retry_after`.
    ///
    /// A zero delay records the failure but leaves the host immediately
    /// eligible. Unknown hosts are ignored.
    pub fn mark_unusable(&self, host: &str, retry_after: Duration) {
        let mut hosts = self.lock();
        let now = Instant::now();
        if let Some(state) = hosts.iter_mut().find(|state| state.address == host) {
            state.last_failure = Some(now);
            state.next_eligible = Some(now + retry_after);
        }
    }

    /// Replaces the host set, keeping the backoff state of hosts that remain.
    pub fn replace_hosts<I>(&self, hosts: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut table = self.lock();
        let mut next: Vec<HostState> = Vec::new();
        for address in hosts.into_iter().filter_map(|raw| normalize_host(&raw)) {
            if next.iter().any(|state| state.address == address) {
                continue;
            }
            let state = table
                .iter()
                .find(|state| state.address == address)
                .cloned()
                .unwrap_or_else(|| HostState::new(address));
            next.push(state);
        }
        *table = next;
    }

    /// Returns the known host addresses in declaration order.
    pub fn hosts(&self) -> Vec<String> {
        self.lock().iter().map(|state| state.address.clone()).collect()
    }

    /// Returns a copy of the host table for diagnostics.
    pub fn host_states(&self) -> Vec<HostState> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HostState>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Entry returned by the meta server's `/services/config` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceInstance {
    #[serde(default)]
    app_name: String,
    #[serde(default)]
    instance_id: String,
    homepage_url: String,
}

/// Asks the meta server at `meta_host` for the config-service instances
/// serving `app`, returning their base URLs.
pub async fn discover_config_services(
    http: &HttpClient,
    meta_host: &str,
    app: &AppConfig,
    timeout: Duration,
) -> Result<Vec<String>, HttpError> {
    let mut url = endpoint_url(meta_host, &["services", "config"])?;
    url.query_pairs_mut().append_pair("appId", &app.app_id);
    let response = http.get(url, app, timeout).await?;
    let instances: Vec<ServiceInstance> = serde_json::from_slice(&response.body)?;
    let hosts: Vec<String> = instances
        .iter()
        .filter_map(|instance| {
            tracing::debug!(
                app_name = %instance.app_name,
                instance_id = %instance.instance_id,
                homepage_url = %instance.homepage_url,
                "apollo-sync discovered config service"
            );
            normalize_host(&instance.homepage_url)
        })
        .collect();
    Ok(hosts)
}
