//! Public entry points for the apollo-sync crate.
//!
//! The crate keeps a process's view of Apollo configuration namespaces
//! current: it bootstraps every namespace once, long-polls the config service
//! for change notifications, re-fetches changed namespaces with bounded
//! retry and host failover, and mirrors every snapshot to a local file cache
//! used when the config service is unreachable at startup.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod auth;
pub mod cache;
pub mod config;
pub mod fetcher;
pub mod http;
pub mod model;
pub mod poller;
pub mod servers;
pub mod status;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use auth::{ApolloSigner, RequestSigner};
pub use cache::{CacheError, FileCodec, JsonCodec, LocalFileCache};
pub use config::{AppConfig, AppConfigProvider, ConfigError};
pub use fetcher::{ConfigFetcher, FetchOutcome};
pub use http::{HttpClient, HttpClientOptions, HttpError, HttpResponse};
pub use model::{
    parse_apollo_config, parse_notifications, ApolloConfig, Notification, DEFAULT_NOTIFICATION_ID,
};
pub use poller::NotificationPoller;
pub use servers::{
    discover_config_services, HostState, RoundRobin, SelectionStrategy, ServerError,
    ServerRegistry,
};
pub use status::{StatusSnapshot, SyncStatus};
pub use store::ConfigStore;
pub use sync::{
    BootstrapReport, NamespaceBootstrap, NamespaceSource, PollOutcome, RetryPolicy, SyncConfig,
    SyncError, SyncHandle, SyncService, SyncServiceBuilder, SyncTelemetry,
};
pub use telemetry::{CompositeTelemetry, CountingTelemetry, TelemetryCounters, TelemetrySnapshot};
