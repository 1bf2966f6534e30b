//! Sync-level telemetry abstractions.
//!
//! Embedders can implement [`SyncTelemetry`] to observe fetch, poll and
//! fallback outcomes without reaching into the service internals. Every hook
//! defaults to a no-op.

use super::SyncError;

/// Telemetry hook invoked on significant sync events.
pub trait SyncTelemetry: Send + Sync {
    /// Called after a namespace snapshot was committed (or confirmed unchanged).
    fn on_fetch_success(&self, _namespace: &str) {}
    /// Called when fetching a namespace failed for the whole cycle.
    fn on_fetch_error(&self, _namespace: &str, _error: &SyncError) {}
    /// Called after a long poll returned, with the number of fresh notifications.
    fn on_poll_success(&self, _changed: usize) {}
    /// Called when a long-poll cycle failed.
    fn on_poll_error(&self, _error: &SyncError) {}
    /// Called when bootstrap served a namespace from the local cache.
    fn on_cache_fallback(&self, _namespace: &str) {}
    /// Called whenever a host is backed off after a failed request.
    fn on_host_unusable(&self, _host: &str) {}
}

/// Default telemetry implementation that performs no-ops.
#[derive(Debug, Default)]
pub(crate) struct NoopTelemetry;

impl SyncTelemetry for NoopTelemetry {}
