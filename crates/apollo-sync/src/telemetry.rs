//! Ready-made [`SyncTelemetry`] implementations.
//!
//! [`CountingTelemetry`] keeps relaxed atomic counters that embedders can
//! export through whatever metrics pipeline they run; [`CompositeTelemetry`]
//! fans events out to several observers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::sync::{SyncError, SyncTelemetry};

/// Aggregated telemetry counters.
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    fetch_success: AtomicU64,
    fetch_error: AtomicU64,
    poll_success: AtomicU64,
    poll_error: AtomicU64,
    notifications: AtomicU64,
    cache_fallback: AtomicU64,
    host_unusable: AtomicU64,
}

impl TelemetryCounters {
    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            fetch_success: self.fetch_success.load(Ordering::Relaxed),
            fetch_error: self.fetch_error.load(Ordering::Relaxed),
            poll_success: self.poll_success.load(Ordering::Relaxed),
            poll_error: self.poll_error.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            cache_fallback: self.cache_fallback.load(Ordering::Relaxed),
            host_unusable: self.host_unusable.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`TelemetryCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySnapshot {
    pub fetch_success: u64,
    pub fetch_error: u64,
    pub poll_success: u64,
    pub poll_error: u64,
    /// Fresh notifications received across all polls.
    pub notifications: u64,
    pub cache_fallback: u64,
    pub host_unusable: u64,
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetch_success={}, fetch_error={}, poll_success={}, poll_error={}, notifications={}, cache_fallback={}, host_unusable={}",
            self.fetch_success,
            self.fetch_error,
            self.poll_success,
            self.poll_error,
            self.notifications,
            self.cache_fallback,
            self.host_unusable
        )
    }
}

/// Telemetry implementation that maintains atomic counters for every signal.
#[derive(Debug, Clone)]
pub struct CountingTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl CountingTelemetry {
    /// Creates a new telemetry instance backed by the provided counter set.
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self { counters }
    }

    pub fn counters(&self) -> Arc<TelemetryCounters> {
        self.counters.clone()
    }
}

impl Default for CountingTelemetry {
    fn default() -> Self {
        Self::new(Arc::new(TelemetryCounters::default()))
    }
}

impl SyncTelemetry for CountingTelemetry {
    fn on_fetch_success(&self, _namespace: &str) {
        self.counters.fetch_success.fetch_add(1, Ordering::Relaxed);
    }

    fn on_fetch_error(&self, _namespace: &str, _error: &SyncError) {
        self.counters.fetch_error.fetch_add(1, Ordering::Relaxed);
    }

    fn on_poll_success(&self, changed: usize) {
        self.counters.poll_success.fetch_add(1, Ordering::Relaxed);
        self.counters
            .notifications
            .fetch_add(changed as u64, Ordering::Relaxed);
    }

    fn on_poll_error(&self, _error: &SyncError) {
        self.counters.poll_error.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cache_fallback(&self, _namespace: &str) {
        self.counters.cache_fallback.fetch_add(1, Ordering::Relaxed);
    }

    fn on_host_unusable(&self, _host: &str) {
        self.counters.host_unusable.fetch_add(1, Ordering::Relaxed);
    }
}

/// Telemetry implementation that forwards events to multiple observers.
pub struct CompositeTelemetry {
    observers: Vec<Arc<dyn SyncTelemetry>>,
}

impl CompositeTelemetry {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds a telemetry observer to the dispatcher.
    pub fn with_observer(mut self, telemetry: Arc<dyn SyncTelemetry>) -> Self {
        self.observers.push(telemetry);
        self
    }

    pub fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = Arc<dyn SyncTelemetry>>,
    {
        self.observers.extend(iter);
    }
}

impl Default for CompositeTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompositeTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeTelemetry")
            .field("observer_count", &self.observers.len())
            .finish()
    }
}

impl SyncTelemetry for CompositeTelemetry {
    fn on_fetch_success(&self, namespace: &str) {
        for observer in &self.observers {
            observer.on_fetch_success(namespace);
        }
    }

    fn on_fetch_error(&self, namespace: &str, error: &SyncError) {
        for observer in &self.observers {
            observer.on_fetch_error(namespace, error);
        }
    }

    fn on_poll_success(&self, changed: usize) {
        for observer in &self.observers {
            observer.on_poll_success(changed);
        }
    }

    fn on_poll_error(&self, error: &SyncError) {
        for observer in &self.observers {
            observer.on_poll_error(error);
        }
    }

    fn on_cache_fallback(&self, namespace: &str) {
        for observer in &self.observers {
            observer.on_cache_fallback(namespace);
        }
    }

    fn on_host_unusable(&self, host: &str) {
        for observer in &self.observers {
            observer.on_host_unusable(host);
        }
    }
}
