//! Static timing configuration for the sync service.
//!
//! Every retry and timeout constant lives here with a documented default so
//! embedders can tune them without touching the service. `sanitise()` clamps
//! values that would make the service spin or stall.

use std::time::Duration;

use tracing::warn;

/// Default number of attempts per fetch or poll cycle.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default period a failed host is excluded from selection.
pub const DEFAULT_HOST_BACKOFF: Duration = Duration::from_secs(30);
/// Default pause between two attempts of the same cycle.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Default timeout for a namespace fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Default client ceiling for one long poll. The config service holds polls
/// for 60 seconds.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(90);
/// Default pause before re-polling after a failed cycle.
pub const DEFAULT_POLL_ERROR_DELAY: Duration = Duration::from_secs(1);
/// Default cadence of meta-server discovery.
pub const DEFAULT_SERVER_LIST_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Upper bound on attempts per cycle.
pub const MAX_ATTEMPTS_LIMIT: u32 = 20;
/// Smallest long-poll ceiling that still outlasts the server-side hold.
pub const MIN_POLL_TIMEOUT: Duration = Duration::from_secs(65);
/// Smallest discovery cadence accepted.
pub const MIN_SERVER_LIST_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded retry-with-failover policy shared by the fetch and poll paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per cycle before giving up with "retry budget exhausted".
    pub max_attempts: u32,
    /// Backoff window applied to a host after a transport failure.
    pub host_backoff: Duration,
    /// Pause between attempts.
    pub retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            host_backoff: DEFAULT_HOST_BACKOFF,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Configuration values that control the sync service runtime.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    pub fetch_timeout: Duration,
    pub poll_timeout: Duration,
    pub poll_error_delay: Duration,
    pub server_list_refresh_interval: Duration,
    /// When false `sanitise()` leaves every value untouched (intended for tests only).
    pub enforce_limits: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            poll_error_delay: DEFAULT_POLL_ERROR_DELAY,
            server_list_refresh_interval: DEFAULT_SERVER_LIST_REFRESH_INTERVAL,
            enforce_limits: true,
        }
    }
}

impl SyncConfig {
    /// Applies safety limits to the timing settings.
    pub(crate) fn sanitise(mut self) -> Self {
        if self.retry.max_attempts == 0 {
            warn!(
                "retry max attempts must be > 0; using {}",
                DEFAULT_MAX_ATTEMPTS
            );
            self.retry.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }

        if !self.enforce_limits {
            return self;
        }

        if self.retry.max_attempts > MAX_ATTEMPTS_LIMIT {
            warn!(
                "retry max attempts {} above maximum {}; clamping",
                self.retry.max_attempts, MAX_ATTEMPTS_LIMIT
            );
            self.retry.max_attempts = MAX_ATTEMPTS_LIMIT;
        }

        if self.retry.retry_interval.is_zero() {
            warn!(
                "retry interval must be > 0; defaulting to {:?}",
                DEFAULT_RETRY_INTERVAL
            );
            self.retry.retry_interval = DEFAULT_RETRY_INTERVAL;
        }

        if self.fetch_timeout.is_zero() {
            warn!(
                "fetch timeout must be > 0; defaulting to {:?}",
                DEFAULT_FETCH_TIMEOUT
            );
            self.fetch_timeout = DEFAULT_FETCH_TIMEOUT;
        }

        if self.poll_timeout < MIN_POLL_TIMEOUT {
            warn!(
                "poll timeout {:?} is below the minimum {:?}; using {:?} instead",
                self.poll_timeout, MIN_POLL_TIMEOUT, DEFAULT_POLL_TIMEOUT
            );
            self.poll_timeout = DEFAULT_POLL_TIMEOUT;
        }

        if self.poll_error_delay.is_zero() {
            warn!(
                "poll error delay must be > 0; defaulting to {:?}",
                DEFAULT_POLL_ERROR_DELAY
            );
            self.poll_error_delay = DEFAULT_POLL_ERROR_DELAY;
        }

        if self.server_list_refresh_interval < MIN_SERVER_LIST_REFRESH_INTERVAL {
            warn!(
                "server list refresh interval {:?} is below the minimum {:?}; clamping",
                self.server_list_refresh_interval, MIN_SERVER_LIST_REFRESH_INTERVAL
            );
            self.server_list_refresh_interval = MIN_SERVER_LIST_REFRESH_INTERVAL;
        }

        self
    }
}
