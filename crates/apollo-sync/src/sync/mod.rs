//! Sync service module facade.
//!
//! Re-exports the high-level service API while wiring the submodules that
//! implement timing configuration, orchestrator state, the refresh loops and
//! telemetry hooks.

pub(crate) mod config;
mod core;
pub(crate) mod refresh;
pub(crate) mod state;
pub(crate) mod telemetry;
#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

pub use config::{RetryPolicy, SyncConfig};
pub use core::*;
pub use telemetry::SyncTelemetry;
