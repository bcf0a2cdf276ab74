//! Shared data model, error taxonomy, configuration loader and retry
//! primitives used across every ServerSentry crate.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{Config, ConfigLoader};
pub use error::{Error, FaultKind, Result};
pub use retry::{retry_for_error, retry_operation, RetryExecutor, RetryStrategy};
pub use types::*;

/// Installs the global `tracing` subscriber, honoring `system.log_level`
/// from configuration. Called once, from the agent binary's `main`.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
