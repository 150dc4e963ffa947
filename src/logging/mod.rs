// Logging module for structured logging using the tracing crate

use std::error::Error;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for structured logging
///
/// Filtering follows `RUST_LOG` when set and defaults to `info` otherwise.
/// Output is human-readable; use [`init_subscriber_json`] for log
/// aggregation systems.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_subscriber() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .try_init()?;
    Ok(())
}

/// Initialize the tracing subscriber with JSON formatting
///
/// Suitable for container/cloud-native deployments where logs are shipped
/// to an aggregation system.
pub fn init_subscriber_json() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(default_filter())
        .try_init()?;
    Ok(())
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
