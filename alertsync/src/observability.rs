//! Structured logging setup

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::{Error, Result}};

/// Install a JSON `tracing` subscriber filtered by `service.log_level`
///
/// An unparseable level falls back to `info`. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.service.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!(
        service = %config.service.name,
        environment = %config.service.environment,
        "Tracing initialized"
    );
    Ok(())
}

/// Flush hook for shutdown; the fmt subscriber writes synchronously
pub fn shutdown_tracing() {
    tracing::info!("Tracing shutdown complete");
}
