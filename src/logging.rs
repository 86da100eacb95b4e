use crate::config::LoggingConfig;
use crate::error::{MarginError, MarginResult};
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level. Returns an error if a global
/// subscriber is already set.
pub fn init(config: &LoggingConfig) -> MarginResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| MarginError::Other(format!("invalid log filter '{}': {e}", config.level)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| MarginError::Other(format!("logging already initialized: {e}")))
}
