//! Tracing subscriber setup.

use crate::config::{LogConfig, LogFormat};
use crate::error::ClientError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "cadence_client=debug,info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured filter, which wins over
/// [`DEFAULT_FILTER`]. Fails if a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), ClientError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.filter.as_deref().unwrap_or(DEFAULT_FILTER))
    });

    let json = config.format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init()
        .map_err(|e| ClientError::Telemetry(e.to_string()))?;

    tracing::info!(format = ?config.format, "Logging initialized");
    Ok(())
}
