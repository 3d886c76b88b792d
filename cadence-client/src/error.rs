//! Top-level error for the client stack and the `cadence-sync` binary.

use crate::api_client::ApiClientError;
use crate::config::ConfigError;
use crate::token_store::TokenStoreError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),
    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),
}
