//! Error types for Cadence core data handling

use thiserror::Error;

/// Session token inspection errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token is empty")]
    Empty,

    #[error("Token is not a JWT: expected 3 segments, found {segments}")]
    NotJwt { segments: usize },

    #[error("Token payload is not valid base64url: {reason}")]
    Encoding { reason: String },

    #[error("Token claims are not valid JSON: {reason}")]
    Claims { reason: String },
}

/// Reasons an inbound event-stream frame was discarded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventDecodeError {
    /// Frame is not JSON at all (heartbeat acknowledgements like `pong`).
    #[error("Frame is not JSON")]
    NotJson,

    #[error("Frame has no string `type` field")]
    MissingType,

    #[error("Unrecognized event type: {0}")]
    UnknownType(String),

    #[error("Malformed event payload: {0}")]
    Malformed(String),
}
