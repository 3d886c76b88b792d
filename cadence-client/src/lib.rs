//! Cadence client: realtime event stream and synchronized query cache.
//!
//! The [`realtime::ConnectionManager`] keeps one authenticated event-stream
//! session alive with exponential backoff and fans decoded events out to
//! handlers. The [`cache::QueryCache`] serves server state from memory,
//! goes stale when [`sync::CacheSync`] sees a related event, and supports
//! optimistic mutations with rollback. [`client::CadenceClient`] wires the
//! pieces together over the REST client and auth flow.

pub mod api_client;
pub mod auth;
pub mod backoff;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod keys;
pub mod notifications;
pub mod realtime;
pub mod sync;
pub mod telemetry;
pub mod token_store;
pub mod transport;

pub use api_client::{ApiClientError, RestClient};
pub use auth::{AuthFlow, TokenReader};
pub use client::{CadenceClient, ClientParts};
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use realtime::{ConnectionManager, ConnectionState, RealtimeConfig};
