//! Cadence Core - Shared Types
//!
//! Pure data types shared by the realtime client and its test utilities:
//! session tokens, realtime events, query keys and product views.
//! No I/O lives here.

pub mod error;
pub mod event;
pub mod product;
pub mod query;
pub mod token;

pub use error::{EventDecodeError, TokenError};
pub use event::{EventData, EventKind, RealtimeEvent};
pub use product::{Product, View};
pub use query::{resources, KeyPattern, QueryKey};
pub use token::{SessionToken, TokenClaims, TokenPair};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
