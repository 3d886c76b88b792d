//! Session tokens and the claims embedded in them.
//!
//! Access tokens are opaque bearer credentials to everything except the
//! expiry check: when a token is a JWT its `exp` claim is decoded (without
//! signature verification) so callers can avoid sending a token the server
//! will reject anyway.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::TokenError;

/// Opaque bearer credential.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the unverified JWT claims of this token.
    pub fn claims(&self) -> Result<TokenClaims, TokenError> {
        if self.0.is_empty() {
            return Err(TokenError::Empty);
        }
        let segments: Vec<&str> = self.0.split('.').collect();
        if segments.len() != 3 {
            return Err(TokenError::NotJwt {
                segments: segments.len(),
            });
        }
        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| TokenError::Encoding {
                reason: e.to_string(),
            })?;
        let raw: Value = serde_json::from_slice(&payload).map_err(|e| TokenError::Claims {
            reason: e.to_string(),
        })?;

        let exp = raw.get("exp").and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_f64().map(|secs| secs as i64))
        });
        Ok(TokenClaims {
            sub: raw.get("sub").and_then(Value::as_str).map(str::to_string),
            tenant_id: raw
                .get("tenant_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            exp,
        })
    }

    /// Expiry instant from the `exp` claim, if the token carries one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.claims().ok()?.exp?;
        Utc.timestamp_opt(exp, 0).single()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at(), Some(expires_at) if expires_at <= now)
    }

    /// A token is usable when it is non-empty and not past its `exp` claim.
    ///
    /// Tokens without a decodable `exp` are treated as opaque and usable.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.0.is_empty() && !self.is_expired_at(now)
    }

    pub fn is_usable(&self) -> bool {
        self.is_usable_at(Utc::now())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&"<redacted>").finish()
    }
}

impl From<&str> for SessionToken {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for SessionToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Claims the client cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub tenant_id: Option<String>,
    /// Expiry in epoch seconds.
    pub exp: Option<i64>,
}

/// Access/refresh credentials as issued by the auth endpoints and as
/// persisted by token stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: SessionToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<SessionToken>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}
