//! Authentication flow: the single writer of the session credentials.
//!
//! Login, refresh and logout are the only operations that mutate the token
//! store. Everything else receives a [`TokenReader`], so a refresh in
//! progress can never race with another component rewriting the token.

use crate::api_client::{error_message, parse_response, ApiClientError};
use crate::token_store::TokenStore;
use cadence_core::{SessionToken, TokenPair};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Read-only view of the token store.
#[derive(Clone)]
pub struct TokenReader {
    store: Arc<dyn TokenStore>,
}

impl TokenReader {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    fn load(&self) -> Option<TokenPair> {
        match self.store.load() {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(error = %err, "Failed to read token store");
                None
            }
        }
    }

    pub fn access_token(&self) -> Option<SessionToken> {
        self.load().map(|tokens| tokens.access_token)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.load().and_then(|tokens| tokens.refresh_token)
    }

    /// Access token that is present and not past its expiry claim.
    pub fn usable_access_token(&self) -> Option<SessionToken> {
        self.access_token().filter(SessionToken::is_usable)
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: SessionToken,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Clone)]
pub struct AuthFlow {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    refresh_lock: Arc<Mutex<()>>,
}

impl AuthFlow {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            store,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn reader(&self) -> TokenReader {
        TokenReader::new(self.store.clone())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ApiClientError> {
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        let response = self
            .http
            .post(url)
            .json(&LoginRequest { email, password })
            .send()
            .await?;
        let tokens: TokenPair = parse_response(response).await?;
        self.store.save(&tokens)?;
        info!("Session established");
        Ok(tokens)
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Concurrent callers are serialized; a caller whose `rejected` token was
    /// already replaced by another refresh gets the new token without a
    /// second exchange. A refresh the server rejects clears the store.
    pub async fn refresh(
        &self,
        rejected: Option<&SessionToken>,
    ) -> Result<SessionToken, ApiClientError> {
        let _guard = self.refresh_lock.lock().await;

        let Some(current) = self.store.load()? else {
            return Err(ApiClientError::Unauthorized("no active session".to_string()));
        };
        if let Some(rejected) = rejected {
            if current.access_token != *rejected && current.access_token.is_usable() {
                debug!("Session already refreshed by a concurrent request");
                return Ok(current.access_token);
            }
        }
        let Some(refresh_token) = current.refresh_token.clone() else {
            self.store.clear()?;
            return Err(ApiClientError::Unauthorized(
                "no refresh token available".to_string(),
            ));
        };

        let url = format!("{}{}", self.base_url, REFRESH_PATH);
        let response = self
            .http
            .post(url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            if matches!(
                status,
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) {
                warn!(status = status.as_u16(), "Refresh rejected, clearing session");
                self.store.clear()?;
                return Err(ApiClientError::Unauthorized(message));
            }
            return Err(ApiClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let refreshed: RefreshResponse = response.json().await?;
        let tokens = TokenPair {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
        };
        self.store.save(&tokens)?;
        info!("Session token refreshed");
        Ok(tokens.access_token)
    }

    /// End the session. The server call is best-effort; local credentials
    /// are always cleared.
    pub async fn logout(&self) -> Result<(), ApiClientError> {
        if let Some(token) = self.reader().access_token() {
            let url = format!("{}{}", self.base_url, LOGOUT_PATH);
            let result = self.http.post(url).bearer_auth(token.as_str()).send().await;
            if let Err(err) = result {
                warn!(error = %err, "Logout request failed");
            }
        }
        self.store.clear()?;
        info!("Session cleared");
        Ok(())
    }

    /// Token to attach to an outgoing request, refreshing it first when it
    /// is past its expiry claim.
    pub(crate) async fn access_token_for_request(
        &self,
    ) -> Result<Option<SessionToken>, ApiClientError> {
        let reader = self.reader();
        let Some(tokens) = reader.load() else {
            return Ok(None);
        };
        if tokens.access_token.is_usable() {
            return Ok(Some(tokens.access_token));
        }
        if tokens.refresh_token.is_some() {
            debug!("Access token expired, refreshing before request");
            return self.refresh(Some(&tokens.access_token)).await.map(Some);
        }
        Ok(None)
    }
}
