//! REST client with bearer-token attachment and transparent session refresh.

use crate::auth::AuthFlow;
use crate::config::ClientConfig;
use crate::token_store::{TokenStore, TokenStoreError};
use cadence_core::SessionToken;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Not authenticated: {0}")]
    Unauthorized(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Token store error: {0}")]
    TokenStore(#[from] TokenStoreError),
    #[error("Config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ApiClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

impl ApiClientError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Authentication failures are handled by the global sign-in flow and
    /// never shown as a separate error.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_)) || self.status() == Some(401)
    }
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    auth: AuthFlow,
}

impl RestClient {
    pub fn new(config: &ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self, ApiClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let base_url = config.api_base_url.trim_end_matches('/').to_string();
        let auth = AuthFlow::new(client.clone(), base_url.clone(), store);
        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    pub fn auth(&self) -> &AuthFlow {
        &self.auth
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T>(&self, path: &str, query: &[(String, String)]) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
    {
        self.request::<T, ()>(Method::GET, path, query, None).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete<T>(&self, path: &str) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
    {
        self.request::<T, ()>(Method::DELETE, path, &[], None).await
    }

    /// Issue a request and decode the JSON response.
    ///
    /// An expired access token is refreshed before sending. A 401 response
    /// triggers exactly one refresh and retry; the retry's outcome is final.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let token = self.auth.access_token_for_request().await?;
        let response = self
            .dispatch(&method, path, query, body, token.as_ref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && self.auth.reader().refresh_token().is_some()
        {
            debug!(%method, path, "Received 401, refreshing session and retrying once");
            let refreshed = self.auth.refresh(token.as_ref()).await?;
            let retry = self
                .dispatch(&method, path, query, body, Some(&refreshed))
                .await?;
            return parse_response(retry).await;
        }

        parse_response(response).await
    }

    async fn dispatch<B>(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
        token: Option<&SessionToken>,
    ) -> Result<reqwest::Response, ApiClientError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

/// Decode a response body; empty success bodies decode from JSON `null`.
pub(crate) async fn parse_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiClientError> {
    let status = response.status();
    if status.is_success() {
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        return Ok(serde_json::from_slice(&bytes)?);
    }
    let message = error_message(response).await;
    Err(ApiClientError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Best human-readable message from an error response.
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if let Ok(body) = serde_json::from_str::<Value>(&text) {
        for field in ["message", "detail", "error"] {
            if let Some(message) = body.get(field).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    if text.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text
    }
}
