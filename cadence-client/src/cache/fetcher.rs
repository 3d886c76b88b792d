//! Fetchers that load a query's server value on cache miss.

use crate::api_client::{ApiClientError, RestClient};
use async_trait::async_trait;
use cadence_core::QueryKey;
use reqwest::Url;
use serde_json::Value;
use std::collections::BTreeMap;

/// Loads the current server value for a query key.
///
/// Abstracts over the REST client so the cache can be driven by scripted
/// values in tests.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<Value, ApiClientError>;
}

/// Fetches query keys over REST.
///
/// A route template may reference key params as `{name}`; those params are
/// percent-encoded into the path as a single segment each, and the rest
/// become the query string. A
/// resource without a route is fetched from `/<resource>`.
#[derive(Clone)]
pub struct RestFetcher {
    client: RestClient,
    routes: BTreeMap<String, String>,
}

impl RestFetcher {
    pub fn new(client: RestClient, routes: BTreeMap<String, String>) -> Self {
        Self { client, routes }
    }

    pub fn with_route(mut self, resource: impl Into<String>, template: impl Into<String>) -> Self {
        self.routes.insert(resource.into(), template.into());
        self
    }

    /// Path and remaining query params for a key.
    pub fn resolve(&self, key: &QueryKey) -> Result<(String, Vec<(String, String)>), ApiClientError> {
        let template = self
            .routes
            .get(key.resource())
            .cloned()
            .unwrap_or_else(|| format!("/{}", key.resource()));

        let mut path = String::with_capacity(template.len());
        let mut used = Vec::new();
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                return Err(ApiClientError::Config(format!(
                    "unterminated placeholder in route '{}'",
                    template
                )));
            };
            let name = &rest[open + 1..open + close];
            let value = key.params().get(name).ok_or_else(|| {
                ApiClientError::Config(format!(
                    "route '{}' needs param '{}' missing from key {}",
                    template, name, key
                ))
            })?;
            path.push_str(&rest[..open]);
            path.push_str(&encode_segment(value)?);
            used.push(name);
            rest = &rest[open + close + 1..];
        }
        path.push_str(rest);

        let query = key
            .params()
            .iter()
            .filter(|(name, _)| !used.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok((path, query))
    }
}

fn encode_segment(value: &str) -> Result<String, ApiClientError> {
    let mut url = Url::parse("http://segment.invalid/")
        .map_err(|err| ApiClientError::Config(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| ApiClientError::Config("cannot encode path segment".to_string()))?
        .push(value);
    Ok(url.path().trim_start_matches('/').to_string())
}

#[async_trait]
impl QueryFetcher for RestFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<Value, ApiClientError> {
        let (path, query) = self.resolve(key)?;
        self.client.get(&path, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::token_store::MemoryTokenStore;
    use std::sync::Arc;

    fn fetcher() -> RestFetcher {
        let config = ClientConfig::new(
            "http://127.0.0.1:9/api",
            "ws://127.0.0.1:9/ws",
            std::env::temp_dir().join("cadence-fetcher-test.json"),
        );
        let client = RestClient::new(&config, Arc::new(MemoryTokenStore::new())).unwrap();
        RestFetcher::new(client, BTreeMap::new())
    }

    #[test]
    fn unrouted_resource_uses_its_name() {
        let (path, query) = fetcher()
            .resolve(&QueryKey::new("invoices").with_param("status", "open"))
            .unwrap();
        assert_eq!(path, "/invoices");
        assert_eq!(query, vec![("status".to_string(), "open".to_string())]);
    }

    #[test]
    fn placeholders_consume_params() {
        let fetcher = fetcher().with_route("unread-count", "/notifications/{user}/unread-count");
        let key = QueryKey::new("unread-count")
            .with_param("user", "42")
            .with_param("scope", "all");
        let (path, query) = fetcher.resolve(&key).unwrap();
        assert_eq!(path, "/notifications/42/unread-count");
        assert_eq!(query, vec![("scope".to_string(), "all".to_string())]);
    }

    #[test]
    fn missing_placeholder_param_is_a_config_error() {
        let fetcher = fetcher().with_route("clients", "/clients/{id}");
        assert!(matches!(
            fetcher.resolve(&QueryKey::new("clients")),
            Err(ApiClientError::Config(_))
        ));
    }

    #[test]
    fn placeholder_values_cannot_escape_their_segment() {
        let fetcher = fetcher().with_route("client", "/clients/{id}/notes");
        let key = QueryKey::new("client").with_param("id", "a/b?c#d e");
        let (path, query) = fetcher.resolve(&key).unwrap();
        assert_eq!(path, "/clients/a%2Fb%3Fc%23d%20e/notes");
        assert!(query.is_empty());
    }
}
