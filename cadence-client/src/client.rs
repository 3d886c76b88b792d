//! Assembled client: REST, auth, realtime connection and synchronized cache.

use crate::api_client::{ApiClientError, RestClient};
use crate::cache::{InvalidationTable, Mutation, QueryCache, QueryFetcher, RestFetcher};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::keys::ChordDetector;
use crate::notifications::{Notification, NotificationCenter};
use crate::realtime::{ConnectionManager, RealtimeConfig};
use crate::sync::CacheSync;
use crate::token_store::{FileTokenStore, TokenStore};
use crate::transport::{Connector, WsConnector};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Replaceable seams of the client.
pub struct ClientParts {
    pub store: Arc<dyn TokenStore>,
    pub connector: Arc<dyn Connector>,
    /// Defaults to a [`RestFetcher`] over the configured routes.
    pub fetcher: Option<Arc<dyn QueryFetcher>>,
}

pub struct CadenceClient {
    config: ClientConfig,
    rest: RestClient,
    connection: ConnectionManager,
    cache: QueryCache,
    notifications: Arc<NotificationCenter>,
    sync: CacheSync,
}

impl CadenceClient {
    /// Client over WebSocket with credentials in the configured token file.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let parts = ClientParts {
            store: Arc::new(FileTokenStore::new(config.token_store_path.clone())),
            connector: Arc::new(WsConnector),
            fetcher: None,
        };
        Self::from_parts(config, parts)
    }

    pub fn from_parts(config: ClientConfig, parts: ClientParts) -> Result<Self, ClientError> {
        config.validate()?;
        let rest = RestClient::new(&config, parts.store)?;
        let fetcher = match parts.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(RestFetcher::new(rest.clone(), config.routes.clone())),
        };
        let cache = QueryCache::new(fetcher, config.cache.stale_after())
            .with_mutation_timeout(config.mutation_timeout());
        let connection = ConnectionManager::new(
            parts.connector,
            rest.auth().reader(),
            RealtimeConfig::from(&config),
        );
        let table =
            InvalidationTable::for_product(config.product).extend_from(&config.invalidation);
        let notifications = Arc::new(NotificationCenter::default());
        let sync = CacheSync::attach(
            &connection,
            cache.clone(),
            Arc::new(table),
            notifications.clone(),
        );

        Ok(Self {
            config,
            rest,
            connection,
            cache,
            notifications,
            sync,
        })
    }

    /// Sign in and open the event stream.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ClientError> {
        self.rest.auth().login(email, password).await?;
        self.connection.connect();
        Ok(())
    }

    /// Close the stream, end the session and drop all cached data.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.connection.close().await;
        self.rest.auth().logout().await?;
        self.cache.clear();
        info!("Signed out");
        Ok(())
    }

    /// Open the event stream if a usable session exists.
    pub fn connect(&self) {
        self.connection.connect();
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }

    /// Optimistic mutation; a failure other than an auth failure also
    /// raises an error toast.
    pub async fn mutate<T, F, Fut>(
        &self,
        mutation: &Mutation,
        server_call: F,
    ) -> Result<T, ApiClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiClientError>>,
    {
        let result = self.cache.mutate(mutation, server_call).await;
        if let Err(err) = &result {
            if let Some(toast) = Notification::for_mutation_error(err) {
                self.notifications.push(toast);
            }
        }
        result
    }

    pub fn chord_detector(&self) -> ChordDetector {
        ChordDetector::new(self.config.product, self.config.chord_timeout())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    pub fn sync(&self) -> &CacheSync {
        &self.sync
    }
}
