//! Wires realtime events into cache invalidation and toasts.

use crate::cache::{InvalidationTable, QueryCache};
use crate::event_bus::HandlerId;
use crate::notifications::{Notification, NotificationCenter};
use crate::realtime::ConnectionManager;
use cadence_core::RealtimeEvent;
use std::sync::Arc;
use tracing::debug;

/// Apply one event: invalidate its table row, then raise its toast.
///
/// Returns the number of cache entries marked stale.
pub fn apply_event(
    event: &RealtimeEvent,
    cache: &QueryCache,
    table: &InvalidationTable,
    notifications: &NotificationCenter,
) -> usize {
    let invalidated = table.apply(event.kind, cache);
    if let Some(toast) = Notification::from_event(event) {
        notifications.push(toast);
    }
    invalidated
}

/// Registration of the cache-sync handler on a connection manager.
///
/// The handler runs inline on the connection task, so an event's
/// invalidations land before the next frame is read.
#[derive(Debug)]
pub struct CacheSync {
    handler: HandlerId,
}

impl CacheSync {
    pub fn attach(
        manager: &ConnectionManager,
        cache: QueryCache,
        table: Arc<InvalidationTable>,
        notifications: Arc<NotificationCenter>,
    ) -> Self {
        let handler = manager.on_event(move |event| {
            let invalidated = apply_event(event, &cache, &table, &notifications);
            debug!(kind = %event.kind, invalidated, "Synchronized cache with event");
        });
        Self { handler }
    }

    pub fn handler_id(&self) -> HandlerId {
        self.handler
    }

    pub fn detach(self, manager: &ConnectionManager) -> bool {
        manager.off_event(self.handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::ApiClientError;
    use crate::cache::QueryFetcher;
    use async_trait::async_trait;
    use cadence_core::{EventKind, Product, QueryKey};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct NullFetcher;

    #[async_trait]
    impl QueryFetcher for NullFetcher {
        async fn fetch(&self, _key: &QueryKey) -> Result<Value, ApiClientError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn notification_event_invalidates_and_toasts() {
        let cache = QueryCache::new(Arc::new(NullFetcher), Duration::from_secs(30));
        cache.set(QueryKey::new("unread-count"), json!(3));
        cache.set(QueryKey::new("notifications"), json!([]));
        cache.set(QueryKey::new("invoices"), json!([]));
        let table = InvalidationTable::for_product(Product::Practice);
        let center = NotificationCenter::default();

        let invalidated = apply_event(
            &RealtimeEvent::new(EventKind::Notification),
            &cache,
            &table,
            &center,
        );

        assert_eq!(invalidated, 2);
        assert!(cache.is_stale(&QueryKey::new("unread-count")));
        assert!(!cache.is_stale(&QueryKey::new("invoices")));
        assert_eq!(center.recent().len(), 1);
    }
}
