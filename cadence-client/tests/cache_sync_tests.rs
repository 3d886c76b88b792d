//! Realtime events driving the synchronized cache, and optimistic mutations.

use cadence_client::auth::TokenReader;
use cadence_client::cache::{InvalidationTable, Mutation, QueryCache};
use cadence_client::notifications::NotificationCenter;
use cadence_client::sync::CacheSync;
use cadence_client::{
    ApiClientError, CadenceClient, ClientParts, ConnectionManager, RealtimeConfig,
};
use cadence_test_utils::fixtures;
use cadence_test_utils::{
    EventKind, KeyPattern, MemoryConnector, Product, QueryKey, RealtimeEvent, ScriptedFetcher,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn cache_over(fetcher: &Arc<ScriptedFetcher>) -> QueryCache {
    QueryCache::new(fetcher.clone(), Duration::from_secs(30))
}

fn event_with(kind: EventKind, data: Value) -> RealtimeEvent {
    match data {
        Value::Object(map) => RealtimeEvent::new(kind).with_data(map),
        _ => RealtimeEvent::new(kind),
    }
}

#[tokio::test(start_paused = true)]
async fn test_notification_event_refreshes_unread_count() {
    let unread = QueryKey::new("unread-count");
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(unread.clone(), json!({ "count": 3 }));
    let cache = cache_over(&fetcher);

    let connector = Arc::new(MemoryConnector::accepting());
    let manager = ConnectionManager::new(
        connector.clone(),
        TokenReader::new(fixtures::signed_in_store()),
        RealtimeConfig::from(&fixtures::test_config()),
    );
    let center = Arc::new(NotificationCenter::default());
    let _sync = CacheSync::attach(
        &manager,
        cache.clone(),
        Arc::new(InvalidationTable::for_product(Product::Practice)),
        center.clone(),
    );
    // Registered after the sync handler, so it observes the event last.
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.on_event(move |event| {
        let _ = tx.send(event.kind);
    });

    assert_eq!(cache.read(&unread).await.unwrap().into_value(), json!({ "count": 3 }));

    manager.connect();
    let server = connector.next_server().await.unwrap();
    fetcher.respond(unread.clone(), json!({ "count": 4 }));
    server.send_event(&event_with(
        EventKind::Notification,
        json!({ "title": "Invoice #12 approved" }),
    ));
    assert_eq!(rx.recv().await, Some(EventKind::Notification));

    assert!(cache.meta(&unread).unwrap().stale);
    let read = cache.read(&unread).await.unwrap();
    assert!(read.was_cache_miss());
    assert_eq!(read.into_value(), json!({ "count": 4 }));
    assert_eq!(fetcher.calls(), 2);

    let toasts = center.recent();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].message, "Invoice #12 approved");

    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_event_leaves_entries_fresh() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let cache = cache_over(&fetcher);
    cache.set(QueryKey::new("invoices"), json!([]));
    let center = NotificationCenter::default();

    let invalidated = cadence_client::sync::apply_event(
        &RealtimeEvent::new(EventKind::DocumentProcessed),
        &cache,
        &InvalidationTable::for_product(Product::Practice),
        &center,
    );
    assert_eq!(invalidated, 0);
    assert!(!cache.is_stale(&QueryKey::new("invoices")));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_racing_invalidation_does_not_overwrite() {
    let key = QueryKey::new("dashboard");
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(key.clone(), json!({ "open": 1 }));
    fetcher.set_delay(Duration::from_secs(1));
    let cache = cache_over(&fetcher);

    let reader = cache.clone();
    let read_key = key.clone();
    let in_flight = tokio::spawn(async move { reader.read(&read_key).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cache.meta(&key).unwrap().in_flight);
    assert_eq!(cache.invalidate(&KeyPattern::resource("dashboard")), 1);

    let read = in_flight.await.unwrap().unwrap();
    assert_eq!(read.into_value(), json!({ "open": 1 }));
    assert_eq!(cache.peek(&key), None);
    assert!(cache.is_stale(&key));
    assert_eq!(cache.stats().discarded_fetches, 1);

    fetcher.set_delay(Duration::ZERO);
    cache.read(&key).await.unwrap();
    assert_eq!(cache.peek(&key), Some(json!({ "open": 1 })));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mutation_restores_exact_value() {
    let key = QueryKey::new("invoices").with_param("status", "open");
    let original = json!([{ "id": 7, "status": "open", "amount": 1200 }]);
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(key.clone(), original.clone());
    let cache = cache_over(&fetcher);
    cache.read(&key).await.unwrap();

    let mutation = Mutation::new("mark-paid", |_| json!([])).target(key.clone());
    let result: Result<(), ApiClientError> = cache
        .mutate(&mutation, || async {
            assert_eq!(cache.peek(&key), Some(json!([])));
            Err(ApiClientError::Status {
                status: 500,
                message: "ledger unavailable".into(),
            })
        })
        .await;

    assert!(matches!(result, Err(ApiClientError::Status { status: 500, .. })));
    assert_eq!(cache.peek(&key), Some(original.clone()));
    assert!(cache.is_stale(&key));
    assert_eq!(cache.stats().rollbacks, 1);

    let read = cache.read(&key).await.unwrap();
    assert!(read.was_cache_miss());
    assert_eq!(read.into_value(), original);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_mutations_keep_their_own_snapshots() {
    let key = QueryKey::new("unread-count");
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(key.clone(), json!(10));
    let cache = cache_over(&fetcher);
    cache.read(&key).await.unwrap();

    let increment = Mutation::new("increment", |value: &Value| {
        json!(value.as_i64().unwrap_or_default() + 1)
    })
    .target(key.clone());
    let double = Mutation::new("double", |value: &Value| {
        json!(value.as_i64().unwrap_or_default() * 2)
    })
    .target(key.clone());

    // `increment` patches first and fails late; `double` patches on top of
    // it and succeeds right away.
    let (slow, fast) = tokio::join!(
        cache.mutate(&increment, || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Err::<(), _>(ApiClientError::Status {
                status: 409,
                message: "conflict".into(),
            })
        }),
        cache.mutate(&double, || async {
            assert_eq!(cache.peek(&key), Some(json!(22)));
            Ok::<_, ApiClientError>(())
        }),
    );

    assert!(fast.is_ok());
    assert!(matches!(slow, Err(ApiClientError::Status { status: 409, .. })));
    assert_eq!(cache.peek(&key), Some(json!(10)));
    assert_eq!(cache.stats().rollbacks, 1);
    assert!(cache.is_stale(&key));
    assert_eq!(cache.meta(&key).unwrap().invalidations, 2);

    fetcher.respond(key.clone(), json!(20));
    assert_eq!(cache.read(&key).await.unwrap().into_value(), json!(20));
}

#[tokio::test(start_paused = true)]
async fn test_successful_mutation_reconciles_with_server() {
    let key = QueryKey::new("unread-count");
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(key.clone(), json!(5));
    let cache = cache_over(&fetcher);
    cache.read(&key).await.unwrap();

    let mutation = Mutation::new("mark-all-read", |_| json!(0)).target(key.clone());
    fetcher.respond(key.clone(), json!(1));
    let value = cache
        .mutate(&mutation, || async { Ok::<_, ApiClientError>("done") })
        .await
        .unwrap();

    assert_eq!(value, "done");
    assert_eq!(cache.peek(&key), Some(json!(0)));
    assert!(cache.is_stale(&key));
    assert_eq!(cache.read(&key).await.unwrap().into_value(), json!(1));
}

#[tokio::test(start_paused = true)]
async fn test_client_toasts_failed_mutations_except_auth() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let client = CadenceClient::from_parts(
        fixtures::test_config(),
        ClientParts {
            store: fixtures::signed_in_store(),
            connector: Arc::new(MemoryConnector::refusing()),
            fetcher: Some(fetcher),
        },
    )
    .unwrap();
    let mutation = Mutation::new("noop", Value::clone);

    let _ = client
        .mutate(&mutation, || async {
            Err::<(), _>(ApiClientError::Status {
                status: 422,
                message: "Due date is in the past".into(),
            })
        })
        .await;
    let _ = client
        .mutate(&mutation, || async {
            Err::<(), _>(ApiClientError::Unauthorized("expired".into()))
        })
        .await;

    let toasts = client.notifications().recent();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].message, "Due date is in the past");
}

#[tokio::test(start_paused = true)]
async fn test_client_events_reach_cache_through_sync() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let connector = Arc::new(MemoryConnector::accepting());
    let mut config = fixtures::test_config();
    config.product = Product::Talent;
    let client = CadenceClient::from_parts(
        config,
        ClientParts {
            store: fixtures::signed_in_store(),
            connector: connector.clone(),
            fetcher: Some(fetcher),
        },
    )
    .unwrap();
    client.cache().set(QueryKey::new("pipeline"), json!([]));
    client.cache().set(QueryKey::new("invoices"), json!([]));
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.connection().on_event(move |event| {
        let _ = tx.send(event.kind);
    });

    client.connect();
    let server = connector.next_server().await.unwrap();
    server.send_event(&RealtimeEvent::new(EventKind::CandidateApplied));
    assert_eq!(rx.recv().await, Some(EventKind::CandidateApplied));

    assert!(client.cache().is_stale(&QueryKey::new("pipeline")));
    assert!(!client.cache().is_stale(&QueryKey::new("invoices")));
    assert_eq!(
        client.notifications().recent()[0].message,
        "New candidate application"
    );
    client.close().await;
}
