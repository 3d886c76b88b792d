//! Cadence Test Utilities
//!
//! Shared test infrastructure for the Cadence workspace:
//! - In-memory event-stream connector with a scriptable server side
//! - Scripted query fetcher
//! - Fixtures for configs and session tokens
//! - Proptest generators for events, keys and backoff settings

pub use cadence_client::{ApiClientError, ClientConfig};
pub use cadence_core::{
    EventKind, KeyPattern, Product, QueryKey, RealtimeEvent, SessionToken, Timestamp, TokenPair,
};

use async_trait::async_trait;
use cadence_client::cache::QueryFetcher;
use cadence_client::transport::{Connector, InboundFrame, Transport, TransportError};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

// ============================================================================
// IN-MEMORY TRANSPORT
// ============================================================================

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Fail as if the server were unreachable.
    Refuse,
    /// Fail the handshake with HTTP 401.
    RejectAuth,
    /// Open a session and hand its server side to the test.
    Accept,
}

#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub url: String,
    pub at: Instant,
}

/// Connector whose sessions are driven by the test through [`ServerHandle`]s.
pub struct MemoryConnector {
    plan: Mutex<VecDeque<ConnectOutcome>>,
    fallback: ConnectOutcome,
    attempts: Mutex<Vec<ConnectAttempt>>,
    servers_tx: mpsc::UnboundedSender<ServerHandle>,
    servers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerHandle>>,
}

impl MemoryConnector {
    /// Every attempt not covered by [`MemoryConnector::push`] gets `fallback`.
    pub fn new(fallback: ConnectOutcome) -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            plan: Mutex::new(VecDeque::new()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            servers_tx,
            servers_rx: tokio::sync::Mutex::new(servers_rx),
        }
    }

    pub fn accepting() -> Self {
        Self::new(ConnectOutcome::Accept)
    }

    pub fn refusing() -> Self {
        Self::new(ConnectOutcome::Refuse)
    }

    /// Queue the outcome of the next unplanned attempt.
    pub fn push(&self, outcome: ConnectOutcome) -> &Self {
        self.plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
        self
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Gaps between consecutive attempts.
    pub fn gaps(&self) -> Vec<Duration> {
        let attempts = self.attempts();
        attempts
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }

    /// Server side of the next accepted session.
    pub async fn next_server(&self) -> Option<ServerHandle> {
        self.servers_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ConnectAttempt {
                url: url.to_string(),
                at: Instant::now(),
            });
        let outcome = self
            .plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback);

        match outcome {
            ConnectOutcome::Refuse => Err(TransportError::Endpoint("connection refused".into())),
            ConnectOutcome::RejectAuth => Err(TransportError::Rejected { status: 401 }),
            ConnectOutcome::Accept => {
                let (to_client, inbound) = mpsc::unbounded_channel();
                let (outbound, from_client) = mpsc::unbounded_channel();
                let server = ServerHandle {
                    to_client,
                    from_client,
                    url: url.to_string(),
                };
                let _ = self.servers_tx.send(server);
                Ok(Box::new(MemoryTransport {
                    inbound,
                    outbound,
                    closed: false,
                }))
            }
        }
    }
}

struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
    outbound: mpsc::UnboundedSender<String>,
    closed: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.inbound.close();
    }
}

/// Server end of one accepted in-memory session.
///
/// Dropping the handle ends the stream as an unexpected disconnect.
pub struct ServerHandle {
    to_client: mpsc::UnboundedSender<InboundFrame>,
    from_client: mpsc::UnboundedReceiver<String>,
    url: String,
}

impl ServerHandle {
    /// URL the client connected with.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(InboundFrame::Text(text.into())).is_ok()
    }

    pub fn send_event(&self, event: &RealtimeEvent) -> bool {
        match event.to_frame() {
            Ok(frame) => self.send_text(frame),
            Err(_) => false,
        }
    }

    /// Close with a code, as the server would with a close frame.
    pub fn close(self, code: u16, reason: &str) {
        let _ = self.to_client.send(InboundFrame::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Next frame sent by the client, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Whether the client side has closed or dropped the session.
    pub fn is_client_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}

// ============================================================================
// SCRIPTED FETCHER
// ============================================================================

/// Fetcher answering from a table of per-key responses.
///
/// Keys without a response fail with HTTP 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<QueryKey, Result<Value, u16>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, key: QueryKey, value: Value) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Ok(value));
        self
    }

    pub fn fail(&self, key: QueryKey, status: u16) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Err(status));
        self
    }

    /// Latency applied to every fetch; responses are read after it elapses.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryFetcher for ScriptedFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<Value, ApiClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        match response {
            Some(Ok(value)) => Ok(value),
            Some(Err(status)) => Err(ApiClientError::Status {
                status,
                message: format!("scripted failure for {}", key),
            }),
            None => Err(ApiClientError::Status {
                status: 404,
                message: format!("no scripted response for {}", key),
            }),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Cadence wire and cache types.

    use super::*;
    use cadence_client::config::ReconnectConfig;
    use proptest::prelude::*;

    pub fn arb_event_kind() -> impl Strategy<Value = EventKind> {
        proptest::sample::select(EventKind::all().to_vec())
    }

    pub fn arb_resource() -> impl Strategy<Value = String> {
        proptest::sample::select(vec![
            "notifications",
            "unread-count",
            "messages",
            "dashboard",
            "invoices",
            "documents",
            "tasks",
            "candidates",
        ])
        .prop_map(str::to_string)
    }

    pub fn arb_query_key() -> impl Strategy<Value = QueryKey> {
        (
            arb_resource(),
            proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{1,6}", 0..3),
        )
            .prop_map(|(resource, params)| {
                params
                    .into_iter()
                    .fold(QueryKey::new(resource), |key, (name, value)| {
                        key.with_param(name, value)
                    })
            })
    }

    pub fn arb_realtime_event() -> impl Strategy<Value = RealtimeEvent> {
        (
            arb_event_kind(),
            proptest::option::of(proptest::collection::btree_map(
                "[a-z]{1,8}",
                "[ -~]{0,16}",
                0..4,
            )),
        )
            .prop_map(|(kind, data)| {
                let event = RealtimeEvent::new(kind);
                match data {
                    Some(fields) => event.with_data(
                        fields
                            .into_iter()
                            .map(|(name, value)| (name, Value::String(value)))
                            .collect(),
                    ),
                    None => event,
                }
            })
    }

    pub fn arb_reconnect_config() -> impl Strategy<Value = ReconnectConfig> {
        (1u64..5_000, 1u64..20, 1.0f64..4.0).prop_map(|(initial_ms, factor, multiplier)| {
            ReconnectConfig {
                initial_ms,
                max_ms: initial_ms * factor,
                multiplier,
                jitter_ms: 0,
            }
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made configs and credentials.

    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use cadence_client::token_store::{MemoryTokenStore, TokenStore};
    use chrono::Utc;

    pub const WS_ENDPOINT: &str = "ws://realtime.test/ws";
    pub const API_BASE_URL: &str = "http://api.test";

    /// JWT-shaped token with the given `exp` (epoch seconds). The signature
    /// segment is a placeholder; the client never verifies it.
    pub fn make_jwt(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({ "sub": "user-1", "tenant_id": "tenant-1", "exp": exp })
                .to_string(),
        );
        format!("{}.{}.signature", header, payload)
    }

    /// Token valid for another hour.
    pub fn valid_token() -> String {
        make_jwt(Utc::now().timestamp() + 3600)
    }

    /// Token that expired an hour ago.
    pub fn expired_token() -> String {
        make_jwt(Utc::now().timestamp() - 3600)
    }

    pub fn session(refresh_token: Option<&str>) -> TokenPair {
        TokenPair::new(valid_token(), refresh_token.map(str::to_string))
    }

    pub fn store_with(tokens: TokenPair) -> Arc<dyn TokenStore> {
        Arc::new(MemoryTokenStore::with_tokens(tokens))
    }

    pub fn signed_in_store() -> Arc<dyn TokenStore> {
        store_with(session(Some("refresh-1")))
    }

    pub fn empty_store() -> Arc<dyn TokenStore> {
        Arc::new(MemoryTokenStore::new())
    }

    /// Config pointing at the given API and test WebSocket endpoint.
    pub fn config_for(api_base_url: &str) -> ClientConfig {
        ClientConfig::new(
            api_base_url,
            WS_ENDPOINT,
            std::env::temp_dir().join("cadence-test-tokens.json"),
        )
    }

    pub fn test_config() -> ClientConfig {
        config_for(API_BASE_URL)
    }
}
