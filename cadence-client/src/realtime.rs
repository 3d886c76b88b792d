//! Realtime connection manager with reconnect backoff.
//!
//! Owns at most one live event-stream connection, authenticates it with the
//! current session token, decodes frames into [`RealtimeEvent`]s for the
//! [`EventBus`] and recovers from drops with exponential backoff. Transport
//! errors never reach the caller; they only drive the reconnect schedule.

use crate::auth::TokenReader;
use crate::backoff::Backoff;
use crate::config::{ClientConfig, ReconnectConfig, MAX_INTERVAL_MS};
use crate::event_bus::{EventBus, HandlerId};
use crate::transport::{stream_url, Connector, InboundFrame, Transport};
use cadence_core::{EventDecodeError, RealtimeEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Outbound keep-alive frame. Plain text, not JSON.
pub const HEARTBEAT_FRAME: &str = "ping";

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub endpoint: String,
    pub reconnect: ReconnectConfig,
    pub heartbeat_interval: Duration,
    pub auth_close_code: u16,
}

impl From<&ClientConfig> for RealtimeConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            endpoint: config.ws_endpoint.clone(),
            reconnect: config.reconnect.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            auth_close_code: config.auth_close_code,
        }
    }
}

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// `connect()` has not started a session yet.
    Idle,
    Connecting { attempt: u64 },
    Connected,
    /// Waiting `delay` before the next attempt after `failures` consecutive
    /// failures.
    Backoff { failures: u32, delay: Duration },
    /// The server rejected the credential; `connect()` must be called again
    /// after re-authenticating.
    AuthRejected,
    /// No usable session token was available for a reconnect.
    Unauthenticated,
    /// Torn down by `close()`.
    Closed,
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    tokens: TokenReader,
    config: RealtimeConfig,
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn dispatch(&self, frame: &str) {
        match RealtimeEvent::decode(frame) {
            Ok(event) => {
                trace!(kind = %event.kind, "Realtime event received");
                self.bus.publish(&event);
            }
            Err(EventDecodeError::NotJson) => {
                trace!(frame, "Ignoring non-JSON frame");
            }
            Err(err) => {
                debug!(error = %err, "Discarding undecodable event frame");
            }
        }
    }
}

struct RunningTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

enum SessionEnd {
    Shutdown,
    AuthRejected,
    Dropped,
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    task: Mutex<Option<RunningTask>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, tokens: TokenReader, config: RealtimeConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(Shared {
                connector,
                tokens,
                config,
                bus: EventBus::new(),
                state,
                attempts: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the connection task.
    ///
    /// No-op without a usable session token, or while a previous session is
    /// still running. Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        if self.shared.tokens.usable_access_token().is_none() {
            debug!("No usable session token, not connecting");
            return;
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() {
                debug!("Connection task already running");
                return;
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_connection(self.shared.clone(), shutdown_rx));
        *task = Some(RunningTask { shutdown, handle });
    }

    /// Tear down intentionally.
    ///
    /// Closes the transport, cancels any pending reconnect and waits for the
    /// connection task to finish, so no attempt can fire afterwards.
    pub async fn close(&self) {
        let running = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(err) = running.handle.await {
                if err.is_panic() {
                    error!("Connection task panicked");
                }
            }
        }
        self.shared.set_state(ConnectionState::Closed);
        info!("Realtime connection closed");
    }

    pub fn on_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(handler)
    }

    pub fn off_event(&self, id: HandlerId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Total connection attempts since construction.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let running = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            running.handle.abort();
        }
    }
}

async fn run_connection(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(&shared.config.reconnect);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(token) = shared.tokens.usable_access_token() else {
            info!("Session token missing or expired, waiting for re-authentication");
            shared.set_state(ConnectionState::Unauthenticated);
            return;
        };
        let url = match stream_url(&shared.config.endpoint, &token) {
            Ok(url) => url,
            Err(err) => {
                error!(error = %err, "Cannot build stream URL");
                shared.set_state(ConnectionState::Closed);
                return;
            }
        };

        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        shared.set_state(ConnectionState::Connecting { attempt });
        debug!(attempt, "Opening event stream");

        let opened = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            opened = shared.connector.connect(&url) => opened,
        };

        let end = match opened {
            Ok(transport) => {
                backoff.reset();
                shared.set_state(ConnectionState::Connected);
                info!(attempt, "Event stream connected");
                drive(&shared, transport, &mut shutdown).await
            }
            Err(err) if err.is_auth_rejection() => {
                warn!(error = %err, "Event stream handshake rejected");
                SessionEnd::AuthRejected
            }
            Err(err) => {
                warn!(error = %err, attempt, "Event stream connect failed");
                SessionEnd::Dropped
            }
        };

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::AuthRejected => {
                shared.set_state(ConnectionState::AuthRejected);
                return;
            }
            SessionEnd::Dropped => {}
        }

        let delay = backoff.next_delay();
        let failures = backoff.failures();
        shared.set_state(ConnectionState::Backoff { failures, delay });
        debug!(
            failures,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(ConnectionState::Closed);
}

async fn drive(
    shared: &Shared,
    mut transport: Box<dyn Transport>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let period = shared
        .config
        .heartbeat_interval
        .clamp(Duration::from_millis(1), Duration::from_millis(MAX_INTERVAL_MS));
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                transport.close().await;
                return SessionEnd::Shutdown;
            }
            frame = transport.next_frame() => match frame {
                Some(Ok(InboundFrame::Text(text))) => shared.dispatch(&text),
                Some(Ok(InboundFrame::Closed { code, reason })) => {
                    if code == Some(shared.config.auth_close_code) {
                        warn!(code, %reason, "Event stream closed: credential rejected");
                        return SessionEnd::AuthRejected;
                    }
                    info!(?code, %reason, "Event stream closed by server");
                    return SessionEnd::Dropped;
                }
                Some(Err(err)) => {
                    warn!(error = %err, "Event stream error");
                    return SessionEnd::Dropped;
                }
                None => {
                    info!("Event stream ended");
                    return SessionEnd::Dropped;
                }
            },
            _ = heartbeat.tick() => {
                if let Err(err) = transport.send_text(HEARTBEAT_FRAME.to_string()).await {
                    warn!(error = %err, "Heartbeat failed");
                    return SessionEnd::Dropped;
                }
            }
        }
    }
}
