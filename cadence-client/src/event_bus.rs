//! Typed fan-out of decoded realtime events to registered handlers.

use cadence_core::RealtimeEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

/// Callback invoked once per decoded event, in transport order.
///
/// Handlers run on the connection task and must not block. A handler that
/// panics is logged and skipped; the remaining handlers still run.
pub type EventHandler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<(HandlerId, EventHandler)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns whether a handler was removed.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Deliver to every handler registered at the time of the call.
    ///
    /// Returns how many handlers panicked.
    pub fn publish(&self, event: &RealtimeEvent) -> usize {
        let snapshot: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        let mut panicked = 0;
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                panicked += 1;
                error!(event_type = %event.kind, "Event handler panicked");
            }
        }
        panicked
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
