//! Toast notifications raised by realtime events and failed mutations.

use crate::api_client::ApiClientError;
use cadence_core::{EventKind, RealtimeEvent, Timestamp};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const DEFAULT_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Retry,
    Reconnect,
    SignIn,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub level: NotificationLevel,
    pub message: String,
    pub action: Option<NotificationAction>,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            level,
            message: message.into(),
            action: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Toast for a user-facing realtime event.
    ///
    /// Uses the payload's `title`, then `message`, then a generic line.
    /// Events that only refresh data produce nothing.
    pub fn from_event(event: &RealtimeEvent) -> Option<Self> {
        let fallback = match event.kind {
            EventKind::Notification => "New notification",
            EventKind::Message => "New message",
            EventKind::DocumentProcessed => "Document processed",
            EventKind::InvoicePaid => "Invoice paid",
            EventKind::CandidateApplied => "New candidate application",
            _ => return None,
        };
        let message = event
            .data_str("title")
            .or_else(|| event.data_str("message"))
            .unwrap_or(fallback);
        Some(Self::new(NotificationLevel::Info, message))
    }

    /// Error toast for a failed mutation.
    ///
    /// Authentication failures yield `None`; the sign-in flow reports those.
    pub fn for_mutation_error(err: &ApiClientError) -> Option<Self> {
        if err.is_auth_failure() {
            return None;
        }
        let notification = match err {
            ApiClientError::Timeout => {
                Self::new(NotificationLevel::Error, "Request timed out")
                    .with_action(NotificationAction::Retry)
            }
            ApiClientError::Status { message, .. } => {
                Self::new(NotificationLevel::Error, message.clone())
            }
            ApiClientError::Http(_) => Self::new(NotificationLevel::Error, err.to_string())
                .with_action(NotificationAction::Retry),
            other => Self::new(NotificationLevel::Error, other.to_string()),
        };
        Some(notification)
    }
}

/// Fan-out of toasts with a bounded history of recent ones.
pub struct NotificationCenter {
    sender: broadcast::Sender<Notification>,
    history: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl NotificationCenter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity.max(DEFAULT_HISTORY));
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, notification: Notification) {
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }
        // No subscribers is fine; history still records it.
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Recent toasts, oldest first.
    pub fn recent(&self) -> Vec<Notification> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Remove one toast from the history; returns whether it was present.
    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let before = history.len();
        history.retain(|notification| notification.id != id);
        history.len() != before
    }

    pub fn clear(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}
