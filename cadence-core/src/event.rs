//! Realtime event types pushed by the backend over the event stream.
//!
//! Wire shape is a JSON object `{ "type": string, "data"?: object }`.
//! Anything else (heartbeat acknowledgements, unknown types, non-object
//! payloads) fails to decode and is expected to be discarded by the reader.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventDecodeError;

/// Opaque key-value payload attached to an event.
pub type EventData = Map<String, Value>;

// ============================================================================
// EVENT KINDS
// ============================================================================

/// Discriminator of a realtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Notification,
    Message,
    DocumentProcessed,
    WorkflowUpdate,
    InvoicePaid,
    InvoiceCreated,
    TaskAssigned,
    ClientUpdated,
    CandidateApplied,
    CandidateStageChanged,
    InterviewScheduled,
    OfferUpdated,
}

impl EventKind {
    /// Wire tag of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Notification => "notification",
            EventKind::Message => "message",
            EventKind::DocumentProcessed => "document_processed",
            EventKind::WorkflowUpdate => "workflow_update",
            EventKind::InvoicePaid => "invoice_paid",
            EventKind::InvoiceCreated => "invoice_created",
            EventKind::TaskAssigned => "task_assigned",
            EventKind::ClientUpdated => "client_updated",
            EventKind::CandidateApplied => "candidate_applied",
            EventKind::CandidateStageChanged => "candidate_stage_changed",
            EventKind::InterviewScheduled => "interview_scheduled",
            EventKind::OfferUpdated => "offer_updated",
        }
    }

    pub fn all() -> &'static [EventKind] {
        &[
            EventKind::Notification,
            EventKind::Message,
            EventKind::DocumentProcessed,
            EventKind::WorkflowUpdate,
            EventKind::InvoicePaid,
            EventKind::InvoiceCreated,
            EventKind::TaskAssigned,
            EventKind::ClientUpdated,
            EventKind::CandidateApplied,
            EventKind::CandidateStageChanged,
            EventKind::InterviewScheduled,
            EventKind::OfferUpdated,
        ]
    }

    /// Look up a kind by its wire tag.
    pub fn from_tag(tag: &str) -> Option<EventKind> {
        Self::all().iter().copied().find(|kind| kind.as_str() == tag)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EVENT ENVELOPE
// ============================================================================

/// A decoded realtime event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
}

impl RealtimeEvent {
    pub fn new(kind: EventKind) -> Self {
        Self { kind, data: None }
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = Some(data);
        self
    }

    /// Decode one text frame.
    pub fn decode(frame: &str) -> Result<Self, EventDecodeError> {
        let value: Value = serde_json::from_str(frame).map_err(|_| EventDecodeError::NotJson)?;
        let Value::Object(mut object) = value else {
            return Err(EventDecodeError::Malformed(
                "frame is not a JSON object".to_string(),
            ));
        };

        let tag = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EventDecodeError::MissingType)?;
        let kind = EventKind::from_tag(tag)
            .ok_or_else(|| EventDecodeError::UnknownType(tag.to_string()))?;

        let data = match object.remove("data") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(EventDecodeError::Malformed(
                    "`data` must be an object".to_string(),
                ))
            }
        };

        Ok(Self { kind, data })
    }

    /// Encode as a wire frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// String field of the payload, if present.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_event_with_data() {
        let event =
            RealtimeEvent::decode(r#"{"type":"notification","data":{"title":"New"}}"#).unwrap();
        assert_eq!(event.kind, EventKind::Notification);
        assert_eq!(event.data_str("title"), Some("New"));
    }

    #[test]
    fn decodes_event_without_data() {
        let event = RealtimeEvent::decode(r#"{"type":"invoice_paid"}"#).unwrap();
        assert_eq!(event, RealtimeEvent::new(EventKind::InvoicePaid));
        let event = RealtimeEvent::decode(r#"{"type":"invoice_paid","data":null}"#).unwrap();
        assert!(event.data.is_none());
    }

    #[test]
    fn heartbeat_ack_is_not_json() {
        assert_eq!(RealtimeEvent::decode("pong"), Err(EventDecodeError::NotJson));
    }

    #[test]
    fn rejects_unknown_and_malformed_frames() {
        assert_eq!(
            RealtimeEvent::decode(r#"{"type":"mystery"}"#),
            Err(EventDecodeError::UnknownType("mystery".to_string()))
        );
        assert_eq!(
            RealtimeEvent::decode(r#"{"data":{}}"#),
            Err(EventDecodeError::MissingType)
        );
        assert!(matches!(
            RealtimeEvent::decode(r#"{"type":"message","data":[1,2]}"#),
            Err(EventDecodeError::Malformed(_))
        ));
        assert!(matches!(
            RealtimeEvent::decode("[1,2,3]"),
            Err(EventDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn every_kind_round_trips_through_its_tag() {
        for kind in EventKind::all() {
            assert_eq!(EventKind::from_tag(kind.as_str()), Some(*kind));
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, json!(kind.as_str()));
        }
    }
}
