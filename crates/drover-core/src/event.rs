//! The append-only stored-event model.
//!
//! Events carry an opaque JSON payload so that the event store stays
//! decoupled from the workflow's closed event catalog. Consumers that need
//! to introspect stored events filter by `event_type` first and deserialize
//! on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::MessageContext;

/// An event as persisted in a stream.
///
/// Immutable once appended. `version` is assigned by the event store and is
/// 1-based, contiguous, and monotonic per stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Deterministic event identifier.
    pub event_id: String,

    /// Event type from the workflow catalog (e.g. `request.discovered.v1`).
    pub event_type: String,

    /// When the event occurred.
    pub occurred_utc: DateTime<Utc>,

    /// Opaque JSON payload.
    pub data: Value,

    /// Correlation identifier tying all events of one workflow together.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Identifier of the event that caused this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// 1-based position within the stream.
    pub version: u64,
}

/// An event ready for append; the store assigns its `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventToAppend {
    /// Deterministic event identifier.
    pub event_id: String,

    /// Event type from the workflow catalog.
    pub event_type: String,

    /// When the event occurred.
    pub occurred_utc: DateTime<Utc>,

    /// Opaque JSON payload.
    pub data: Value,

    /// Correlation identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Causation identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

impl EventToAppend {
    /// Creates a new event with no correlation metadata.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        occurred_utc: DateTime<Utc>,
        data: Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            occurred_utc,
            data,
            correlation_id: None,
            causation_id: None,
        }
    }

    /// Attaches correlation metadata from a message context.
    #[must_use]
    pub fn with_context(mut self, context: &MessageContext) -> Self {
        self.correlation_id = context.correlation_id.clone();
        self.causation_id = context.causation_id.clone();
        self
    }

    /// Promotes this event to its stored form at the given stream version.
    #[must_use]
    pub fn into_stored(self, version: u64) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            event_type: self.event_type,
            occurred_utc: self.occurred_utc,
            data: self.data,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn into_stored_preserves_fields() {
        let now = Utc::now();
        let context = MessageContext::root("pA|rK");
        let event = EventToAppend::new("evt-1", "request.discovered.v1", now, json!({"a": 1}))
            .with_context(&context);

        let stored = event.into_stored(4);
        assert_eq!(stored.event_id, "evt-1");
        assert_eq!(stored.event_type, "request.discovered.v1");
        assert_eq!(stored.version, 4);
        assert_eq!(stored.correlation_id.as_deref(), Some("pA|rK"));
        assert_eq!(stored.causation_id, None);
        assert_eq!(stored.data, json!({"a": 1}));
    }

    #[test]
    fn optional_metadata_is_omitted_from_json() {
        let event = EventToAppend::new("evt-1", "t", Utc::now(), Value::Null);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("correlationId"));
        assert!(!json.contains("causationId"));
    }
}
