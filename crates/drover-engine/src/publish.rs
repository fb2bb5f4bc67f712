//! Integration event envelope and publisher contract.
//!
//! Published events follow the `CloudEvents`-inspired envelope: a
//! deterministic `id`, a versioned `type`, a stable `source` URI, a
//! `/requests/{request_id}` subject, and `correlation_id`/`causation_id`
//! extensions. Delivery is at-least-once; subscribers deduplicate on the
//! deterministic id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use drover_core::{RequestId, StoredEvent};

use crate::error::Result;

/// Content type of every integration event payload.
pub const DATA_CONTENT_TYPE: &str = "application/json";

/// `CloudEvents`-style envelope for a published workflow event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEvent {
    /// Deterministic event identifier (same as the stored event's id).
    pub id: String,

    /// Event type from the workflow catalog.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Stable origin URI.
    pub source: String,

    /// Subject in the form `/requests/{request_id}`.
    pub subject: String,

    /// When the underlying event occurred.
    pub time: DateTime<Utc>,

    /// Content type of `data`.
    pub datacontenttype: String,

    /// Correlation identifier extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Causation identifier extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// Event payload.
    pub data: Value,
}

impl IntegrationEvent {
    /// Builds the envelope for a stored event.
    ///
    /// The stored event already carries the deterministic id and the
    /// correlation metadata of the invocation that appended it, so a
    /// republish after crash recovery is byte-identical to the first
    /// publish.
    #[must_use]
    pub fn from_stored(source: &str, request_id: &RequestId, stored: &StoredEvent) -> Self {
        Self {
            id: stored.event_id.clone(),
            event_type: stored.event_type.clone(),
            source: source.to_string(),
            subject: Self::subject_for(request_id),
            time: stored.occurred_utc,
            datacontenttype: DATA_CONTENT_TYPE.to_string(),
            correlation_id: stored.correlation_id.clone(),
            causation_id: stored.causation_id.clone(),
            data: stored.data.clone(),
        }
    }

    /// Formats the subject for a work item.
    #[must_use]
    pub fn subject_for(request_id: &RequestId) -> String {
        format!("/requests/{request_id}")
    }

    /// Deserializes the payload into a catalog record.
    ///
    /// # Errors
    ///
    /// Returns a core validation error when the payload does not match the
    /// expected shape; handlers log this as a warning and discard the
    /// trigger.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            drover_core::Error::Validation(format!(
                "malformed '{}' payload on event '{}': {e}",
                self.event_type, self.id
            ))
            .into()
        })
    }
}

/// Contract over the message bus publisher.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an integration event (at-least-once).
    async fn publish(&self, event: &IntegrationEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use drover_core::{EventToAppend, MessageContext};
    use serde_json::json;

    #[test]
    fn envelope_mirrors_the_stored_event() {
        let request_id = RequestId::new("pA", "rK").unwrap();
        let occurred = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap();
        let context = MessageContext::from_trigger(Some("pA|rK"), "cause-1");
        let stored = EventToAppend::new(
            "evt-1",
            "job.submitted.v1",
            occurred,
            json!({"attempt": 1}),
        )
        .with_context(&context)
        .into_stored(3);

        let event = IntegrationEvent::from_stored("/drover/engine", &request_id, &stored);
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.subject, "/requests/pA|rK");
        assert_eq!(event.datacontenttype, DATA_CONTENT_TYPE);
        assert_eq!(event.correlation_id.as_deref(), Some("pA|rK"));
        assert_eq!(event.causation_id.as_deref(), Some("cause-1"));
        assert_eq!(event.time, occurred);
    }

    #[test]
    fn wire_format_uses_the_type_attribute() {
        let request_id = RequestId::new("pA", "rK").unwrap();
        let stored = EventToAppend::new("evt-1", "request.completed.v1", Utc::now(), json!({}))
            .into_stored(1);
        let json = serde_json::to_string(&IntegrationEvent::from_stored(
            "/drover/engine",
            &request_id,
            &stored,
        ))
        .unwrap();

        assert!(json.contains("\"type\":\"request.completed.v1\""));
        assert!(!json.contains("event_type"));
    }

    #[test]
    fn payload_mismatch_is_a_validation_error() {
        let request_id = RequestId::new("pA", "rK").unwrap();
        let stored = EventToAppend::new("evt-1", "job.terminal.v1", Utc::now(), json!({"x": 1}))
            .into_stored(1);
        let event = IntegrationEvent::from_stored("/drover/engine", &request_id, &stored);

        let result: Result<crate::events::JobTerminal> = event.payload();
        assert!(result.is_err());
    }
}
