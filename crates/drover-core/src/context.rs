//! Per-invocation correlation metadata.
//!
//! Every handler invocation carries a [`MessageContext`] established on
//! entry from the triggering event and passed explicitly through adapter
//! calls. Publishers attach the pair as event metadata. Because the context
//! is a plain value owned by the invocation, it cannot leak between
//! concurrent invocations.

/// Correlation and causation identifiers for one handler invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    /// Stable identifier tying all events of one workflow instance together.
    pub correlation_id: Option<String>,

    /// Identifier of the event that caused the current invocation.
    pub causation_id: Option<String>,
}

impl MessageContext {
    /// Creates the context for a workflow-originating action: correlation
    /// set, no causation (nothing caused it but the timer).
    #[must_use]
    pub fn root(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            causation_id: None,
        }
    }

    /// Creates the context for a bus-triggered invocation.
    ///
    /// Correlation is inherited from the triggering event (when present);
    /// causation is the triggering event's id.
    #[must_use]
    pub fn from_trigger(
        correlation_id: Option<&str>,
        triggering_event_id: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.map(ToString::to_string),
            causation_id: Some(triggering_event_id.into()),
        }
    }
}
