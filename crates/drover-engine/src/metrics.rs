//! Observability metrics for the workflow engine.
//!
//! Exported via the `metrics` crate facade so deployments can plug in any
//! Prometheus-compatible recorder.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `drover_handler_outcomes_total` | Counter | `handler`, `outcome` | Handler invocation outcomes |
//! | `drover_handler_duration_seconds` | Histogram | `handler` | Handler invocation duration |
//! | `drover_events_appended_total` | Counter | `event_type` | Events appended to streams |
//! | `drover_events_published_total` | Counter | `event_type` | Integration events published |
//! | `drover_idempotency_checks_total` | Counter | `handler`, `result` | Lease check outcomes |
//! | `drover_intake_claims_total` | Counter | `result` | Intake claim attempts |
//! | `drover_polls_scheduled_total` | Counter | `result` | Poll scheduler emissions |

use std::time::Instant;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: handler invocation outcomes.
    pub const HANDLER_OUTCOMES_TOTAL: &str = "drover_handler_outcomes_total";
    /// Histogram: handler invocation duration in seconds.
    pub const HANDLER_DURATION_SECONDS: &str = "drover_handler_duration_seconds";
    /// Counter: events appended to streams.
    pub const EVENTS_APPENDED_TOTAL: &str = "drover_events_appended_total";
    /// Counter: integration events published.
    pub const EVENTS_PUBLISHED_TOTAL: &str = "drover_events_published_total";
    /// Counter: idempotency lease check outcomes.
    pub const IDEMPOTENCY_CHECKS_TOTAL: &str = "drover_idempotency_checks_total";
    /// Counter: intake claim attempts.
    pub const INTAKE_CLAIMS_TOTAL: &str = "drover_intake_claims_total";
    /// Counter: poll scheduler emissions.
    pub const POLLS_SCHEDULED_TOTAL: &str = "drover_polls_scheduled_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Handler name.
    pub const HANDLER: &str = "handler";
    /// Invocation outcome (handled, skipped, conflict, error).
    pub const OUTCOME: &str = "outcome";
    /// Workflow event type.
    pub const EVENT_TYPE: &str = "event_type";
    /// Result status (success, skipped, conflict, ...).
    pub const RESULT: &str = "result";
}

/// Records a handler invocation outcome.
pub fn record_handler_outcome(handler: &'static str, outcome: &'static str) {
    counter!(
        names::HANDLER_OUTCOMES_TOTAL,
        labels::HANDLER => handler,
        labels::OUTCOME => outcome,
    )
    .increment(1);
}

/// Records an appended event by type.
pub fn record_append(event_type: &str) {
    counter!(
        names::EVENTS_APPENDED_TOTAL,
        labels::EVENT_TYPE => event_type.to_string(),
    )
    .increment(1);
}

/// Records a published integration event by type.
pub fn record_publish(event_type: &str) {
    counter!(
        names::EVENTS_PUBLISHED_TOTAL,
        labels::EVENT_TYPE => event_type.to_string(),
    )
    .increment(1);
}

/// Records an idempotency lease check outcome.
pub fn record_idempotency_check(handler: &'static str, result: &'static str) {
    counter!(
        names::IDEMPOTENCY_CHECKS_TOTAL,
        labels::HANDLER => handler,
        labels::RESULT => result,
    )
    .increment(1);
}

/// Records an intake claim attempt.
pub fn record_intake_claim(result: &'static str) {
    counter!(
        names::INTAKE_CLAIMS_TOTAL,
        labels::RESULT => result,
    )
    .increment(1);
}

/// Records a poll scheduler emission.
pub fn record_poll_scheduled(result: &'static str) {
    counter!(
        names::POLLS_SCHEDULED_TOTAL,
        labels::RESULT => result,
    )
    .increment(1);
}

/// Guard that records a handler duration histogram on drop.
pub struct TimingGuard {
    handler: &'static str,
    started: Instant,
}

impl TimingGuard {
    /// Starts timing a handler invocation.
    #[must_use]
    pub fn new(handler: &'static str) -> Self {
        Self {
            handler,
            started: Instant::now(),
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        histogram!(
            names::HANDLER_DURATION_SECONDS,
            labels::HANDLER => self.handler,
        )
        .record(self.started.elapsed().as_secs_f64());
    }
}
