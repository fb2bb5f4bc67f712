//! Finalizes a work item after its terminal event.
//!
//! Triggered by `job.terminal.v1`. Writes the terminal status back to the
//! intake row (an unconditional, idempotent overwrite) and closes the
//! stream with `request.completed.v1`. A terminal `FailCanRetry` payload
//! should never reach this handler — the poll handler coerces exhausted
//! retries to `Fail` — so one that does is mapped to `Fail` and flagged as
//! a producer bug.

use std::sync::Arc;

use drover_core::{EventToAppend, MessageContext, deterministic_event_id};

use crate::error::Result;
use crate::events::{
    FinalStatus, JobTerminal, RequestCompleted, TerminalStatus, event_types, find_completed,
    payload_value,
};
use crate::handlers::WorkflowDeps;
use crate::intake::IntakeKeys;
use crate::metrics;
use crate::publish::IntegrationEvent;

/// Handler name, used as the idempotency partition.
pub const HANDLER_NAME: &str = "complete-request";

/// Bus-triggered finalization of a work item.
pub struct CompleteRequestHandler {
    deps: Arc<WorkflowDeps>,
}

impl CompleteRequestHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(deps: Arc<WorkflowDeps>) -> Self {
        Self { deps }
    }

    /// Handles one delivery of a `job.terminal.v1` trigger.
    ///
    /// # Errors
    ///
    /// Propagates storage and publish failures so the bus redelivers; the
    /// intake write and the completion append are both idempotent across
    /// redeliveries.
    #[tracing::instrument(skip(self, trigger), fields(event_id = %trigger.id))]
    pub async fn handle(&self, trigger: &IntegrationEvent) -> Result<()> {
        let _timing = metrics::TimingGuard::new(HANDLER_NAME);
        let deps = &self.deps;

        if !deps.try_begin(HANDLER_NAME, &trigger.id).await? {
            metrics::record_handler_outcome(HANDLER_NAME, "skipped");
            return Ok(());
        }

        let payload: JobTerminal = match trigger.payload() {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "discarding malformed trigger");
                deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
                metrics::record_handler_outcome(HANDLER_NAME, "invalid");
                return Ok(());
            }
        };
        let request_id = payload.request_id.clone();
        let context = MessageContext::from_trigger(trigger.correlation_id.as_deref(), &trigger.id);

        let final_status = match payload.terminal_status {
            TerminalStatus::Pass => FinalStatus::Pass,
            TerminalStatus::Fail => FinalStatus::Fail,
            TerminalStatus::FailCanRetry => {
                tracing::warn!(
                    request_id = %request_id,
                    "terminal FailCanRetry indicates a producer bug; mapping to Fail"
                );
                FinalStatus::Fail
            }
        };

        let (stream, aggregate) = deps.load(&request_id).await?;

        let keys = aggregate
            .keys
            .clone()
            .unwrap_or_else(|| IntakeKeys::from(&request_id));

        if let Some(stored) = find_completed(&stream) {
            // The stream is already closed; redo the idempotent intake
            // write with the stored outcome and republish.
            let completed: RequestCompleted = serde_json::from_value(stored.data.clone())
                .map_err(|e| {
                    drover_core::Error::internal(format!(
                        "stored completion '{}' has an undecodable payload: {e}",
                        stored.event_id
                    ))
                })?;
            deps.intake
                .mark_terminal(&keys, completed.final_status)
                .await?;
            deps.refresh_projection(&request_id).await?;
            deps.publish_stored(&request_id, stored).await?;
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "republished");
            return Ok(());
        }

        deps.intake.mark_terminal(&keys, final_status).await?;

        let stream_id = request_id.to_string();
        let event_id = deterministic_event_id(
            &stream_id,
            event_types::REQUEST_COMPLETED,
            context.correlation_id.as_deref(),
            context.causation_id.as_deref(),
            Some(&format!("final:{final_status}")),
        )?;
        let event_payload = RequestCompleted {
            request_id: request_id.clone(),
            final_status,
        };
        let event = EventToAppend::new(
            event_id,
            event_types::REQUEST_COMPLETED,
            deps.clock.now(),
            payload_value(&event_payload)?,
        )
        .with_context(&context);

        match deps
            .event_store
            .append(
                &stream_id,
                std::slice::from_ref(&event),
                Some(aggregate.version),
            )
            .await
        {
            Ok(version) => {
                metrics::record_append(event_types::REQUEST_COMPLETED);
                deps.refresh_projection(&request_id).await?;
                deps.publish_stored(&request_id, &event.into_stored(version))
                    .await?;
                metrics::record_handler_outcome(HANDLER_NAME, "handled");
            }
            Err(error) if error.is_concurrency() => {
                tracing::debug!(request_id = %request_id, "another worker advanced the stream");
                metrics::record_handler_outcome(HANDLER_NAME, "conflict");
            }
            Err(error) => return Err(error.into()),
        }

        deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
        Ok(())
    }
}
