//! Prepares the next submission attempt for a discovered work item.
//!
//! Triggered by `request.discovered.v1`. Appends
//! `submission.prepared.v1 { attempt = submit_attempt_count + 1 }` under an
//! optimistic version check, or republishes the already-stored prepared
//! event when a previous invocation got that far.

use std::sync::Arc;

use drover_core::{EventToAppend, MessageContext, RequestId, deterministic_event_id};

use crate::error::Result;
use crate::events::{
    RequestDiscovered, SubmissionPrepared, event_types, find_prepared, payload_value,
};
use crate::handlers::WorkflowDeps;
use crate::metrics;
use crate::publish::IntegrationEvent;

/// Handler name, used as the idempotency partition.
pub const HANDLER_NAME: &str = "prepare-submission";

/// Bus-triggered preparation of the next submission attempt.
pub struct PrepareSubmissionHandler {
    deps: Arc<WorkflowDeps>,
}

impl PrepareSubmissionHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(deps: Arc<WorkflowDeps>) -> Self {
        Self { deps }
    }

    /// Handles one delivery of a `request.discovered.v1` trigger.
    ///
    /// # Errors
    ///
    /// Propagates storage and publish failures so the bus redelivers;
    /// everything else (duplicate delivery, conflicts, exhausted budget)
    /// resolves to a silent skip.
    #[tracing::instrument(skip(self, trigger), fields(event_id = %trigger.id))]
    pub async fn handle(&self, trigger: &IntegrationEvent) -> Result<()> {
        let _timing = metrics::TimingGuard::new(HANDLER_NAME);
        let deps = &self.deps;

        if !deps.try_begin(HANDLER_NAME, &trigger.id).await? {
            metrics::record_handler_outcome(HANDLER_NAME, "skipped");
            return Ok(());
        }

        let payload: RequestDiscovered = match trigger.payload() {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "discarding malformed trigger");
                deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
                metrics::record_handler_outcome(HANDLER_NAME, "invalid");
                return Ok(());
            }
        };
        let request_id = payload.request_id;
        let context = MessageContext::from_trigger(trigger.correlation_id.as_deref(), &trigger.id);

        let (stream, aggregate) = deps.load(&request_id).await?;

        if aggregate.is_terminal() {
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "terminal");
            return Ok(());
        }

        let Some(keys) = aggregate.keys.clone() else {
            tracing::warn!(request_id = %request_id, "aggregate has no intake keys; discarding");
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "invalid");
            return Ok(());
        };

        let attempt = aggregate.submit_attempt_count + 1;
        if attempt > deps.config.max_submit_attempts {
            tracing::debug!(request_id = %request_id, attempt, "submission budget exhausted");
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "exhausted");
            return Ok(());
        }

        if aggregate.has_prepared(attempt) {
            // Crash recovery: the prepared event is already durable, so
            // refresh the projection and republish under the stored id.
            if let Some(stored) = find_prepared(&stream, attempt)? {
                deps.refresh_projection(&request_id).await?;
                deps.publish_stored(&request_id, stored).await?;
            }
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "republished");
            return Ok(());
        }

        let event = build_prepared_event(&deps.clock.now(), &request_id, &keys, attempt, &context)?;

        match deps
            .event_store
            .append(
                &request_id.to_string(),
                std::slice::from_ref(&event),
                Some(aggregate.version),
            )
            .await
        {
            Ok(version) => {
                metrics::record_append(event_types::SUBMISSION_PREPARED);
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

fn build_prepared_event(
    now: &chrono::DateTime<chrono::Utc>,
    request_id: &RequestId,
    keys: &crate::intake::IntakeKeys,
    attempt: u32,
    context: &MessageContext,
) -> Result<EventToAppend> {
    let stream_id = request_id.to_string();
    let event_id = deterministic_event_id(
        &stream_id,
        event_types::SUBMISSION_PREPARED,
        context.correlation_id.as_deref(),
        context.causation_id.as_deref(),
        Some(&format!("attempt:{attempt}")),
    )?;
    let payload = SubmissionPrepared {
        request_id: request_id.clone(),
        partition_key: keys.partition_key.clone(),
        row_key: keys.row_key.clone(),
        attempt,
    };
    Ok(EventToAppend::new(
        event_id,
        event_types::SUBMISSION_PREPARED,
        *now,
        payload_value(&payload)?,
    )
    .with_context(context))
}
