//! Submits a prepared attempt to the external service.
//!
//! Triggered by `submission.prepared.v1`. The external call happens
//! *before* the append: the service is idempotent on
//! `(request_id, attempt)`, so if the append fails or the process crashes,
//! the redelivered trigger re-calls the same endpoint and receives the same
//! job id.

use std::sync::Arc;

use drover_core::{EventToAppend, MessageContext, deterministic_event_id};

use crate::error::Result;
use crate::events::{JobSubmitted, SubmissionPrepared, event_types, find_submitted, payload_value};
use crate::handlers::WorkflowDeps;
use crate::metrics;
use crate::publish::IntegrationEvent;

/// Handler name, used as the idempotency partition.
pub const HANDLER_NAME: &str = "submit-job";

/// Bus-triggered submission of a prepared attempt.
pub struct SubmitJobHandler {
    deps: Arc<WorkflowDeps>,
}

impl SubmitJobHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(deps: Arc<WorkflowDeps>) -> Self {
        Self { deps }
    }

    /// Handles one delivery of a `submission.prepared.v1` trigger.
    ///
    /// # Errors
    ///
    /// Propagates storage, external-service, and publish failures so the
    /// bus redelivers with the stream unchanged.
    #[tracing::instrument(skip(self, trigger), fields(event_id = %trigger.id))]
    pub async fn handle(&self, trigger: &IntegrationEvent) -> Result<()> {
        let _timing = metrics::TimingGuard::new(HANDLER_NAME);
        let deps = &self.deps;

        if !deps.try_begin(HANDLER_NAME, &trigger.id).await? {
            metrics::record_handler_outcome(HANDLER_NAME, "skipped");
            return Ok(());
        }

        let payload: SubmissionPrepared = match trigger.payload() {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "discarding malformed trigger");
                deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
                metrics::record_handler_outcome(HANDLER_NAME, "invalid");
                return Ok(());
            }
        };
        let request_id = payload.request_id.clone();
        let attempt = payload.attempt;
        let context = MessageContext::from_trigger(trigger.correlation_id.as_deref(), &trigger.id);

        let (stream, aggregate) = deps.load(&request_id).await?;

        if aggregate.is_terminal() {
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "terminal");
            return Ok(());
        }

        if attempt < 1 || attempt > deps.config.max_submit_attempts {
            tracing::warn!(
                request_id = %request_id,
                attempt,
                max = deps.config.max_submit_attempts,
                "discarding trigger with out-of-range attempt"
            );
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "invalid");
            return Ok(());
        }

        if aggregate.has_submitted(attempt) {
            // Crash recovery: the job was already submitted and recorded;
            // republish the stored event under its deterministic id.
            if let Some(stored) = find_submitted(&stream, attempt)? {
                deps.refresh_projection(&request_id).await?;
                deps.publish_stored(&request_id, stored).await?;
            }
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "republished");
            return Ok(());
        }

        let submission = deps.external.create_job(&request_id, attempt).await?;
        tracing::debug!(
            request_id = %request_id,
            attempt,
            job_id = %submission.job_id,
            status = %submission.status,
            "external job created"
        );

        let stream_id = request_id.to_string();
        let event_id = deterministic_event_id(
            &stream_id,
            event_types::JOB_SUBMITTED,
            context.correlation_id.as_deref(),
            context.causation_id.as_deref(),
            Some(&format!("attempt:{attempt}")),
        )?;
        let event_payload = JobSubmitted {
            request_id: request_id.clone(),
            partition_key: payload.partition_key,
            row_key: payload.row_key,
            external_job_id: submission.job_id,
            attempt,
        };
        let event = EventToAppend::new(
            event_id,
            event_types::JOB_SUBMITTED,
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
                metrics::record_append(event_types::JOB_SUBMITTED);
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
