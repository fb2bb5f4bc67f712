//! Polls the external service and decides the fate of an attempt.
//!
//! Triggered by `job.pollrequested.v1`. Pending remote statuses produce no
//! event (the scheduler already advanced the projection's poll guard).
//! `Pass`/`Fail` record a terminal event; `FailCanRetry` opens the next
//! attempt with a fresh `submission.prepared.v1` while budget remains, and
//! is coerced to a terminal `Fail` once the budget is spent. Unrecognized
//! remote statuses are coerced to `Fail` as well.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use drover_core::{EventToAppend, MessageContext, RequestId, deterministic_event_id};

use crate::aggregate::RequestAggregate;
use crate::error::Result;
use crate::events::{
    JobPollRequested, JobTerminal, SubmissionPrepared, TerminalStatus, event_types, find_prepared,
    find_terminal, payload_value,
};
use crate::external::ExternalJobStatus;
use crate::handlers::WorkflowDeps;
use crate::metrics;
use crate::publish::IntegrationEvent;

/// Handler name, used as the idempotency partition.
pub const HANDLER_NAME: &str = "poll-external-job";

/// Bus-triggered poll of an external job.
pub struct PollExternalJobHandler {
    deps: Arc<WorkflowDeps>,
}

impl PollExternalJobHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(deps: Arc<WorkflowDeps>) -> Self {
        Self { deps }
    }

    /// Handles one delivery of a `job.pollrequested.v1` trigger.
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

        let payload: JobPollRequested = match trigger.payload() {
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

        let (stream, aggregate) = deps.load(&request_id).await?;

        if aggregate.is_terminal() {
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "terminal");
            return Ok(());
        }

        if let Some(stored) = find_terminal(&stream) {
            // A previous invocation decided the outcome but may have died
            // before publishing; republish under the stored id.
            deps.refresh_projection(&request_id).await?;
            deps.publish_stored(&request_id, stored).await?;
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "republished");
            return Ok(());
        }

        let job_id = aggregate
            .external_job_id
            .clone()
            .unwrap_or_else(|| payload.external_job_id.clone());
        if job_id.is_empty() {
            tracing::warn!(request_id = %request_id, "no job id to poll; discarding");
            deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "invalid");
            return Ok(());
        }

        let status = deps.external.get_status(&job_id).await?;
        let now = deps.clock.now();

        match status {
            ExternalJobStatus::Created | ExternalJobStatus::Inprogress => {
                // Nothing to record; the projection's poll guard was
                // already advanced by the scheduler.
                tracing::debug!(request_id = %request_id, job_id = %job_id, %status, "job still pending");
                metrics::record_handler_outcome(HANDLER_NAME, "pending");
            }
            ExternalJobStatus::Pass => {
                self.record_terminal(&request_id, &aggregate, &job_id, TerminalStatus::Pass, now, &context)
                    .await?;
            }
            ExternalJobStatus::Fail => {
                self.record_terminal(&request_id, &aggregate, &job_id, TerminalStatus::Fail, now, &context)
                    .await?;
            }
            ExternalJobStatus::FailCanRetry => {
                self.handle_retryable_failure(&request_id, &stream, &aggregate, &job_id, now, &context)
                    .await?;
            }
            ExternalJobStatus::Unknown => {
                tracing::warn!(
                    request_id = %request_id,
                    job_id = %job_id,
                    "unrecognized external status; coercing to terminal Fail"
                );
                self.record_terminal(&request_id, &aggregate, &job_id, TerminalStatus::Fail, now, &context)
                    .await?;
            }
        }

        deps.mark_completed(HANDLER_NAME, &trigger.id).await?;
        Ok(())
    }

    /// Records `job.terminal.v1` and publishes it.
    ///
    /// A concurrency conflict means another worker advanced the stream; if
    /// its terminal event is visible it is republished, otherwise the
    /// trigger is simply treated as handled.
    async fn record_terminal(
        &self,
        request_id: &RequestId,
        aggregate: &RequestAggregate,
        job_id: &str,
        status: TerminalStatus,
        now: DateTime<Utc>,
        context: &MessageContext,
    ) -> Result<()> {
        let deps = &self.deps;
        let attempt = aggregate.submit_attempt_count.max(1);
        let stream_id = request_id.to_string();

        let event_id = deterministic_event_id(
            &stream_id,
            event_types::JOB_TERMINAL,
            context.correlation_id.as_deref(),
            context.causation_id.as_deref(),
            Some(&format!("attempt:{attempt}|job:{job_id}|status:{status}")),
        )?;
        let payload = JobTerminal {
            request_id: request_id.clone(),
            external_job_id: job_id.to_string(),
            terminal_status: status,
            attempt,
        };
        let event = EventToAppend::new(
            event_id,
            event_types::JOB_TERMINAL,
            now,
            payload_value(&payload)?,
        )
        .with_context(context);

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
                metrics::record_append(event_types::JOB_TERMINAL);
                deps.refresh_projection(request_id).await?;
                deps.publish_stored(request_id, &event.into_stored(version))
                    .await?;
                metrics::record_handler_outcome(HANDLER_NAME, "handled");
                Ok(())
            }
            Err(error) if error.is_concurrency() => {
                self.republish_winner(request_id).await?;
                metrics::record_handler_outcome(HANDLER_NAME, "conflict");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Opens the next attempt, or coerces to terminal `Fail` when the
    /// budget is spent or the aggregate has no intake keys.
    async fn handle_retryable_failure(
        &self,
        request_id: &RequestId,
        stream: &[drover_core::StoredEvent],
        aggregate: &RequestAggregate,
        job_id: &str,
        now: DateTime<Utc>,
        context: &MessageContext,
    ) -> Result<()> {
        let deps = &self.deps;
        let next_attempt = aggregate.submit_attempt_count + 1;

        let keys = match &aggregate.keys {
            Some(keys) if next_attempt <= deps.config.max_submit_attempts => keys.clone(),
            Some(_) => {
                tracing::debug!(
                    request_id = %request_id,
                    next_attempt,
                    max = deps.config.max_submit_attempts,
                    "retry budget exhausted; recording terminal Fail"
                );
                return self
                    .record_terminal(request_id, aggregate, job_id, TerminalStatus::Fail, now, context)
                    .await;
            }
            None => {
                tracing::warn!(request_id = %request_id, "aggregate has no intake keys; recording terminal Fail");
                return self
                    .record_terminal(request_id, aggregate, job_id, TerminalStatus::Fail, now, context)
                    .await;
            }
        };

        if let Some(stored) = find_prepared(stream, next_attempt)? {
            // Another invocation already opened the next attempt.
            deps.refresh_projection(request_id).await?;
            deps.publish_stored(request_id, stored).await?;
            metrics::record_handler_outcome(HANDLER_NAME, "republished");
            return Ok(());
        }

        let stream_id = request_id.to_string();
        let event_id = deterministic_event_id(
            &stream_id,
            event_types::SUBMISSION_PREPARED,
            context.correlation_id.as_deref(),
            context.causation_id.as_deref(),
            Some(&format!("attempt:{next_attempt}")),
        )?;
        let payload = SubmissionPrepared {
            request_id: request_id.clone(),
            partition_key: keys.partition_key,
            row_key: keys.row_key,
            attempt: next_attempt,
        };
        let event = EventToAppend::new(
            event_id,
            event_types::SUBMISSION_PREPARED,
            now,
            payload_value(&payload)?,
        )
        .with_context(context);

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
                metrics::record_append(event_types::SUBMISSION_PREPARED);
                deps.refresh_projection(request_id).await?;
                deps.publish_stored(request_id, &event.into_stored(version))
                    .await?;
                metrics::record_handler_outcome(HANDLER_NAME, "retry");
                Ok(())
            }
            Err(error) if error.is_concurrency() => {
                // Another worker advanced the stream; republish its
                // prepared event when visible.
                let fresh = deps
                    .event_store
                    .read_stream(&stream_id)
                    .await?;
                if let Some(stored) = find_prepared(&fresh, next_attempt)? {
                    deps.refresh_projection(request_id).await?;
                    deps.publish_stored(request_id, stored).await?;
                }
                metrics::record_handler_outcome(HANDLER_NAME, "conflict");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// After a lost append race, republishes the winning terminal event
    /// when one is visible.
    async fn republish_winner(&self, request_id: &RequestId) -> Result<()> {
        let deps = &self.deps;
        let stream = deps
            .event_store
            .read_stream(&request_id.to_string())
            .await?;
        if let Some(stored) = find_terminal(&stream) {
            deps.refresh_projection(request_id).await?;
            deps.publish_stored(request_id, stored).await?;
        } else {
            tracing::debug!(request_id = %request_id, "append race lost; no terminal event visible");
        }
        Ok(())
    }
}
