//! Timer-driven scheduling of due polls.
//!
//! Each pass queries the projection for items whose `next_poll_at_utc` has
//! arrived and appends `job.pollrequested.v1` for each under an optimistic
//! check against the projection's `last_applied_event_version`. The
//! discriminator embeds the due time, so retries within the same interval
//! collide on the same deterministic id, and the reducer advances the poll
//! guard so the item is not re-selected on the next tick.

use std::sync::Arc;

use chrono::SecondsFormat;
use drover_core::{EventToAppend, MessageContext, deterministic_event_id};

use crate::error::Result;
use crate::events::{JobPollRequested, event_types, payload_value};
use crate::handlers::WorkflowDeps;
use crate::metrics;

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    /// Due projections returned by the query.
    pub due: usize,
    /// Poll requests appended and published.
    pub scheduled: usize,
    /// Rows skipped (no job id or nothing submitted yet).
    pub skipped: usize,
    /// Appends lost to another writer.
    pub conflicts: usize,
}

/// Timer-driven poll scheduler.
pub struct SchedulePollsHandler {
    deps: Arc<WorkflowDeps>,
}

impl SchedulePollsHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(deps: Arc<WorkflowDeps>) -> Self {
        Self { deps }
    }

    /// Runs one scheduling pass.
    ///
    /// # Errors
    ///
    /// Propagates storage and publish failures; the timer retries on the
    /// next tick. Lost appends are normal outcomes.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<ScheduleSummary> {
        let _timing = metrics::TimingGuard::new("schedule-polls");
        let deps = &self.deps;
        let now = deps.clock.now();

        let due = deps
            .projections
            .due_for_poll(now, deps.config.poll_batch_size)
            .await?;

        let mut summary = ScheduleSummary {
            due: due.len(),
            ..ScheduleSummary::default()
        };

        for projection in due {
            let request_id = projection.request_id.clone();

            let (Some(job_id), Some(due_at)) = (
                projection.external_job_id.clone(),
                projection.next_poll_at_utc,
            ) else {
                tracing::warn!(request_id = %request_id, "due projection has no job id; skipping");
                summary.skipped += 1;
                metrics::record_poll_scheduled("skipped");
                continue;
            };
            if projection.submit_attempt_count == 0 {
                tracing::warn!(request_id = %request_id, "due projection has no submissions; skipping");
                summary.skipped += 1;
                metrics::record_poll_scheduled("skipped");
                continue;
            }

            let attempt = projection.submit_attempt_count;
            let stream_id = request_id.to_string();
            let context = MessageContext::root(stream_id.clone());

            // Retries within the same interval collide on the same id.
            let discriminator = format!(
                "attempt:{attempt}|due:{}",
                due_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            let event_id = deterministic_event_id(
                &stream_id,
                event_types::JOB_POLL_REQUESTED,
                context.correlation_id.as_deref(),
                None,
                Some(&discriminator),
            )?;
            let payload = JobPollRequested {
                request_id: request_id.clone(),
                external_job_id: job_id,
                attempt,
            };
            let event = EventToAppend::new(
                event_id,
                event_types::JOB_POLL_REQUESTED,
                now,
                payload_value(&payload)?,
            )
            .with_context(&context);

            match deps
                .event_store
                .append(
                    &stream_id,
                    std::slice::from_ref(&event),
                    Some(projection.last_applied_event_version),
                )
                .await
            {
                Ok(version) => {
                    metrics::record_append(event_types::JOB_POLL_REQUESTED);
                    deps.refresh_projection(&request_id).await?;
                    deps.publish_stored(&request_id, &event.into_stored(version))
                        .await?;
                    summary.scheduled += 1;
                    metrics::record_poll_scheduled("scheduled");
                }
                Err(error) if error.is_concurrency() => {
                    // Another writer advanced the stream since the
                    // projection was read; it will surface as due again if
                    // still relevant.
                    tracing::debug!(request_id = %stream_id, "poll append lost; skipping");
                    summary.conflicts += 1;
                    metrics::record_poll_scheduled("conflict");
                }
                Err(error) => return Err(error.into()),
            }
        }

        metrics::record_handler_outcome("schedule-polls", "handled");
        Ok(summary)
    }
}
