//! Timer-driven discovery of eligible intake rows.
//!
//! Each pass claims up to a batch of eligible rows under an etag-conditional
//! lease and opens the workflow stream with `request.discovered.v1` at
//! `expected_version = 0`. No idempotency store is involved: the
//! stream-must-not-exist check is the cross-invocation guard, so a row
//! reclaimed after a lease expiry does not open a second stream.

use std::sync::Arc;

use drover_core::{EventToAppend, MessageContext, deterministic_event_id};

use crate::error::Result;
use crate::events::{RequestDiscovered, event_types, payload_value};
use crate::handlers::WorkflowDeps;
use crate::metrics;

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverSummary {
    /// Eligible rows returned by the intake query.
    pub examined: usize,
    /// Rows claimed under a lease.
    pub claimed: usize,
    /// Streams opened (event appended and published).
    pub discovered: usize,
    /// Appends skipped because the stream already existed.
    pub conflicts: usize,
}

/// Timer-driven intake discovery.
pub struct DiscoverHandler {
    deps: Arc<WorkflowDeps>,
}

impl DiscoverHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(deps: Arc<WorkflowDeps>) -> Self {
        Self { deps }
    }

    /// Runs one discovery pass.
    ///
    /// # Errors
    ///
    /// Propagates storage and publish failures; the timer retries on the
    /// next tick. Per-row claim losses and existing streams are normal
    /// outcomes, not errors.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<DiscoverSummary> {
        let _timing = metrics::TimingGuard::new("discover");
        let deps = &self.deps;
        let now = deps.clock.now();

        let rows = deps
            .intake
            .available_unprocessed(deps.config.intake_batch_size, now)
            .await?;

        let mut summary = DiscoverSummary {
            examined: rows.len(),
            ..DiscoverSummary::default()
        };

        for row in rows {
            let lease_until = now + deps.config.lease_duration;
            if !deps.intake.try_claim(&row, lease_until).await? {
                metrics::record_intake_claim("lost");
                continue;
            }
            metrics::record_intake_claim("claimed");
            summary.claimed += 1;

            let request_id = match row.request_id() {
                Ok(id) => id,
                Err(error) => {
                    tracing::warn!(
                        partition_key = %row.partition_key,
                        row_key = %row.row_key,
                        %error,
                        "skipping intake row with unusable keys"
                    );
                    continue;
                }
            };

            let stream_id = request_id.to_string();
            let context = MessageContext::root(stream_id.clone());
            let event_id = deterministic_event_id(
                &stream_id,
                event_types::REQUEST_DISCOVERED,
                context.correlation_id.as_deref(),
                None,
                None,
            )?;

            let payload = RequestDiscovered {
                request_id: request_id.clone(),
                partition_key: row.partition_key.clone(),
                row_key: row.row_key.clone(),
            };
            let event = EventToAppend::new(
                event_id,
                event_types::REQUEST_DISCOVERED,
                now,
                payload_value(&payload)?,
            )
            .with_context(&context);

            match deps
                .event_store
                .append(&stream_id, std::slice::from_ref(&event), Some(0))
                .await
            {
                Ok(_) => {
                    metrics::record_append(event_types::REQUEST_DISCOVERED);
                    deps.refresh_projection(&request_id).await?;
                    let stored = event.into_stored(1);
                    deps.publish_stored(&request_id, &stored).await?;
                    summary.discovered += 1;
                }
                Err(error) if error.is_concurrency() => {
                    // The stream already exists; this is the idempotent
                    // no-op, so skip the publish.
                    tracing::debug!(request_id = %stream_id, "stream already discovered");
                    summary.conflicts += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }

        metrics::record_handler_outcome("discover", "handled");
        Ok(summary)
    }
}
