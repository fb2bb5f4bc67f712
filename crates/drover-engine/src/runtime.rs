//! Timer runtime driving the two scheduled passes.
//!
//! Discovery and poll scheduling fire on independent intervals. Every
//! adapter call inside a pass is a suspension point, so cancelling the
//! shutdown token aborts before the next I/O; partial work is safe because
//! appended events are durable before any publish, and the next pass picks
//! up where the aborted one stopped.

use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::handlers::{DiscoverHandler, SchedulePollsHandler, WorkflowDeps};

/// Drives the timer-triggered handlers until shutdown.
pub struct EngineRuntime {
    deps: Arc<WorkflowDeps>,
    discover: DiscoverHandler,
    scheduler: SchedulePollsHandler,
}

impl EngineRuntime {
    /// Creates the runtime over the shared dependency bundle.
    #[must_use]
    pub fn new(deps: Arc<WorkflowDeps>) -> Self {
        Self {
            discover: DiscoverHandler::new(Arc::clone(&deps)),
            scheduler: SchedulePollsHandler::new(Arc::clone(&deps)),
            deps,
        }
    }

    /// Runs the timer loops until the token is cancelled.
    ///
    /// Pass failures are logged and retried on the next tick; the failure
    /// policy for timer-driven work is "propagate to the trigger runtime",
    /// and here the next tick is that retry.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut discover_tick = interval(self.deps.config.discover_schedule);
        discover_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll_tick = interval(self.deps.config.poll_schedule);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            discover_schedule = ?self.deps.config.discover_schedule,
            poll_schedule = ?self.deps.config.poll_schedule,
            "engine runtime started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("engine runtime stopping");
                    return;
                }
                _ = discover_tick.tick() => {
                    match self.discover.run().await {
                        Ok(summary) => tracing::debug!(?summary, "discovery pass finished"),
                        Err(error) => tracing::error!(%error, "discovery pass failed"),
                    }
                }
                _ = poll_tick.tick() => {
                    match self.scheduler.run().await {
                        Ok(summary) => tracing::debug!(?summary, "poll scheduling pass finished"),
                        Err(error) => tracing::error!(%error, "poll scheduling pass failed"),
                    }
                }
            }
        }
    }
}
