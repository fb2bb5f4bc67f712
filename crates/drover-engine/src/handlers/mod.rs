//! The six workflow handlers.
//!
//! Two are timer-driven reconcilers (`Discover`, `SchedulePolls`); four are
//! bus-triggered (`PrepareSubmission`, `SubmitJob`, `PollExternalJob`,
//! `CompleteRequest`). Every handler follows the same discipline:
//!
//! 1. Read the stream, rehydrate the aggregate.
//! 2. Append zero or one new event under an optimistic version check.
//! 3. Rebuild and save the projection from the stream.
//! 4. Publish the integration event with its deterministic id.
//!
//! A concurrency conflict on append means another worker advanced the
//! stream; the trigger is treated as handled. A crash between append and
//! publish is recovered on redelivery by locating the stored event and
//! republishing it — appends are durable before any publish.

pub mod complete_request;
pub mod discover;
pub mod poll_external_job;
pub mod prepare_submission;
pub mod schedule_polls;
pub mod submit_job;

pub use complete_request::CompleteRequestHandler;
pub use discover::{DiscoverHandler, DiscoverSummary};
pub use poll_external_job::PollExternalJobHandler;
pub use prepare_submission::PrepareSubmissionHandler;
pub use schedule_polls::{SchedulePollsHandler, ScheduleSummary};
pub use submit_job::SubmitJobHandler;

use std::sync::Arc;

use drover_core::{Clock, EventStore, RequestId, StoredEvent};

use crate::aggregate::RequestAggregate;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::event_types;
use crate::external::ExternalServiceClient;
use crate::idempotency::IdempotencyStore;
use crate::intake::IntakeRepository;
use crate::metrics;
use crate::projection::{ProjectionRepository, Reducer};
use crate::publish::{EventPublisher, IntegrationEvent};

/// Shared dependency bundle for all handlers.
///
/// Handlers hold an `Arc<WorkflowDeps>`; the adapters behind the trait
/// objects are the swap points for production backends.
pub struct WorkflowDeps {
    /// Append-only event store.
    pub event_store: Arc<dyn EventStore>,
    /// Read-model repository.
    pub projections: Arc<dyn ProjectionRepository>,
    /// Intake store.
    pub intake: Arc<dyn IntakeRepository>,
    /// Idempotency lease store.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// External job service.
    pub external: Arc<dyn ExternalServiceClient>,
    /// Integration event publisher.
    pub publisher: Arc<dyn EventPublisher>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Engine configuration.
    pub config: EngineConfig,
}

impl WorkflowDeps {
    fn reducer(&self) -> Reducer {
        Reducer::new(self.config.poll_interval)
    }

    /// Reads the full stream for a work item and rehydrates its aggregate.
    pub(crate) async fn load(
        &self,
        request_id: &RequestId,
    ) -> Result<(Vec<StoredEvent>, RequestAggregate)> {
        let stream = self.event_store.read_stream(&request_id.to_string()).await?;
        let aggregate = RequestAggregate::rehydrate(request_id.clone(), &stream)?;
        Ok((stream, aggregate))
    }

    /// Rebuilds the projection from the stream and saves it.
    pub(crate) async fn refresh_projection(&self, request_id: &RequestId) -> Result<()> {
        let stream = self.event_store.read_stream(&request_id.to_string()).await?;
        let current = self.projections.get(request_id).await?;
        if let Some(updated) = self.reducer().reduce(current, &stream)? {
            self.projections.upsert(&updated).await?;
        }
        Ok(())
    }

    /// Publishes a stored event under its deterministic id.
    pub(crate) async fn publish_stored(
        &self,
        request_id: &RequestId,
        stored: &StoredEvent,
    ) -> Result<()> {
        let event =
            IntegrationEvent::from_stored(&self.config.event_source, request_id, stored);
        self.publisher.publish(&event).await?;
        metrics::record_publish(&stored.event_type);
        Ok(())
    }

    /// Begins the idempotency lease for a bus trigger.
    pub(crate) async fn try_begin(&self, handler: &'static str, event_id: &str) -> Result<bool> {
        let acquired = self
            .idempotency
            .try_begin(
                handler,
                event_id,
                self.config.idempotency_lease_duration,
                self.clock.now(),
            )
            .await?;
        metrics::record_idempotency_check(handler, if acquired { "proceed" } else { "skip" });
        Ok(acquired)
    }

    /// Marks the trigger as fully processed.
    pub(crate) async fn mark_completed(
        &self,
        handler: &'static str,
        event_id: &str,
    ) -> Result<()> {
        self.idempotency
            .mark_completed(handler, event_id, self.clock.now())
            .await
    }
}

/// Routes integration events to the bus-triggered handlers.
///
/// In production the message bus invokes the handlers directly; the router
/// is the in-process equivalent used by the runtime's local mode and by
/// tests.
pub struct EventRouter {
    prepare: PrepareSubmissionHandler,
    submit: SubmitJobHandler,
    poll: PollExternalJobHandler,
    complete: CompleteRequestHandler,
}

impl EventRouter {
    /// Creates a router over the shared dependency bundle.
    #[must_use]
    pub fn new(deps: Arc<WorkflowDeps>) -> Self {
        Self {
            prepare: PrepareSubmissionHandler::new(Arc::clone(&deps)),
            submit: SubmitJobHandler::new(Arc::clone(&deps)),
            poll: PollExternalJobHandler::new(Arc::clone(&deps)),
            complete: CompleteRequestHandler::new(deps),
        }
    }

    /// Dispatches one integration event to its handler.
    ///
    /// `request.completed.v1` has no downstream handler; it and any
    /// non-catalog type are ignored.
    ///
    /// # Errors
    ///
    /// Propagates handler errors so the bus redelivers the trigger.
    pub async fn dispatch(&self, event: &IntegrationEvent) -> Result<()> {
        match event.event_type.as_str() {
            event_types::REQUEST_DISCOVERED => self.prepare.handle(event).await,
            event_types::SUBMISSION_PREPARED => self.submit.handle(event).await,
            event_types::JOB_POLL_REQUESTED => self.poll.handle(event).await,
            event_types::JOB_TERMINAL => self.complete.handle(event).await,
            other => {
                tracing::debug!(event_type = other, event_id = %event.id, "no handler subscribed");
                Ok(())
            }
        }
    }
}
