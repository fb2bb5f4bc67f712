//! # drover-engine
//!
//! Durable, event-sourced workflow engine that shepherds work items through
//! an external asynchronous service.
//!
//! For each intake item the engine:
//!
//! - discovers and claims the intake record under a lease,
//! - submits a job to the remote service,
//! - polls the remote service until a terminal outcome, with bounded
//!   retries for transient failures,
//! - writes the outcome back to the intake store and emits a completion
//!   notification.
//!
//! Every transition is persisted as an append-only event stream per item,
//! and a derived read model answers "what needs polling now?".
//!
//! ## Guarantees
//!
//! - **At-least-once in, exactly-once effect**: triggers may be delivered
//!   repeatedly; deterministic event ids, optimistic appends, and
//!   idempotency leases collapse duplicates onto one stored event.
//! - **Crash-safe republish**: events are durable before any publish; a
//!   recovered handler locates the stored event and republishes it under
//!   the same id.
//! - **Per-stream ordering**: the first writer at an expected version
//!   wins; losers treat the trigger as handled.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use drover_core::{MemoryEventStore, SystemClock};
//! use drover_engine::config::EngineConfig;
//! use drover_engine::handlers::{DiscoverHandler, WorkflowDeps};
//! use drover_engine::store::{
//!     MemoryEventPublisher, MemoryIdempotencyStore, MemoryIntakeRepository,
//!     MemoryProjectionRepository, ScriptedExternalService,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> drover_engine::error::Result<()> {
//! let intake = Arc::new(MemoryIntakeRepository::new());
//! intake.insert_unprocessed("pA", "rK");
//!
//! let deps = Arc::new(WorkflowDeps {
//!     event_store: Arc::new(MemoryEventStore::new()),
//!     projections: Arc::new(MemoryProjectionRepository::new()),
//!     intake,
//!     idempotency: Arc::new(MemoryIdempotencyStore::new()),
//!     external: Arc::new(ScriptedExternalService::new()),
//!     publisher: Arc::new(MemoryEventPublisher::new()),
//!     clock: Arc::new(SystemClock),
//!     config: EngineConfig::default(),
//! });
//!
//! let summary = DiscoverHandler::new(deps).run().await?;
//! assert_eq!(summary.discovered, 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod events;
pub mod external;
pub mod handlers;
pub mod idempotency;
pub mod intake;
pub mod metrics;
pub mod projection;
pub mod publish;
pub mod runtime;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::aggregate::{RequestAggregate, WorkItemStatus};
    pub use crate::config::EngineConfig;
    pub use crate::error::{Error, Result};
    pub use crate::events::{
        FinalStatus, JobPollRequested, JobSubmitted, JobTerminal, RequestCompleted,
        RequestDiscovered, SubmissionPrepared, TerminalStatus, WorkflowEvent, event_types,
    };
    pub use crate::external::{ExternalJobStatus, ExternalServiceClient, JobSubmission};
    pub use crate::handlers::{
        CompleteRequestHandler, DiscoverHandler, EventRouter, PollExternalJobHandler,
        PrepareSubmissionHandler, SchedulePollsHandler, SubmitJobHandler, WorkflowDeps,
    };
    pub use crate::idempotency::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore};
    pub use crate::intake::{IntakeKeys, IntakeRepository, IntakeRow, IntakeStatus};
    pub use crate::projection::{
        ProjectionRepository, ProjectionStatus, Reducer, RequestProjection,
    };
    pub use crate::publish::{EventPublisher, IntegrationEvent};
    pub use crate::runtime::EngineRuntime;
}
