//! End-to-end scenario tests for the workflow engine.
//!
//! These drive the full handler chain against the in-memory adapters,
//! pumping published integration events back through the router to simulate
//! the message bus.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use drover_core::{Clock, ManualClock, MemoryEventStore, StoredEvent};
use drover_engine::config::EngineConfig;
use drover_engine::events::{JobTerminal, SubmissionPrepared, TerminalStatus, event_types};
use drover_engine::external::ExternalJobStatus;
use drover_engine::handlers::{DiscoverHandler, EventRouter, SchedulePollsHandler, WorkflowDeps};
use drover_engine::intake::IntakeStatus;
use drover_engine::projection::ProjectionStatus;
use drover_engine::publish::IntegrationEvent;
use drover_engine::store::{
    MemoryEventPublisher, MemoryIdempotencyStore, MemoryIntakeRepository,
    MemoryProjectionRepository, ScriptedExternalService,
};

const PARTITION: &str = "pA";
const ROW: &str = "rK";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap()
}

struct Harness {
    event_store: Arc<MemoryEventStore>,
    projections: Arc<MemoryProjectionRepository>,
    intake: Arc<MemoryIntakeRepository>,
    external: Arc<ScriptedExternalService>,
    publisher: Arc<MemoryEventPublisher>,
    clock: Arc<ManualClock>,
    router: EventRouter,
    discover: DiscoverHandler,
    scheduler: SchedulePollsHandler,
}

impl Harness {
    fn new(config: EngineConfig) -> Self {
        let event_store = Arc::new(MemoryEventStore::new());
        let projections = Arc::new(MemoryProjectionRepository::new());
        let intake = Arc::new(MemoryIntakeRepository::new());
        let external = Arc::new(ScriptedExternalService::new());
        let publisher = Arc::new(MemoryEventPublisher::new());
        let clock = Arc::new(ManualClock::new(t0()));

        let deps = Arc::new(WorkflowDeps {
            event_store: Arc::clone(&event_store) as Arc<dyn drover_core::EventStore>,
            projections: Arc::clone(&projections) as Arc<dyn drover_engine::projection::ProjectionRepository>,
            intake: Arc::clone(&intake) as Arc<dyn drover_engine::intake::IntakeRepository>,
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
            external: Arc::clone(&external) as Arc<dyn drover_engine::external::ExternalServiceClient>,
            publisher: Arc::clone(&publisher) as Arc<dyn drover_engine::publish::EventPublisher>,
            clock: Arc::clone(&clock) as Arc<dyn drover_core::Clock>,
            config,
        });

        Self {
            event_store,
            projections,
            intake,
            external,
            publisher,
            clock,
            router: EventRouter::new(Arc::clone(&deps)),
            discover: DiscoverHandler::new(Arc::clone(&deps)),
            scheduler: SchedulePollsHandler::new(deps),
        }
    }

    fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Delivers every published event to its handler until the bus drains,
    /// returning everything that was delivered.
    async fn pump(&self) -> Vec<IntegrationEvent> {
        let mut delivered = Vec::new();
        loop {
            let batch = self.publisher.drain();
            if batch.is_empty() {
                return delivered;
            }
            for event in batch {
                self.router.dispatch(&event).await.expect("dispatch");
                delivered.push(event);
            }
        }
    }

    async fn stream(&self) -> Vec<StoredEvent> {
        use drover_core::EventStore;
        self.event_store
            .read_stream(&format!("{PARTITION}|{ROW}"))
            .await
            .expect("read stream")
    }

    async fn projection(&self) -> drover_engine::projection::RequestProjection {
        use drover_core::RequestId;
        use drover_engine::projection::ProjectionRepository;
        self.projections
            .get(&RequestId::new(PARTITION, ROW).unwrap())
            .await
            .expect("get projection")
            .expect("projection exists")
    }
}

fn event_type_sequence(stream: &[StoredEvent]) -> Vec<&str> {
    stream.iter().map(|e| e.event_type.as_str()).collect()
}

#[tokio::test]
async fn s1_happy_path_runs_discovery_to_completion() {
    let harness = Harness::with_defaults();
    harness.intake.insert_unprocessed(PARTITION, ROW);
    harness.external.script_status("J-001", ExternalJobStatus::Pass);

    // Discover claims the row and opens the stream.
    let summary = harness.discover.run().await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.discovered, 1);
    assert_eq!(
        harness.intake.status(PARTITION, ROW),
        Some(IntakeStatus::InProgress)
    );

    // Bus chain: discovered -> prepared -> submitted.
    harness.pump().await;
    let stream = harness.stream().await;
    assert_eq!(
        event_type_sequence(&stream),
        vec![
            event_types::REQUEST_DISCOVERED,
            event_types::SUBMISSION_PREPARED,
            event_types::JOB_SUBMITTED,
        ]
    );
    let projection = harness.projection().await;
    assert_eq!(
        projection.next_poll_at_utc,
        Some(t0() + Duration::minutes(5))
    );
    assert_eq!(projection.external_job_id.as_deref(), Some("J-001"));

    // At T+5m the scheduler emits the poll request and advances the guard.
    harness.clock.advance(Duration::minutes(5));
    let summary = harness.scheduler.run().await.unwrap();
    assert_eq!(summary.scheduled, 1);
    let projection = harness.projection().await;
    assert_eq!(
        projection.next_poll_at_utc,
        Some(t0() + Duration::minutes(10))
    );

    // Poll sees Pass; completion finalizes the intake row.
    harness.pump().await;
    let stream = harness.stream().await;
    assert_eq!(
        event_type_sequence(&stream),
        vec![
            event_types::REQUEST_DISCOVERED,
            event_types::SUBMISSION_PREPARED,
            event_types::JOB_SUBMITTED,
            event_types::JOB_POLL_REQUESTED,
            event_types::JOB_TERMINAL,
            event_types::REQUEST_COMPLETED,
        ]
    );
    let versions: Vec<u64> = stream.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);

    assert_eq!(harness.intake.status(PARTITION, ROW), Some(IntakeStatus::Pass));
    let projection = harness.projection().await;
    assert_eq!(projection.status, ProjectionStatus::Pass);
    assert_eq!(projection.next_poll_at_utc, None);
    assert_eq!(projection.last_applied_event_version, 6);
}

#[tokio::test]
async fn s2_retry_within_budget_opens_a_second_attempt() {
    let harness = Harness::with_defaults();
    harness.intake.insert_unprocessed(PARTITION, ROW);
    harness
        .external
        .script_status("J-001", ExternalJobStatus::FailCanRetry);
    harness.external.script_status("J-002", ExternalJobStatus::Pass);

    harness.discover.run().await.unwrap();
    harness.pump().await;

    // First poll: FailCanRetry opens attempt 2 instead of a terminal event.
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();
    harness.pump().await;

    let stream = harness.stream().await;
    assert!(
        !stream
            .iter()
            .any(|e| e.event_type == event_types::JOB_TERMINAL),
        "FailCanRetry within budget must not produce a terminal event"
    );
    let prepared: SubmissionPrepared = serde_json::from_value(
        stream
            .iter()
            .rev()
            .find(|e| e.event_type == event_types::SUBMISSION_PREPARED)
            .unwrap()
            .data
            .clone(),
    )
    .unwrap();
    assert_eq!(prepared.attempt, 2);

    let projection = harness.projection().await;
    assert_eq!(projection.external_job_id.as_deref(), Some("J-002"));
    assert_eq!(projection.submit_attempt_count, 2);

    // Second poll: Pass terminates attempt 2.
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();
    harness.pump().await;

    let stream = harness.stream().await;
    let terminal: JobTerminal = serde_json::from_value(
        stream
            .iter()
            .find(|e| e.event_type == event_types::JOB_TERMINAL)
            .unwrap()
            .data
            .clone(),
    )
    .unwrap();
    assert_eq!(terminal.terminal_status, TerminalStatus::Pass);
    assert_eq!(terminal.attempt, 2);
    assert_eq!(terminal.external_job_id, "J-002");
    assert_eq!(harness.intake.status(PARTITION, ROW), Some(IntakeStatus::Pass));
}

#[tokio::test]
async fn s3_retry_exhaustion_is_coerced_to_terminal_fail() {
    let config = EngineConfig {
        max_submit_attempts: 2,
        ..EngineConfig::default()
    };
    let harness = Harness::new(config);
    harness.intake.insert_unprocessed(PARTITION, ROW);
    harness
        .external
        .script_status("J-001", ExternalJobStatus::FailCanRetry);
    harness
        .external
        .script_status("J-002", ExternalJobStatus::FailCanRetry);

    harness.discover.run().await.unwrap();
    harness.pump().await;

    // Attempt 1 fails retryably; attempt 2 opens.
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();
    harness.pump().await;

    // Attempt 2 fails retryably with no budget left: terminal Fail.
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();
    harness.pump().await;

    let stream = harness.stream().await;
    let terminal: JobTerminal = serde_json::from_value(
        stream
            .iter()
            .find(|e| e.event_type == event_types::JOB_TERMINAL)
            .unwrap()
            .data
            .clone(),
    )
    .unwrap();
    assert_eq!(terminal.terminal_status, TerminalStatus::Fail);
    assert_eq!(terminal.attempt, 2);
    assert_eq!(harness.intake.status(PARTITION, ROW), Some(IntakeStatus::Fail));

    // The budget bounds distinct attempts across the whole stream.
    let attempts: std::collections::BTreeSet<u32> = stream
        .iter()
        .filter(|e| e.event_type == event_types::SUBMISSION_PREPARED)
        .map(|e| {
            serde_json::from_value::<SubmissionPrepared>(e.data.clone())
                .unwrap()
                .attempt
        })
        .collect();
    assert!(attempts.len() <= 2);
}

#[tokio::test]
async fn s4_double_delivery_of_a_poll_request_appends_nothing() {
    let harness = Harness::with_defaults();
    harness.intake.insert_unprocessed(PARTITION, ROW);
    harness.external.script_status("J-001", ExternalJobStatus::Pass);

    harness.discover.run().await.unwrap();
    harness.pump().await;
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();

    // Capture the poll request and deliver it by hand.
    let published = harness.publisher.drain();
    let poll_request = published
        .iter()
        .find(|e| e.event_type == event_types::JOB_POLL_REQUESTED)
        .unwrap()
        .clone();

    let terminal_publishes = |events: &[IntegrationEvent]| {
        events
            .iter()
            .filter(|e| e.event_type == event_types::JOB_TERMINAL)
            .cloned()
            .collect::<Vec<_>>()
    };

    // First delivery appends the terminal event but crashes before the
    // publish reaches the bus, leaving the lease in progress.
    harness.publisher.fail_next(1);
    assert!(harness.router.dispatch(&poll_request).await.is_err());
    let len_after_first = harness.stream().await.len();
    assert_eq!(len_after_first, 5, "poll appended the terminal event");
    let stored_terminal_id = harness.stream().await.last().unwrap().event_id.clone();

    // Second delivery inside the lease window: no lease, silent skip.
    harness.router.dispatch(&poll_request).await.unwrap();
    assert_eq!(harness.stream().await.len(), len_after_first);
    assert!(terminal_publishes(&harness.publisher.drain()).is_empty());

    // Third delivery after lease expiry: takeover sees the stored terminal
    // event and republishes it under the same deterministic id.
    harness.clock.advance(Duration::minutes(3));
    harness.router.dispatch(&poll_request).await.unwrap();
    assert_eq!(harness.stream().await.len(), len_after_first);
    let republished = terminal_publishes(&harness.publisher.drain());
    assert_eq!(republished.len(), 1);
    assert_eq!(republished[0].id, stored_terminal_id);

    // Fourth delivery: the record is completed now; nothing happens.
    harness.router.dispatch(&poll_request).await.unwrap();
    assert_eq!(harness.stream().await.len(), len_after_first);
    assert!(terminal_publishes(&harness.publisher.drain()).is_empty());
}

#[tokio::test]
async fn s5_concurrent_claim_and_append_resolve_to_one_stream() {
    let harness = Harness::with_defaults();
    harness.intake.insert_unprocessed(PARTITION, ROW);

    // Worker B reads the row before worker A claims it.
    use drover_engine::intake::IntakeRepository;
    let stale_row = harness
        .intake
        .available_unprocessed(10, harness.clock.now())
        .await
        .unwrap()[0]
        .clone();

    let summary = harness.discover.run().await.unwrap();
    assert_eq!(summary.discovered, 1);

    // B's etag-conditioned claim loses.
    let lease_until = harness.clock.now() + Duration::minutes(30);
    assert!(!harness.intake.try_claim(&stale_row, lease_until).await.unwrap());

    // Later the lease expires and discovery re-claims the row, but the
    // stream already exists: append(v=0) conflicts and is swallowed.
    harness
        .intake
        .expire_lease(PARTITION, ROW, harness.clock.now());
    let summary = harness.discover.run().await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.conflicts, 1);

    let stream = harness.stream().await;
    assert_eq!(stream.len(), 1);
    // The losing pass published nothing.
    let discovered_publishes = harness
        .publisher
        .published()
        .into_iter()
        .filter(|e| e.event_type == event_types::REQUEST_DISCOVERED)
        .count();
    assert_eq!(discovered_publishes, 1);
}

#[tokio::test]
async fn s6_crash_after_append_republishes_from_the_stored_event() {
    let harness = Harness::with_defaults();
    harness.intake.insert_unprocessed(PARTITION, ROW);

    harness.discover.run().await.unwrap();

    // Deliver discovered -> prepared by hand so we can crash the submit.
    let discovered = harness.publisher.drain()[0].clone();
    harness.router.dispatch(&discovered).await.unwrap();
    let prepared = harness
        .publisher
        .drain()
        .into_iter()
        .find(|e| e.event_type == event_types::SUBMISSION_PREPARED)
        .unwrap();

    // Submit appends job.submitted.v1, then "crashes" before publish.
    harness.publisher.fail_next(1);
    let result = harness.router.dispatch(&prepared).await;
    assert!(result.is_err(), "publish failure must propagate");

    let stream = harness.stream().await;
    assert_eq!(stream.len(), 3);
    let stored_submitted = stream
        .iter()
        .find(|e| e.event_type == event_types::JOB_SUBMITTED)
        .unwrap()
        .clone();
    assert_eq!(harness.external.create_calls(), 1);

    // The bus redelivers after the idempotency lease expires. The handler
    // finds hasSubmitted(attempt) and republishes the stored event without
    // calling the external service or appending again.
    harness.clock.advance(Duration::minutes(3));
    harness.router.dispatch(&prepared).await.unwrap();

    assert_eq!(harness.stream().await.len(), 3, "no duplicate append");
    assert_eq!(harness.external.create_calls(), 1, "external not re-called");

    let republished = harness
        .publisher
        .drain()
        .into_iter()
        .find(|e| e.event_type == event_types::JOB_SUBMITTED)
        .unwrap();
    assert_eq!(republished.id, stored_submitted.event_id);
}

#[tokio::test]
async fn unknown_external_status_is_coerced_to_terminal_fail() {
    let harness = Harness::with_defaults();
    harness.intake.insert_unprocessed(PARTITION, ROW);
    harness
        .external
        .script_status("J-001", ExternalJobStatus::Unknown);

    harness.discover.run().await.unwrap();
    harness.pump().await;
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();
    harness.pump().await;

    let stream = harness.stream().await;
    let terminal: JobTerminal = serde_json::from_value(
        stream
            .iter()
            .find(|e| e.event_type == event_types::JOB_TERMINAL)
            .unwrap()
            .data
            .clone(),
    )
    .unwrap();
    assert_eq!(terminal.terminal_status, TerminalStatus::Fail);
    assert_eq!(harness.intake.status(PARTITION, ROW), Some(IntakeStatus::Fail));
}

#[tokio::test]
async fn pending_statuses_produce_no_events_until_the_next_interval() {
    let harness = Harness::with_defaults();
    harness.intake.insert_unprocessed(PARTITION, ROW);
    harness
        .external
        .script_status("J-001", ExternalJobStatus::Inprogress);
    harness.external.script_status("J-001", ExternalJobStatus::Pass);

    harness.discover.run().await.unwrap();
    harness.pump().await;

    // First poll: still running, nothing recorded.
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();
    harness.pump().await;
    let stream = harness.stream().await;
    assert_eq!(stream.len(), 4);
    assert!(
        !stream
            .iter()
            .any(|e| e.event_type == event_types::JOB_TERMINAL)
    );

    // The guard was advanced, so the same tick selects nothing new.
    let summary = harness.scheduler.run().await.unwrap();
    assert_eq!(summary.due, 0);

    // Next interval: Pass completes the item.
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();
    harness.pump().await;
    assert_eq!(harness.intake.status(PARTITION, ROW), Some(IntakeStatus::Pass));
}

#[tokio::test]
async fn completion_is_single_per_stream_across_redeliveries() {
    let harness = Harness::with_defaults();
    harness.intake.insert_unprocessed(PARTITION, ROW);
    harness.external.script_status("J-001", ExternalJobStatus::Pass);

    harness.discover.run().await.unwrap();
    harness.pump().await;
    harness.clock.advance(Duration::minutes(5));
    harness.scheduler.run().await.unwrap();

    // Walk to the terminal event, capturing it for redelivery.
    let poll_request = harness
        .publisher
        .drain()
        .into_iter()
        .find(|e| e.event_type == event_types::JOB_POLL_REQUESTED)
        .unwrap();
    harness.router.dispatch(&poll_request).await.unwrap();
    let terminal = harness
        .publisher
        .drain()
        .into_iter()
        .find(|e| e.event_type == event_types::JOB_TERMINAL)
        .unwrap();

    // Completion appends request.completed.v1 but crashes before the
    // publish reaches the bus.
    harness.publisher.fail_next(1);
    assert!(harness.router.dispatch(&terminal).await.is_err());
    let len_after_completion = harness.stream().await.len();
    let stored_completion_id = harness.stream().await.last().unwrap().event_id.clone();
    assert_eq!(harness.intake.status(PARTITION, ROW), Some(IntakeStatus::Pass));

    // Redeliver the terminal trigger after lease expiry: the stored
    // completion is republished, the intake write is repeated, and the
    // stream does not grow.
    harness.clock.advance(Duration::minutes(3));
    harness.router.dispatch(&terminal).await.unwrap();

    let stream = harness.stream().await;
    assert_eq!(stream.len(), len_after_completion);
    let completions = stream
        .iter()
        .filter(|e| e.event_type == event_types::REQUEST_COMPLETED)
        .count();
    assert_eq!(completions, 1);
    let republished = harness
        .publisher
        .drain()
        .into_iter()
        .find(|e| e.event_type == event_types::REQUEST_COMPLETED)
        .unwrap();
    assert_eq!(republished.id, stored_completion_id);
    assert_eq!(
        stream.last().unwrap().event_type,
        event_types::REQUEST_COMPLETED,
        "completion is the last event"
    );
    assert_eq!(harness.intake.status(PARTITION, ROW), Some(IntakeStatus::Pass));
}
