//! Property-based tests for workflow engine invariants.
//!
//! These use proptest to verify invariants hold across randomly generated
//! inputs: deterministic id stability, replay independence of the
//! aggregate, reducer monotonicity, the poll-guard advance, and the
//! submission retry bound.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use drover_core::{
    EventToAppend, ManualClock, MemoryEventStore, RequestId, StoredEvent, deterministic_event_id,
};
use drover_engine::aggregate::RequestAggregate;
use drover_engine::config::EngineConfig;
use drover_engine::events::{
    JobPollRequested, JobSubmitted, JobTerminal, RequestDiscovered, SubmissionPrepared,
    TerminalStatus, event_types, payload_value,
};
use drover_engine::external::ExternalJobStatus;
use drover_engine::handlers::{DiscoverHandler, EventRouter, SchedulePollsHandler, WorkflowDeps};
use drover_engine::intake::IntakeStatus;
use drover_engine::projection::Reducer;
use drover_engine::store::{
    MemoryEventPublisher, MemoryIdempotencyStore, MemoryIntakeRepository,
    MemoryProjectionRepository, ScriptedExternalService,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap()
}

fn request_id() -> RequestId {
    RequestId::new("pA", "rK").unwrap()
}

fn stored(event_type: &str, data: serde_json::Value, version: u64) -> StoredEvent {
    EventToAppend::new(
        format!("evt-{version}"),
        event_type,
        t0() + Duration::minutes(i64::try_from(version).unwrap()),
        data,
    )
    .into_stored(version)
}

/// Builds a well-formed history: discovery, then `attempts` rounds of
/// prepared+submitted, optionally closed by a terminal event.
fn history(attempts: u32, terminal: Option<TerminalStatus>) -> Vec<StoredEvent> {
    let mut events = vec![stored(
        event_types::REQUEST_DISCOVERED,
        payload_value(&RequestDiscovered {
            request_id: request_id(),
            partition_key: "pA".into(),
            row_key: "rK".into(),
        })
        .unwrap(),
        1,
    )];
    let mut version = 1;

    for attempt in 1..=attempts {
        version += 1;
        events.push(stored(
            event_types::SUBMISSION_PREPARED,
            payload_value(&SubmissionPrepared {
                request_id: request_id(),
                partition_key: "pA".into(),
                row_key: "rK".into(),
                attempt,
            })
            .unwrap(),
            version,
        ));
        version += 1;
        events.push(stored(
            event_types::JOB_SUBMITTED,
            payload_value(&JobSubmitted {
                request_id: request_id(),
                partition_key: "pA".into(),
                row_key: "rK".into(),
                external_job_id: format!("J-{attempt:03}"),
                attempt,
            })
            .unwrap(),
            version,
        ));
    }

    if let Some(status) = terminal {
        version += 1;
        events.push(stored(
            event_types::JOB_TERMINAL,
            payload_value(&JobTerminal {
                request_id: request_id(),
                external_job_id: format!("J-{attempts:03}"),
                terminal_status: status,
                attempt: attempts.max(1),
            })
            .unwrap(),
            version,
        ));
    }

    events
}

fn arb_identifier() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._-]{1,24}"
}

fn arb_terminal() -> impl Strategy<Value = Option<TerminalStatus>> {
    prop_oneof![
        Just(None),
        Just(Some(TerminalStatus::Pass)),
        Just(Some(TerminalStatus::Fail)),
        Just(Some(TerminalStatus::FailCanRetry)),
    ]
}

proptest! {
    // Same inputs always produce the same id.
    #[test]
    fn deterministic_ids_are_stable(
        aggregate_id in arb_identifier(),
        event_type in arb_identifier(),
        correlation in proptest::option::of(arb_identifier()),
        causation in proptest::option::of(arb_identifier()),
        discriminator in proptest::option::of(arb_identifier()),
    ) {
        let first = deterministic_event_id(
            &aggregate_id,
            &event_type,
            correlation.as_deref(),
            causation.as_deref(),
            discriminator.as_deref(),
        ).unwrap();
        let second = deterministic_event_id(
            &aggregate_id,
            &event_type,
            correlation.as_deref(),
            causation.as_deref(),
            discriminator.as_deref(),
        ).unwrap();
        prop_assert_eq!(first, second);
    }

    // Differing discriminators yield distinct ids.
    #[test]
    fn discriminators_partition_the_id_space(
        aggregate_id in arb_identifier(),
        event_type in arb_identifier(),
        d1 in arb_identifier(),
        d2 in arb_identifier(),
    ) {
        prop_assume!(d1 != d2);
        let first = deterministic_event_id(&aggregate_id, &event_type, None, None, Some(&d1)).unwrap();
        let second = deterministic_event_id(&aggregate_id, &event_type, None, None, Some(&d2)).unwrap();
        prop_assert_ne!(first, second);
    }

    // Aggregate state is a function of the stream alone, not of input order.
    #[test]
    fn aggregate_replay_is_order_independent(
        attempts in 1u32..4,
        terminal in arb_terminal(),
        seed in any::<u64>(),
    ) {
        let canonical = history(attempts, terminal);
        let mut shuffled = canonical.clone();
        // Deterministic permutation derived from the seed.
        let mut state = seed;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            #[allow(clippy::cast_possible_truncation)]
            let j = (state % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }

        let from_canonical = RequestAggregate::rehydrate(request_id(), &canonical).unwrap();
        let from_shuffled = RequestAggregate::rehydrate(request_id(), &shuffled).unwrap();
        prop_assert_eq!(from_canonical, from_shuffled);
    }

    // Events at or below the applied version are no-ops.
    #[test]
    fn reducer_is_monotonic(
        attempts in 1u32..4,
        terminal in arb_terminal(),
        stale_index in 0usize..8,
    ) {
        let events = history(attempts, terminal);
        let reducer = Reducer::new(Duration::minutes(5));
        let projection = reducer.reduce(None, &events).unwrap().unwrap();

        let stale = &events[stale_index.min(events.len() - 1)];
        let unchanged = reducer.apply(Some(projection.clone()), stale).unwrap().unwrap();
        prop_assert_eq!(unchanged, projection);
    }

    // After reducing a poll request at time t, the guard reads t + interval.
    #[test]
    fn poll_guard_advances_by_the_interval(
        interval_minutes in 1i64..120,
        offset_minutes in 0i64..600,
    ) {
        let interval = Duration::minutes(interval_minutes);
        let reducer = Reducer::new(interval);

        let mut events = history(1, None);
        let occurred = t0() + Duration::minutes(offset_minutes);
        let poll = EventToAppend::new(
            "evt-poll",
            event_types::JOB_POLL_REQUESTED,
            occurred,
            payload_value(&JobPollRequested {
                request_id: request_id(),
                external_job_id: "J-001".into(),
                attempt: 1,
            })
            .unwrap(),
        )
        .into_stored(events.len() as u64 + 1);
        events.push(poll);

        let projection = reducer.reduce(None, &events).unwrap().unwrap();
        prop_assert_eq!(projection.next_poll_at_utc, Some(occurred + interval));
    }

    // No stream accumulates more distinct attempts than the budget allows.
    #[test]
    fn retry_bound_holds_across_budgets(
        max_submit_attempts in 1u32..4,
        extra_failures in 0u32..3,
    ) {
        tokio_test::block_on(async move {
            let config = EngineConfig {
                max_submit_attempts,
                ..EngineConfig::default()
            };
            let event_store = Arc::new(MemoryEventStore::new());
            let intake = Arc::new(MemoryIntakeRepository::new());
            let external = Arc::new(ScriptedExternalService::new());
            let publisher = Arc::new(MemoryEventPublisher::new());
            let clock = Arc::new(ManualClock::new(t0()));
            let deps = Arc::new(WorkflowDeps {
                event_store: Arc::clone(&event_store) as Arc<dyn drover_core::EventStore>,
                projections: Arc::new(MemoryProjectionRepository::new()),
                intake: Arc::clone(&intake) as Arc<dyn drover_engine::intake::IntakeRepository>,
                idempotency: Arc::new(MemoryIdempotencyStore::new()),
                external: Arc::clone(&external) as Arc<dyn drover_engine::external::ExternalServiceClient>,
                publisher: Arc::clone(&publisher) as Arc<dyn drover_engine::publish::EventPublisher>,
                clock: Arc::clone(&clock) as Arc<dyn drover_core::Clock>,
                config,
            });
            let router = EventRouter::new(Arc::clone(&deps));
            let discover = DiscoverHandler::new(Arc::clone(&deps));
            let scheduler = SchedulePollsHandler::new(Arc::clone(&deps));

            intake.insert_unprocessed("pA", "rK");
            // Every attempt the budget allows fails retryably, and then some.
            for job in 1..=(max_submit_attempts + extra_failures) {
                external.script_status(&format!("J-{job:03}"), ExternalJobStatus::FailCanRetry);
            }

            discover.run().await.unwrap();
            let mut idle_ticks = 0;
            loop {
                let batch = publisher.drain();
                if !batch.is_empty() {
                    for event in batch {
                        router.dispatch(&event).await.unwrap();
                    }
                    continue;
                }
                if matches!(
                    intake.status("pA", "rK"),
                    Some(IntakeStatus::Pass | IntakeStatus::Fail)
                ) {
                    break;
                }
                clock.advance(Duration::minutes(5));
                let summary = scheduler.run().await.unwrap();
                if summary.scheduled == 0 {
                    idle_ticks += 1;
                    assert!(idle_ticks < 5, "workflow stalled without reaching a terminal row");
                } else {
                    idle_ticks = 0;
                }
            }

            use drover_core::EventStore;
            let stream = event_store.read_stream("pA|rK").await.unwrap();
            let attempts: std::collections::BTreeSet<u32> = stream
                .iter()
                .filter(|e| {
                    e.event_type == event_types::SUBMISSION_PREPARED
                        || e.event_type == event_types::JOB_SUBMITTED
                })
                .map(|e| e.data["attempt"].as_u64().unwrap() as u32)
                .collect();

            assert!(
                attempts.len() <= max_submit_attempts as usize,
                "stream used {} distinct attempts with a budget of {max_submit_attempts}",
                attempts.len()
            );
            // Exhaustion always lands on a terminal Fail row.
            assert_eq!(intake.status("pA", "rK"), Some(IntakeStatus::Fail));
        });
    }
}
