//! Local single-process engine runner.
//!
//! Wires the engine against the in-memory adapters with an in-process bus
//! loop standing in for the external message broker. Useful for demos and
//! for exercising the full handler chain without any cloud dependency:
//! seed rows via `DROVER_SEED_ROWS`, watch the log, ctrl-c to stop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use drover_core::observability::{LogFormat, init_logging};
use drover_core::SystemClock;
use drover_engine::config::EngineConfig;
use drover_engine::error::Result;
use drover_engine::handlers::{EventRouter, WorkflowDeps};
use drover_engine::runtime::EngineRuntime;
use drover_engine::store::{
    MemoryEventPublisher, MemoryIdempotencyStore, MemoryIntakeRepository,
    MemoryProjectionRepository, ScriptedExternalService,
};

fn log_format_from_env() -> LogFormat {
    match std::env::var("DROVER_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

/// Seeds intake rows from `DROVER_SEED_ROWS` (`pk1|rk1,pk2|rk2,...`).
fn seed_intake(intake: &MemoryIntakeRepository) {
    let Ok(rows) = std::env::var("DROVER_SEED_ROWS") else {
        return;
    };
    for spec in rows.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match spec.parse::<drover_core::RequestId>() {
            Ok(id) => {
                intake.insert_unprocessed(id.partition_key(), id.row_key());
                tracing::info!(request_id = %id, "seeded intake row");
            }
            Err(error) => tracing::warn!(row = spec, %error, "ignoring malformed seed row"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(log_format_from_env());

    let config = EngineConfig::from_env()?;
    tracing::info!(?config, "starting local engine");

    let intake = Arc::new(MemoryIntakeRepository::new());
    seed_intake(&intake);
    let publisher = Arc::new(MemoryEventPublisher::new());

    let deps = Arc::new(WorkflowDeps {
        event_store: Arc::new(drover_core::MemoryEventStore::new()),
        projections: Arc::new(MemoryProjectionRepository::new()),
        intake,
        idempotency: Arc::new(MemoryIdempotencyStore::new()),
        external: Arc::new(ScriptedExternalService::new()),
        publisher: Arc::clone(&publisher) as Arc<dyn drover_engine::publish::EventPublisher>,
        clock: Arc::new(SystemClock),
        config,
    });

    let shutdown = CancellationToken::new();

    // In-process stand-in for the message bus: drain published events and
    // route them back into the bus-triggered handlers.
    let bus = {
        let router = EventRouter::new(Arc::clone(&deps));
        let publisher = Arc::clone(&publisher);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_millis(200));
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = tick.tick() => {
                        for event in publisher.drain() {
                            if let Err(error) = router.dispatch(&event).await {
                                tracing::error!(event_id = %event.id, %error, "dispatch failed");
                            }
                        }
                    }
                }
            }
        })
    };

    let runtime = EngineRuntime::new(deps);
    tokio::select! {
        () = runtime.run(shutdown.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received; shutting down");
            shutdown.cancel();
        }
    }

    let _ = bus.await;
    Ok(())
}
