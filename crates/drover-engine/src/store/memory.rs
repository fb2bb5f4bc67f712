//! In-memory adapters for testing and local runs.
//!
//! Thread-safe via `RwLock`. Not suitable for production: nothing is
//! durable and the etag/lease semantics are simulated with counters.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use drover_core::RequestId;

use crate::error::{Error, Result};
use crate::events::FinalStatus;
use crate::external::{ExternalJobStatus, ExternalServiceClient, JobSubmission};
use crate::idempotency::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore};
use crate::intake::{IntakeKeys, IntakeRepository, IntakeRow, IntakeStatus};
use crate::projection::{ProjectionRepository, RequestProjection};
use crate::publish::{EventPublisher, IntegrationEvent};

fn poisoned() -> Error {
    drover_core::Error::internal("lock poisoned").into()
}

/// In-memory projection repository.
#[derive(Debug, Default)]
pub struct MemoryProjectionRepository {
    rows: RwLock<HashMap<RequestId, RequestProjection>>,
}

impl MemoryProjectionRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionRepository for MemoryProjectionRepository {
    async fn upsert(&self, projection: &RequestProjection) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        rows.insert(projection.request_id.clone(), projection.clone());
        Ok(())
    }

    async fn get(&self, request_id: &RequestId) -> Result<Option<RequestProjection>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(request_id).cloned())
    }

    async fn due_for_poll(
        &self,
        now: DateTime<Utc>,
        take: usize,
    ) -> Result<Vec<RequestProjection>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut due: Vec<RequestProjection> = rows
            .values()
            .filter(|p| p.is_due_for_poll(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_poll_at_utc
                .cmp(&b.next_poll_at_utc)
                .then_with(|| a.request_id.to_string().cmp(&b.request_id.to_string()))
        });
        due.truncate(take);
        Ok(due)
    }
}

#[derive(Debug, Clone)]
struct IntakeState {
    status: IntakeStatus,
    lease_until: DateTime<Utc>,
    etag: u64,
}

/// In-memory intake repository with simulated etag semantics.
#[derive(Debug, Default)]
pub struct MemoryIntakeRepository {
    rows: RwLock<HashMap<(String, String), IntakeState>>,
}

impl MemoryIntakeRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an unprocessed row that is immediately eligible.
    ///
    /// # Panics
    ///
    /// Panics if the store lock is poisoned (test-only type).
    pub fn insert_unprocessed(&self, partition_key: &str, row_key: &str) {
        let mut rows = self.rows.write().expect("lock poisoned");
        rows.insert(
            (partition_key.to_string(), row_key.to_string()),
            IntakeState {
                status: IntakeStatus::Unprocessed,
                lease_until: DateTime::<Utc>::MIN_UTC,
                etag: 1,
            },
        );
    }

    /// Returns the current status of a row, if present.
    ///
    /// # Panics
    ///
    /// Panics if the store lock is poisoned (test-only type).
    #[must_use]
    pub fn status(&self, partition_key: &str, row_key: &str) -> Option<IntakeStatus> {
        let rows = self.rows.read().expect("lock poisoned");
        rows.get(&(partition_key.to_string(), row_key.to_string()))
            .map(|state| state.status)
    }

    /// Forces a row's lease to expire at the given instant (test hook).
    ///
    /// # Panics
    ///
    /// Panics if the store lock is poisoned (test-only type).
    pub fn expire_lease(&self, partition_key: &str, row_key: &str, at: DateTime<Utc>) {
        let mut rows = self.rows.write().expect("lock poisoned");
        if let Some(state) = rows.get_mut(&(partition_key.to_string(), row_key.to_string())) {
            state.lease_until = at;
        }
    }

    fn row_from(keys: &(String, String), state: &IntakeState) -> IntakeRow {
        IntakeRow {
            partition_key: keys.0.clone(),
            row_key: keys.1.clone(),
            status: state.status,
            lease_until: state.lease_until,
            etag: state.etag.to_string(),
        }
    }
}

#[async_trait]
impl IntakeRepository for MemoryIntakeRepository {
    async fn available_unprocessed(
        &self,
        take: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<IntakeRow>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut eligible: Vec<IntakeRow> = rows
            .iter()
            .map(|(keys, state)| Self::row_from(keys, state))
            .filter(|row| row.is_eligible(now))
            .collect();
        eligible.sort_by(|a, b| {
            (a.partition_key.as_str(), a.row_key.as_str())
                .cmp(&(b.partition_key.as_str(), b.row_key.as_str()))
        });
        eligible.truncate(take);
        Ok(eligible)
    }

    async fn try_claim(&self, row: &IntakeRow, lease_until: DateTime<Utc>) -> Result<bool> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let key = (row.partition_key.clone(), row.row_key.clone());
        let Some(state) = rows.get_mut(&key) else {
            return Ok(false);
        };
        if state.etag.to_string() != row.etag {
            return Ok(false);
        }
        state.status = IntakeStatus::InProgress;
        state.lease_until = lease_until;
        state.etag += 1;
        Ok(true)
    }

    async fn mark_terminal(&self, keys: &IntakeKeys, status: FinalStatus) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let key = (keys.partition_key.clone(), keys.row_key.clone());
        let terminal = match status {
            FinalStatus::Pass => IntakeStatus::Pass,
            FinalStatus::Fail => IntakeStatus::Fail,
        };
        let state = rows.entry(key).or_insert(IntakeState {
            status: terminal,
            lease_until: DateTime::<Utc>::MIN_UTC,
            etag: 0,
        });
        state.status = terminal;
        state.etag += 1;
        Ok(())
    }
}

/// In-memory idempotency store with lease takeover.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: RwLock<HashMap<(String, String), IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for a trigger, if present.
    ///
    /// # Panics
    ///
    /// Panics if the store lock is poisoned (test-only type).
    #[must_use]
    pub fn record(&self, handler: &str, event_id: &str) -> Option<IdempotencyRecord> {
        let records = self.records.read().expect("lock poisoned");
        records
            .get(&(handler.to_string(), event_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn try_begin(
        &self,
        handler: &str,
        event_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let key = (handler.to_string(), event_id.to_string());

        match records.get(&key) {
            None => {
                records.insert(key, IdempotencyRecord::begin(handler, event_id, lease, now));
                Ok(true)
            }
            Some(existing) if existing.is_expired(now) => {
                tracing::warn!(
                    handler,
                    event_id,
                    lease_until = %existing.lease_until_utc,
                    "taking over expired idempotency lease"
                );
                records.insert(key, IdempotencyRecord::begin(handler, event_id, lease, now));
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        handler: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let key = (handler.to_string(), event_id.to_string());
        let record = records
            .entry(key)
            .or_insert_with(|| IdempotencyRecord::begin(handler, event_id, Duration::zero(), now));
        record.status = IdempotencyStatus::Completed;
        record.updated_utc = now;
        Ok(())
    }
}

/// In-memory publisher that records envelopes for assertions.
///
/// Supports fault injection: `fail_next(n)` makes the next `n` publishes
/// fail, which is how tests exercise the crash-after-append recovery path.
#[derive(Debug, Default)]
pub struct MemoryEventPublisher {
    events: RwLock<Vec<IntegrationEvent>>,
    fail_remaining: AtomicUsize,
}

impl MemoryEventPublisher {
    /// Creates an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all published envelopes in publish order.
    ///
    /// # Panics
    ///
    /// Panics if the publisher lock is poisoned (test-only type).
    #[must_use]
    pub fn published(&self) -> Vec<IntegrationEvent> {
        self.events.read().expect("lock poisoned").clone()
    }

    /// Drains the recorded envelopes.
    ///
    /// # Panics
    ///
    /// Panics if the publisher lock is poisoned (test-only type).
    pub fn drain(&self) -> Vec<IntegrationEvent> {
        std::mem::take(&mut *self.events.write().expect("lock poisoned"))
    }

    /// Makes the next `n` publish calls fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for MemoryEventPublisher {
    async fn publish(&self, event: &IntegrationEvent) -> Result<()> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::publish("injected publish failure"));
        }
        let mut events = self.events.write().map_err(|_| poisoned())?;
        events.push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    assigned: HashMap<(String, u32), String>,
    statuses: HashMap<String, VecDeque<ExternalJobStatus>>,
    next_job: u32,
    create_calls: usize,
    status_calls: usize,
}

/// Scripted stand-in for the external job service.
///
/// `create_job` is idempotent on `(request_id, attempt)` exactly as the
/// contract requires; statuses are scripted per job id and consumed in
/// order, defaulting to `Created` when the script runs dry.
#[derive(Debug, Default)]
pub struct ScriptedExternalService {
    state: RwLock<ScriptedState>,
}

impl ScriptedExternalService {
    /// Creates a service with no scripted statuses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a scripted status for a job id.
    ///
    /// # Panics
    ///
    /// Panics if the service lock is poisoned (test-only type).
    pub fn script_status(&self, job_id: &str, status: ExternalJobStatus) {
        let mut state = self.state.write().expect("lock poisoned");
        state
            .statuses
            .entry(job_id.to_string())
            .or_default()
            .push_back(status);
    }

    /// Number of `create_job` invocations (including idempotent replays).
    ///
    /// # Panics
    ///
    /// Panics if the service lock is poisoned (test-only type).
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.state.read().expect("lock poisoned").create_calls
    }

    /// Number of `get_status` invocations.
    ///
    /// # Panics
    ///
    /// Panics if the service lock is poisoned (test-only type).
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.state.read().expect("lock poisoned").status_calls
    }
}

#[async_trait]
impl ExternalServiceClient for ScriptedExternalService {
    async fn create_job(&self, request_id: &RequestId, attempt: u32) -> Result<JobSubmission> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.create_calls += 1;

        let key = (request_id.to_string(), attempt);
        if let Some(existing) = state.assigned.get(&key) {
            return Ok(JobSubmission {
                job_id: existing.clone(),
                status: ExternalJobStatus::Created,
            });
        }

        state.next_job += 1;
        let job_id = format!("J-{:03}", state.next_job);
        state.assigned.insert(key, job_id.clone());
        Ok(JobSubmission {
            job_id,
            status: ExternalJobStatus::Created,
        })
    }

    async fn get_status(&self, job_id: &str) -> Result<ExternalJobStatus> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.status_calls += 1;
        let status = state
            .statuses
            .get_mut(job_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ExternalJobStatus::Created);
        Ok(status)
    }
}
