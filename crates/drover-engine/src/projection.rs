//! The "due for polling" read model and its reducer.
//!
//! The projection is derived, rebuildable state: every successful handler
//! pass re-reads the stream and folds it over the persisted row. The
//! reducer is monotonic on `last_applied_event_version`, so replays and
//! racing handlers cannot clobber newer state with older state.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use drover_core::{RequestId, StoredEvent};

use crate::error::Result;
use crate::events::{FinalStatus, TerminalStatus, WorkflowEvent};

/// Serializable projection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionStatus {
    /// The item is being worked.
    InProgress,
    /// The item passed.
    Pass,
    /// The item failed.
    Fail,
}

impl ProjectionStatus {
    /// Returns true for the final statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Pass | Self::Fail)
    }
}

/// Read model row for one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestProjection {
    /// Canonical workflow identifier (also the document id).
    pub request_id: RequestId,
    /// Intake partition key.
    pub partition_key: String,
    /// Intake row key.
    pub row_key: String,
    /// Derived workflow status.
    pub status: ProjectionStatus,
    /// Highest submission attempt observed.
    pub submit_attempt_count: u32,
    /// When the item should next be polled; unset when nothing is due.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_poll_at_utc: Option<DateTime<Utc>>,
    /// Job id of the most recent submission, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_job_id: Option<String>,
    /// Version of the last stream event folded into this row.
    pub last_applied_event_version: u64,
    /// Occurred-time of the last folded event.
    pub updated_utc: DateTime<Utc>,
}

impl RequestProjection {
    /// Returns true when this row should be offered to the poll scheduler
    /// at `now`.
    #[must_use]
    pub fn is_due_for_poll(&self, now: DateTime<Utc>) -> bool {
        self.status == ProjectionStatus::InProgress
            && self.next_poll_at_utc.is_some_and(|due| due <= now)
    }
}

/// Contract over the projection store.
#[async_trait]
pub trait ProjectionRepository: Send + Sync {
    /// Inserts or replaces a projection row (last writer wins).
    async fn upsert(&self, projection: &RequestProjection) -> Result<()>;

    /// Fetches the projection for one work item.
    async fn get(&self, request_id: &RequestId) -> Result<Option<RequestProjection>>;

    /// Returns up to `take` rows due for polling at `now`.
    async fn due_for_poll(
        &self,
        now: DateTime<Utc>,
        take: usize,
    ) -> Result<Vec<RequestProjection>>;
}

/// Pure state machine folding stream events into the read model.
#[derive(Debug, Clone)]
pub struct Reducer {
    poll_interval: Duration,
}

impl Reducer {
    /// Creates a reducer that advances `next_poll_at_utc` by
    /// `poll_interval`.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Folds a whole stream over the current row.
    ///
    /// Events are applied in ascending version order; events at or below
    /// the row's `last_applied_event_version` are no-ops, so re-reducing a
    /// full stream over an up-to-date row changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an internal error when a catalog event carries a corrupt
    /// payload.
    pub fn reduce(
        &self,
        current: Option<RequestProjection>,
        events: &[StoredEvent],
    ) -> Result<Option<RequestProjection>> {
        let mut ordered: Vec<&StoredEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.version);

        let mut state = current;
        for event in ordered {
            state = self.apply(state, event)?;
        }
        Ok(state)
    }

    /// Applies a single event to the current row.
    ///
    /// # Errors
    ///
    /// Returns an internal error when a catalog event carries a corrupt
    /// payload.
    pub fn apply(
        &self,
        current: Option<RequestProjection>,
        event: &StoredEvent,
    ) -> Result<Option<RequestProjection>> {
        if let Some(projection) = &current {
            if event.version <= projection.last_applied_event_version {
                return Ok(current);
            }
        }

        let Some(decoded) = WorkflowEvent::decode(event)? else {
            return Ok(current);
        };

        let mut projection = match (current, decoded) {
            (_, WorkflowEvent::Discovered(payload)) => RequestProjection {
                request_id: payload.request_id,
                partition_key: payload.partition_key,
                row_key: payload.row_key,
                status: ProjectionStatus::InProgress,
                submit_attempt_count: 0,
                next_poll_at_utc: None,
                external_job_id: None,
                last_applied_event_version: 0,
                updated_utc: event.occurred_utc,
            },
            // A non-discovery event with no row to fold over: the stream is
            // always reduced from version 1, so this only happens for
            // partial replays. Ignore rather than invent a row.
            (None, _) => return Ok(None),
            (Some(mut projection), decoded) => {
                match decoded {
                    WorkflowEvent::Discovered(_) => unreachable!("handled above"),
                    WorkflowEvent::Prepared(payload) => {
                        // A new attempt cycle clears the previous job.
                        if payload.attempt > projection.submit_attempt_count {
                            projection.external_job_id = None;
                            projection.next_poll_at_utc = None;
                        }
                    }
                    WorkflowEvent::Submitted(payload) => {
                        projection.external_job_id = Some(payload.external_job_id);
                        projection.next_poll_at_utc =
                            Some(event.occurred_utc + self.poll_interval);
                        projection.submit_attempt_count =
                            projection.submit_attempt_count.max(payload.attempt);
                    }
                    WorkflowEvent::PollRequested(_) => {
                        // The guard that prevents re-selection within one
                        // interval.
                        projection.next_poll_at_utc =
                            Some(event.occurred_utc + self.poll_interval);
                    }
                    WorkflowEvent::Terminal(payload) => {
                        projection.status = match payload.terminal_status {
                            TerminalStatus::Pass => ProjectionStatus::Pass,
                            // A terminal FailCanRetry indicates a producer
                            // bug; coerce so the read model cannot wedge.
                            TerminalStatus::Fail | TerminalStatus::FailCanRetry => {
                                ProjectionStatus::Fail
                            }
                        };
                        projection.next_poll_at_utc = None;
                    }
                    WorkflowEvent::Completed(payload) => {
                        projection.status = match payload.final_status {
                            FinalStatus::Pass => ProjectionStatus::Pass,
                            FinalStatus::Fail => ProjectionStatus::Fail,
                        };
                        projection.next_poll_at_utc = None;
                    }
                }
                projection
            }
        };

        projection.last_applied_event_version = event.version;
        projection.updated_utc = event.occurred_utc;
        Ok(Some(projection))
    }
}
