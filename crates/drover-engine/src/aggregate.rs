//! Aggregate reconstruction for one workflow stream.
//!
//! [`RequestAggregate::rehydrate`] is a pure fold: sort the history by
//! version ascending, apply each catalog event, ignore everything else.
//! Status is monotonic toward the terminal states; a `FailCanRetry`
//! terminal payload is not terminal for the aggregate and leaves status
//! unchanged.

use std::collections::BTreeSet;

use drover_core::{RequestId, StoredEvent};

use crate::error::Result;
use crate::events::{TerminalStatus, WorkflowEvent};
use crate::intake::IntakeKeys;

/// Workflow status as derived from the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemStatus {
    /// No discovery event has been applied yet.
    Pending,
    /// The item is being worked.
    InProgress,
    /// The item passed.
    Pass,
    /// The item failed.
    Fail,
}

impl WorkItemStatus {
    /// Returns true for the final, irrevocable statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Pass | Self::Fail)
    }
}

/// In-memory reconstruction of a single workflow's state.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestAggregate {
    /// Canonical workflow identifier (the stream id).
    pub request_id: RequestId,
    /// Intake keys, once a discovery event has been applied.
    pub keys: Option<IntakeKeys>,
    /// Derived workflow status.
    pub status: WorkItemStatus,
    /// Highest attempt number across submitted events (0 if none).
    pub submit_attempt_count: u32,
    /// Job id of the most recent submission, if any.
    pub external_job_id: Option<String>,
    /// Max event version seen in the stream (0 for an empty stream).
    pub version: u64,
    prepared_attempts: BTreeSet<u32>,
    submitted_attempts: BTreeSet<u32>,
}

impl RequestAggregate {
    /// Replays a stream into aggregate state.
    ///
    /// Events are applied in ascending version order regardless of input
    /// order; non-catalog event types are ignored.
    ///
    /// # Errors
    ///
    /// Returns an internal error when a catalog event carries a corrupt
    /// payload.
    pub fn rehydrate(request_id: RequestId, history: &[StoredEvent]) -> Result<Self> {
        let mut aggregate = Self {
            request_id,
            keys: None,
            status: WorkItemStatus::Pending,
            submit_attempt_count: 0,
            external_job_id: None,
            version: 0,
            prepared_attempts: BTreeSet::new(),
            submitted_attempts: BTreeSet::new(),
        };

        let mut ordered: Vec<&StoredEvent> = history.iter().collect();
        ordered.sort_by_key(|e| e.version);

        for stored in ordered {
            aggregate.version = aggregate.version.max(stored.version);
            let Some(event) = WorkflowEvent::decode(stored)? else {
                continue;
            };
            aggregate.apply(&event);
        }

        Ok(aggregate)
    }

    fn apply(&mut self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::Discovered(payload) => {
                self.keys = Some(IntakeKeys::new(&payload.partition_key, &payload.row_key));
                self.status = WorkItemStatus::InProgress;
            }
            WorkflowEvent::Prepared(payload) => {
                self.prepared_attempts.insert(payload.attempt);
            }
            WorkflowEvent::Submitted(payload) => {
                self.submitted_attempts.insert(payload.attempt);
                self.submit_attempt_count = self.submit_attempt_count.max(payload.attempt);
                self.external_job_id = Some(payload.external_job_id.clone());
                self.status = WorkItemStatus::InProgress;
            }
            WorkflowEvent::PollRequested(_) => {}
            WorkflowEvent::Terminal(payload) => match payload.terminal_status {
                TerminalStatus::Pass => self.status = WorkItemStatus::Pass,
                TerminalStatus::Fail => self.status = WorkItemStatus::Fail,
                // Not terminal for the aggregate.
                TerminalStatus::FailCanRetry => {}
            },
            WorkflowEvent::Completed(payload) => {
                self.status = match payload.final_status {
                    crate::events::FinalStatus::Pass => WorkItemStatus::Pass,
                    crate::events::FinalStatus::Fail => WorkItemStatus::Fail,
                };
            }
        }
    }

    /// Returns true when a `submission.prepared.v1` with this attempt is in
    /// the stream.
    #[must_use]
    pub fn has_prepared(&self, attempt: u32) -> bool {
        self.prepared_attempts.contains(&attempt)
    }

    /// Returns true when a `job.submitted.v1` with this attempt is in the
    /// stream.
    #[must_use]
    pub fn has_submitted(&self, attempt: u32) -> bool {
        self.submitted_attempts.contains(&attempt)
    }

    /// Returns true once the item has reached `Pass` or `Fail`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
