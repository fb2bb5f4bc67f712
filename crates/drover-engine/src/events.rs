//! Workflow event catalog.
//!
//! Six versioned event types describe the life of one work item. Stored
//! events carry their payload as opaque JSON; consumers filter by
//! `event_type` first and deserialize on demand, so the event store never
//! couples to this closed set.
//!
//! [`WorkflowEvent`] is the closed sum used by the aggregate fold and the
//! projection reducer. Unknown event types decode to `None` and are
//! ignored there; a known type whose payload no longer deserializes is a
//! corrupt stream and surfaces as a fatal internal error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use drover_core::{RequestId, StoredEvent};

use crate::error::Result;

/// Event type identifiers, versioned for forward compatibility.
pub mod event_types {
    /// An intake row was claimed and its workflow stream opened.
    pub const REQUEST_DISCOVERED: &str = "request.discovered.v1";
    /// A submission attempt was prepared.
    pub const SUBMISSION_PREPARED: &str = "submission.prepared.v1";
    /// A job was submitted to the external service.
    pub const JOB_SUBMITTED: &str = "job.submitted.v1";
    /// A poll of the external job was requested.
    pub const JOB_POLL_REQUESTED: &str = "job.pollrequested.v1";
    /// The external job reached a terminal status.
    pub const JOB_TERMINAL: &str = "job.terminal.v1";
    /// The work item was finalized in the intake store.
    pub const REQUEST_COMPLETED: &str = "request.completed.v1";
}

/// Terminal status reported for an external job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    /// The job succeeded.
    Pass,
    /// The job failed permanently.
    Fail,
    /// The job failed but may be retried with a fresh submission.
    ///
    /// Not terminal for the aggregate; the poll handler either retries or
    /// coerces it to `Fail` when the attempt budget is spent.
    FailCanRetry,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "Pass"),
            Self::Fail => write!(f, "Fail"),
            Self::FailCanRetry => write!(f, "FailCanRetry"),
        }
    }
}

/// Final, irrevocable outcome written back to the intake store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalStatus {
    /// The work item passed.
    Pass,
    /// The work item failed.
    Fail,
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "Pass"),
            Self::Fail => write!(f, "Fail"),
        }
    }
}

/// Payload of `request.discovered.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDiscovered {
    /// Canonical workflow identifier.
    pub request_id: RequestId,
    /// Intake partition key.
    pub partition_key: String,
    /// Intake row key.
    pub row_key: String,
}

/// Payload of `submission.prepared.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPrepared {
    /// Canonical workflow identifier.
    pub request_id: RequestId,
    /// Intake partition key.
    pub partition_key: String,
    /// Intake row key.
    pub row_key: String,
    /// 1-based submission attempt this preparation opens.
    pub attempt: u32,
}

/// Payload of `job.submitted.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmitted {
    /// Canonical workflow identifier.
    pub request_id: RequestId,
    /// Intake partition key.
    pub partition_key: String,
    /// Intake row key.
    pub row_key: String,
    /// Identifier assigned by the external service.
    pub external_job_id: String,
    /// Submission attempt this job belongs to.
    pub attempt: u32,
}

/// Payload of `job.pollrequested.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPollRequested {
    /// Canonical workflow identifier.
    pub request_id: RequestId,
    /// Identifier of the job to poll.
    pub external_job_id: String,
    /// Submission attempt the job belongs to.
    pub attempt: u32,
}

/// Payload of `job.terminal.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTerminal {
    /// Canonical workflow identifier.
    pub request_id: RequestId,
    /// Identifier of the finished job.
    pub external_job_id: String,
    /// Outcome reported by the external service.
    pub terminal_status: TerminalStatus,
    /// Submission attempt the job belonged to.
    pub attempt: u32,
}

/// Payload of `request.completed.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCompleted {
    /// Canonical workflow identifier.
    pub request_id: RequestId,
    /// Outcome written back to the intake store.
    pub final_status: FinalStatus,
}

/// The closed sum over the workflow event catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// `request.discovered.v1`
    Discovered(RequestDiscovered),
    /// `submission.prepared.v1`
    Prepared(SubmissionPrepared),
    /// `job.submitted.v1`
    Submitted(JobSubmitted),
    /// `job.pollrequested.v1`
    PollRequested(JobPollRequested),
    /// `job.terminal.v1`
    Terminal(JobTerminal),
    /// `request.completed.v1`
    Completed(RequestCompleted),
}

impl WorkflowEvent {
    /// Decodes a stored event into the closed sum.
    ///
    /// Returns `Ok(None)` for event types outside the catalog; those are
    /// ignored by the aggregate and the reducer (the handler layer logs
    /// them).
    ///
    /// # Errors
    ///
    /// Returns an internal error when a known event type carries a payload
    /// that no longer deserializes: the stream is corrupt and requires
    /// operator intervention.
    pub fn decode(stored: &StoredEvent) -> Result<Option<Self>> {
        let decoded = match stored.event_type.as_str() {
            event_types::REQUEST_DISCOVERED => Self::Discovered(payload_of(stored)?),
            event_types::SUBMISSION_PREPARED => Self::Prepared(payload_of(stored)?),
            event_types::JOB_SUBMITTED => Self::Submitted(payload_of(stored)?),
            event_types::JOB_POLL_REQUESTED => Self::PollRequested(payload_of(stored)?),
            event_types::JOB_TERMINAL => Self::Terminal(payload_of(stored)?),
            event_types::REQUEST_COMPLETED => Self::Completed(payload_of(stored)?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    /// Returns the catalog type string for this event.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Discovered(_) => event_types::REQUEST_DISCOVERED,
            Self::Prepared(_) => event_types::SUBMISSION_PREPARED,
            Self::Submitted(_) => event_types::JOB_SUBMITTED,
            Self::PollRequested(_) => event_types::JOB_POLL_REQUESTED,
            Self::Terminal(_) => event_types::JOB_TERMINAL,
            Self::Completed(_) => event_types::REQUEST_COMPLETED,
        }
    }
}

fn payload_of<T: serde::de::DeserializeOwned>(stored: &StoredEvent) -> Result<T> {
    serde_json::from_value(stored.data.clone()).map_err(|e| {
        drover_core::Error::internal(format!(
            "stored event '{}' ({}) has an undecodable payload: {e}",
            stored.event_id, stored.event_type
        ))
        .into()
    })
}

/// Serializes a payload record into the opaque JSON carried by a stored
/// event.
///
/// # Errors
///
/// Returns a serialization error when the payload cannot be represented as
/// JSON.
pub fn payload_value<T: Serialize>(payload: &T) -> Result<Value> {
    serde_json::to_value(payload).map_err(|e| {
        drover_core::Error::Serialization {
            message: format!("failed to serialize event payload: {e}"),
        }
        .into()
    })
}

/// Finds the most recent `submission.prepared.v1` for the given attempt.
///
/// # Errors
///
/// Returns an internal error when a stored prepared payload is corrupt.
pub fn find_prepared(stream: &[StoredEvent], attempt: u32) -> Result<Option<&StoredEvent>> {
    find_last_matching(stream, event_types::SUBMISSION_PREPARED, |p: &SubmissionPrepared| {
        p.attempt == attempt
    })
}

/// Finds the most recent `job.submitted.v1` for the given attempt.
///
/// # Errors
///
/// Returns an internal error when a stored submitted payload is corrupt.
pub fn find_submitted(stream: &[StoredEvent], attempt: u32) -> Result<Option<&StoredEvent>> {
    find_last_matching(stream, event_types::JOB_SUBMITTED, |p: &JobSubmitted| {
        p.attempt == attempt
    })
}

/// Finds the stored `job.terminal.v1`, if any.
#[must_use]
pub fn find_terminal(stream: &[StoredEvent]) -> Option<&StoredEvent> {
    stream
        .iter()
        .rev()
        .find(|e| e.event_type == event_types::JOB_TERMINAL)
}

/// Finds the stored `request.completed.v1`, if any.
#[must_use]
pub fn find_completed(stream: &[StoredEvent]) -> Option<&StoredEvent> {
    stream
        .iter()
        .rev()
        .find(|e| e.event_type == event_types::REQUEST_COMPLETED)
}

fn find_last_matching<'a, T, F>(
    stream: &'a [StoredEvent],
    event_type: &str,
    predicate: F,
) -> Result<Option<&'a StoredEvent>>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&T) -> bool,
{
    for stored in stream.iter().rev() {
        if stored.event_type != event_type {
            continue;
        }
        let payload: T = payload_of(stored)?;
        if predicate(&payload) {
            return Ok(Some(stored));
        }
    }
    Ok(None)
}
