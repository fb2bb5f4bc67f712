//! Contract over the external asynchronous job service.
//!
//! The engine only ever creates jobs and asks for their status. The
//! service is required to be idempotent on `(request_id, attempt)`: calling
//! `create_job` again with the same pair returns the same job id, which is
//! what makes "call external before append" crash-safe.

use async_trait::async_trait;
use std::fmt;

use drover_core::RequestId;

use crate::error::Result;

/// Status of a job as reported by the external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalJobStatus {
    /// The job was accepted but has not started.
    Created,
    /// The job is running.
    Inprogress,
    /// The job succeeded.
    Pass,
    /// The job failed permanently.
    Fail,
    /// The job failed but a fresh submission may succeed.
    FailCanRetry,
    /// The service reported a status this engine does not recognize.
    ///
    /// Coerced to a terminal `Fail` by the poll handler (with a warning).
    Unknown,
}

impl ExternalJobStatus {
    /// Returns true while the job is still running remotely.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Created | Self::Inprogress)
    }
}

impl fmt::Display for ExternalJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "Created",
            Self::Inprogress => "Inprogress",
            Self::Pass => "Pass",
            Self::Fail => "Fail",
            Self::FailCanRetry => "FailCanRetry",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Result of submitting a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    /// Identifier assigned by the external service.
    pub job_id: String,
    /// Status at submission time.
    pub status: ExternalJobStatus,
}

/// Contract over the external job service.
#[async_trait]
pub trait ExternalServiceClient: Send + Sync {
    /// Creates (or re-fetches) the job for `(request_id, attempt)`.
    ///
    /// Must be idempotent on that pair: a retry of the same attempt
    /// returns the same job id.
    async fn create_job(&self, request_id: &RequestId, attempt: u32) -> Result<JobSubmission>;

    /// Fetches the current status of a job.
    async fn get_status(&self, job_id: &str) -> Result<ExternalJobStatus>;
}
