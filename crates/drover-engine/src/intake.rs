//! Intake store contract.
//!
//! The intake store owns the work-item rows that seed workflows. The engine
//! touches it in exactly three ways: list eligible rows, claim a row under
//! an etag-conditional lease, and force-write the terminal outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drover_core::{Error, RequestId, Result as CoreResult};

use crate::error::Result;
use crate::events::FinalStatus;

/// Processing status of an intake row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeStatus {
    /// Never claimed.
    Unprocessed,
    /// Claimed under a lease.
    InProgress,
    /// Finished successfully.
    Pass,
    /// Finished unsuccessfully.
    Fail,
}

/// The pair of keys addressing one intake row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeKeys {
    /// Partition key.
    pub partition_key: String,
    /// Row key.
    pub row_key: String,
}

impl IntakeKeys {
    /// Creates a key pair.
    #[must_use]
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }

    /// Builds the canonical workflow identifier for these keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidId` when either key is empty or contains the
    /// separator.
    pub fn request_id(&self) -> CoreResult<RequestId> {
        RequestId::new(&self.partition_key, &self.row_key)
    }
}

impl From<&RequestId> for IntakeKeys {
    fn from(id: &RequestId) -> Self {
        Self::new(id.partition_key(), id.row_key())
    }
}

/// A work item in the intake store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRow {
    /// Partition key.
    pub partition_key: String,
    /// Row key.
    pub row_key: String,
    /// Current processing status.
    pub status: IntakeStatus,
    /// Instant until which the current claim is leased.
    pub lease_until: DateTime<Utc>,
    /// Opaque concurrency token for conditional updates.
    pub etag: String,
}

impl IntakeRow {
    /// Returns true when this row may be claimed at `now`.
    ///
    /// Eligible rows are `Unprocessed`, or `InProgress` with an expired
    /// lease.
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            IntakeStatus::Unprocessed | IntakeStatus::InProgress
        ) && self.lease_until <= now
    }

    /// Returns the keys addressing this row.
    #[must_use]
    pub fn keys(&self) -> IntakeKeys {
        IntakeKeys::new(&self.partition_key, &self.row_key)
    }

    /// Builds the canonical workflow identifier for this row.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidId` when the keys are not representable.
    pub fn request_id(&self) -> std::result::Result<RequestId, Error> {
        RequestId::new(&self.partition_key, &self.row_key)
    }
}

/// Contract over the external intake store.
#[async_trait]
pub trait IntakeRepository: Send + Sync {
    /// Returns up to `take` rows eligible for claiming at `now`.
    async fn available_unprocessed(
        &self,
        take: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<IntakeRow>>;

    /// Attempts an etag-conditional claim, transitioning the row to
    /// `InProgress` with the given lease.
    ///
    /// Returns `false` when the row changed since it was read (someone else
    /// claimed it) or is no longer eligible.
    async fn try_claim(&self, row: &IntakeRow, lease_until: DateTime<Utc>) -> Result<bool>;

    /// Writes the terminal status unconditionally ("force").
    ///
    /// Idempotent: overwriting an already-terminal row with the same status
    /// is a no-op.
    async fn mark_terminal(&self, keys: &IntakeKeys, status: FinalStatus) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(status: IntakeStatus, lease_until: DateTime<Utc>) -> IntakeRow {
        IntakeRow {
            partition_key: "pA".into(),
            row_key: "rK".into(),
            status,
            lease_until,
            etag: "1".into(),
        }
    }

    #[test]
    fn eligibility_requires_expired_lease() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap();
        let past = now - chrono::Duration::minutes(1);
        let future = now + chrono::Duration::minutes(1);

        assert!(row(IntakeStatus::Unprocessed, past).is_eligible(now));
        assert!(row(IntakeStatus::InProgress, past).is_eligible(now));
        assert!(!row(IntakeStatus::InProgress, future).is_eligible(now));
        assert!(!row(IntakeStatus::Pass, past).is_eligible(now));
        assert!(!row(IntakeStatus::Fail, past).is_eligible(now));
    }

    #[test]
    fn keys_roundtrip_through_request_id() {
        let keys = IntakeKeys::new("pA", "rK");
        let id = keys.request_id().unwrap();
        assert_eq!(IntakeKeys::from(&id), keys);
    }
}
