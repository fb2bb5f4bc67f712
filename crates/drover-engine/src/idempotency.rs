//! Durable idempotency leases for bus-triggered handlers.
//!
//! The bus delivers at-least-once; each bus-triggered handler begins a
//! lease keyed on `(handler name, triggering event id)` before doing any
//! work. A record moves through `∅ → InProgress(lease) → Completed`; an
//! expired `InProgress` lease may be taken over by another worker, which
//! covers crashes between append and publish.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Status of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyStatus {
    /// The trigger is being processed under a lease.
    InProgress,
    /// The trigger was fully processed (including publish).
    Completed,
}

/// One processing record, partitioned by handler name and keyed by the
/// triggering event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    /// Handler that owns this record.
    pub handler_name: String,
    /// Triggering event id.
    pub event_id: String,
    /// Current status.
    pub status: IdempotencyStatus,
    /// Instant until which the in-progress lease is held.
    pub lease_until_utc: DateTime<Utc>,
    /// Last modification instant.
    pub updated_utc: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates a fresh in-progress record leased until `now + lease`.
    #[must_use]
    pub fn begin(
        handler_name: impl Into<String>,
        event_id: impl Into<String>,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            handler_name: handler_name.into(),
            event_id: event_id.into(),
            status: IdempotencyStatus::InProgress,
            lease_until_utc: now + lease,
            updated_utc: now,
        }
    }

    /// Returns true when the in-progress lease has expired and may be
    /// taken over.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == IdempotencyStatus::InProgress && self.lease_until_utc <= now
    }
}

/// Contract over the idempotency store.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Attempts to begin processing a trigger.
    ///
    /// Returns `true` when the caller holds the lease (fresh record, or
    /// takeover of an expired one). Returns `false` when the trigger is
    /// already completed or another worker holds an unexpired lease; in
    /// both cases the caller skips silently.
    async fn try_begin(
        &self,
        handler: &str,
        event_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Marks the trigger as fully processed.
    async fn mark_completed(&self, handler: &str, event_id: &str, now: DateTime<Utc>)
        -> Result<()>;
}
