//! The append-only event store contract and its in-memory implementation.
//!
//! Streams are partitioned by aggregate id; concurrent writers to distinct
//! streams are isolated. Within a stream, an append is atomic: the
//! optimistic version check, the duplicate-id check, and the insertion of
//! all events succeed or fail together.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::event::{EventToAppend, StoredEvent};

/// Append-only event store, partitioned by aggregate id.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one or more events to a stream, returning the new stream
    /// version.
    ///
    /// `expected_version` semantics:
    /// - `Some(0)`: the stream must not exist yet
    /// - `Some(v)`: the stream must currently be at version `v`
    /// - `None`: append unconditionally
    ///
    /// # Errors
    ///
    /// Returns `Error::Concurrency` when the expected version does not
    /// match the current stream version or when an event id already exists
    /// within the stream. Returns `Error::Validation` when `events` is
    /// empty.
    async fn append(
        &self,
        aggregate_id: &str,
        events: &[EventToAppend],
        expected_version: Option<u64>,
    ) -> Result<u64>;

    /// Reads a full stream ordered by version ascending.
    ///
    /// A stream that was never written to reads as empty.
    async fn read_stream(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>>;
}

/// In-memory event store for testing and local runs.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    streams: Arc<RwLock<HashMap<String, Stream>>>,
}

#[derive(Debug, Default)]
struct Stream {
    events: Vec<StoredEvent>,
    event_ids: HashSet<String>,
}

impl MemoryEventStore {
    /// Creates a new empty event store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current version of a stream (0 when absent).
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn stream_version(&self, aggregate_id: &str) -> Result<u64> {
        let streams = self.streams.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(streams
            .get(aggregate_id)
            .map(|s| s.events.len() as u64)
            .unwrap_or_default())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        aggregate_id: &str,
        events: &[EventToAppend],
        expected_version: Option<u64>,
    ) -> Result<u64> {
        if events.is_empty() {
            return Err(Error::Validation(
                "append requires at least one event".to_string(),
            ));
        }

        let mut streams = self.streams.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let stream = streams.entry(aggregate_id.to_string()).or_default();
        let current = stream.events.len() as u64;

        if let Some(expected) = expected_version {
            if expected != current {
                return Err(Error::concurrency(format!(
                    "stream '{aggregate_id}' at version {current}, expected {expected}"
                )));
            }
        }

        // Validate the whole batch before mutating so a failure rolls back
        // the entire append.
        let mut batch_ids: HashSet<&str> = HashSet::new();
        for event in events {
            if stream.event_ids.contains(&event.event_id) || !batch_ids.insert(&event.event_id) {
                return Err(Error::concurrency(format!(
                    "duplicate event id '{}' in stream '{aggregate_id}'",
                    event.event_id
                )));
            }
        }

        let mut version = current;
        for event in events {
            version += 1;
            stream.event_ids.insert(event.event_id.clone());
            stream.events.push(event.clone().into_stored(version));
        }

        Ok(version)
    }

    async fn read_stream(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>> {
        let streams = self.streams.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(streams
            .get(aggregate_id)
            .map(|s| s.events.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: &str) -> EventToAppend {
        EventToAppend::new(id, "request.discovered.v1", Utc::now(), json!({}))
    }

    #[tokio::test]
    async fn append_assigns_contiguous_versions() {
        let store = MemoryEventStore::new();
        let v1 = store.append("pA|rK", &[event("a")], Some(0)).await.unwrap();
        assert_eq!(v1, 1);
        let v3 = store
            .append("pA|rK", &[event("b"), event("c")], Some(1))
            .await
            .unwrap();
        assert_eq!(v3, 3);

        let stream = store.read_stream("pA|rK").await.unwrap();
        let versions: Vec<u64> = stream.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn expected_version_mismatch_is_a_conflict() {
        let store = MemoryEventStore::new();
        store.append("pA|rK", &[event("a")], Some(0)).await.unwrap();

        let err = store
            .append("pA|rK", &[event("b")], Some(0))
            .await
            .unwrap_err();
        assert!(err.is_concurrency());

        // Losing writer left no trace.
        assert_eq!(store.read_stream("pA|rK").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_a_conflict() {
        let store = MemoryEventStore::new();
        store.append("pA|rK", &[event("a")], Some(0)).await.unwrap();

        let err = store
            .append("pA|rK", &[event("a")], Some(1))
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
        assert_eq!(store.stream_version("pA|rK").unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_within_batch_rolls_back_whole_append() {
        let store = MemoryEventStore::new();
        let err = store
            .append("pA|rK", &[event("a"), event("a")], Some(0))
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
        assert_eq!(store.stream_version("pA|rK").unwrap(), 0);
    }

    #[tokio::test]
    async fn same_id_in_distinct_streams_is_allowed() {
        let store = MemoryEventStore::new();
        store.append("pA|r1", &[event("a")], Some(0)).await.unwrap();
        store.append("pA|r2", &[event("a")], Some(0)).await.unwrap();
        assert_eq!(store.stream_version("pA|r1").unwrap(), 1);
        assert_eq!(store.stream_version("pA|r2").unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_stream_reads_empty() {
        let store = MemoryEventStore::new();
        assert!(store.read_stream("absent|row").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let store = MemoryEventStore::new();
        let err = store.append("pA|rK", &[], Some(0)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
