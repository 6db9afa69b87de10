use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use billflow_core::{AggregateId, Event, ExpectedVersion};

/// An event ready to be appended to a stream (not yet assigned a sequence
/// number).
///
/// Use [`UncommittedEvent::from_typed`] to build one from a typed domain
/// event: it serializes the payload to JSON and captures the event metadata
/// needed to deserialize it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are assigned by the store during append: monotonically
/// increasing, stream-scoped, immutable. The stream version of an aggregate
/// is the sequence number of its last event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }
}

/// Document store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

/// One stream's contribution to an atomic multi-stream append.
#[derive(Debug, Clone)]
pub struct StreamAppend {
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

/// Append-only document store.
///
/// Events are organized into streams, one per document instance, keyed by
/// [`AggregateId`]. Within a stream, events have monotonically increasing
/// sequence numbers (1, 2, 3, ...).
///
/// ## Append semantics
///
/// `append_batches()` is the transaction boundary for cross-document
/// operations (quote→order, order→invoice, invoice→credit-note): every
/// batch's expected version is checked against its stream **before anything
/// is written**, and either all batches commit or none do. Two concurrent
/// one-shot conversions race on the version check and exactly one wins.
///
/// ## Implementation requirements
///
/// - enforce optimistic concurrency against the current stream version
/// - assign monotonically increasing `sequence_number`s (no gaps, no
///   duplicates) starting at `current_version + 1`
/// - ensure atomicity across all batches in a call
pub trait DocumentStore: Send + Sync {
    /// Atomically append to one or more streams (all-or-nothing).
    fn append_batches(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, DocumentStoreError>;

    /// Load the full stream for a document.
    ///
    /// Returns an empty vector if the stream doesn't exist (document not yet
    /// created).
    fn load_stream(&self, aggregate_id: AggregateId)
    -> Result<Vec<StoredEvent>, DocumentStoreError>;

    /// Append events to a single document stream.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, DocumentStoreError> {
        self.append_batches(vec![StreamAppend {
            expected_version,
            events,
        }])
    }
}

impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    fn append_batches(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, DocumentStoreError> {
        (**self).append_batches(batches)
    }

    fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, DocumentStoreError> {
        (**self).load_stream(aggregate_id)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps the store decoupled from the domain crates while still capturing
    /// the event metadata needed for future deserialization.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, DocumentStoreError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            DocumentStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
