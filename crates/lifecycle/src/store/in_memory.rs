use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use billflow_core::AggregateId;

use super::r#trait::{
    DocumentStore, DocumentStoreError, StoredEvent, StreamAppend, UncommittedEvent,
};

/// In-memory append-only document store.
///
/// Intended for tests/dev. Not optimized for performance. Appends are
/// serialized behind one lock, which is what makes `append_batches`
/// atomic across streams.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn validate_batch(batch: &StreamAppend) -> Result<AggregateId, DocumentStoreError> {
        let aggregate_id = batch.events[0].aggregate_id;
        let aggregate_type = &batch.events[0].aggregate_type;

        for (idx, e) in batch.events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(DocumentStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if &e.aggregate_type != aggregate_type {
                return Err(DocumentStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        Ok(aggregate_id)
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn append_batches(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, DocumentStoreError> {
        let batches: Vec<StreamAppend> = batches
            .into_iter()
            .filter(|b| !b.events.is_empty())
            .collect();
        if batches.is_empty() {
            return Ok(vec![]);
        }

        // Each batch must target one stream; no two batches the same stream.
        let mut targets = HashSet::new();
        for batch in &batches {
            let aggregate_id = Self::validate_batch(batch)?;
            if !targets.insert(aggregate_id) {
                return Err(DocumentStoreError::InvalidAppend(format!(
                    "multiple batches target stream {aggregate_id}"
                )));
            }
        }

        let mut streams = self.streams.write().expect("store lock poisoned");

        // All-or-nothing: check every expected version before writing anything.
        for batch in &batches {
            let aggregate_id = batch.events[0].aggregate_id;
            let current = streams
                .get(&aggregate_id)
                .map(|s| Self::current_version(s))
                .unwrap_or(0);
            if !batch.expected_version.matches(current) {
                return Err(DocumentStoreError::Concurrency(format!(
                    "stream {aggregate_id} is at version {current}, expected {:?}",
                    batch.expected_version
                )));
            }
        }

        let mut committed = Vec::new();
        for batch in batches {
            let aggregate_id = batch.events[0].aggregate_id;
            let stream = streams.entry(aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                stream.push(stored.clone());
                committed.push(stored);
                next += 1;
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, DocumentStoreError> {
        let streams = self.streams.read().expect("store lock poisoned");
        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }
}
