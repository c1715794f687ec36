// ============================================================================
// Event Store - append-only persistence with optimistic concurrency
// ============================================================================
//
// Appends carry the version the caller last observed. If another writer got
// there first the append fails with `ConcurrencyConflict` and nothing is
// written. This is what makes per-aggregate updates linearizable even across
// processes.
//
// ============================================================================

mod in_memory;
mod scylla_store;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;
use super::core::{DomainEvent, EventEnvelope};

pub use in_memory::InMemoryEventStore;
pub use scylla_store::ScyllaEventStore;

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("concurrency conflict on {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("cannot append an empty event list")]
    EmptyAppend,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait EventStore<E: DomainEvent>: Send + Sync {
    /// Append `events` after `expected_version`; returns the new version
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, EventStoreError>;

    /// Full history in sequence order; empty when the aggregate does not exist
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, EventStoreError>;

    /// Sequence number of the last event, 0 for a new aggregate
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError>;

    async fn aggregate_exists(&self, aggregate_id: Uuid) -> Result<bool, EventStoreError> {
        Ok(self.current_version(aggregate_id).await? > 0)
    }
}

/// Renumber envelopes so they follow `expected_version` contiguously
pub(crate) fn sequence_envelopes<E>(expected_version: i64, events: &mut [EventEnvelope<E>]) -> i64 {
    let mut version = expected_version;
    for envelope in events.iter_mut() {
        version += 1;
        envelope.sequence_number = version;
    }
    version
}
