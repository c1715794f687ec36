use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{sequence_envelopes, EventStore, EventStoreError};
use crate::event_sourcing::core::{DomainEvent, EventEnvelope};

/// Process-local event store for tests and the demo binary
pub struct InMemoryEventStore<E> {
    streams: RwLock<HashMap<Uuid, Vec<EventEnvelope<E>>>>,
}

impl<E> InMemoryEventStore<E> {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for InMemoryEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        mut events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyAppend);
        }

        let mut streams = self.streams.write().await;
        let stream = streams.entry(aggregate_id).or_default();

        let actual = stream.len() as i64;
        if actual != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let new_version = sequence_envelopes(expected_version, &mut events);
        stream.extend(events);

        tracing::debug!(aggregate_id = %aggregate_id, new_version, "Appended events in memory");
        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, EventStoreError> {
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).map(|s| s.len() as i64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct Ticked;

    impl DomainEvent for Ticked {
        fn event_name(&self) -> &'static str {
            "Ticked"
        }
    }

    fn envelope(aggregate_id: Uuid) -> EventEnvelope<Ticked> {
        EventEnvelope::new(aggregate_id, 0, Ticked, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_append_assigns_contiguous_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();

        let version = store
            .append_events(id, 0, vec![envelope(id), envelope(id)])
            .await
            .unwrap();
        assert_eq!(version, 2);

        let version = store.append_events(id, 2, vec![envelope(id)]).await.unwrap();
        assert_eq!(version, 3);

        let events = store.load_events(id).await.unwrap();
        let sequence: Vec<i64> = events.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequence, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();

        store.append_events(id, 0, vec![envelope(id)]).await.unwrap();
        let result = store.append_events(id, 0, vec![envelope(id)]).await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { expected: 0, actual: 1, .. })
        ));
        assert_eq!(store.current_version(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_aggregate_is_empty() {
        let store: InMemoryEventStore<Ticked> = InMemoryEventStore::new();
        let id = Uuid::new_v4();

        assert!(store.load_events(id).await.unwrap().is_empty());
        assert!(!store.aggregate_exists(id).await.unwrap());
        assert!(matches!(
            store.append_events(id, 0, vec![]).await,
            Err(EventStoreError::EmptyAppend)
        ));
    }
}
