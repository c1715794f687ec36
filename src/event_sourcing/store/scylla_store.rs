use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::statement::batch::Batch;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use super::{sequence_envelopes, EventStore, EventStoreError};
use crate::error::StorageError;
use crate::event_sourcing::core::{deserialize_event, serialize_event, DomainEvent, EventEnvelope};
use crate::storage::lwt_applied;

// ============================================================================
// ScyllaDB Event Store
// ============================================================================
//
// One partition per aggregate, clustered by sequence number:
//
//   PRIMARY KEY ((aggregate_id), sequence_number)
//
// Every append is a single-partition conditional batch of
// `INSERT ... IF NOT EXISTS` rows. Two writers racing for the same
// sequence number cannot both succeed, so a lost race surfaces as
// `ConcurrencyConflict` instead of a silently overwritten event.
//
// ============================================================================

type EventRow = (
    Uuid,
    i64,
    Uuid,
    String,
    i32,
    String,
    Option<Uuid>,
    Uuid,
    DateTime<Utc>,
    String,
);

pub struct ScyllaEventStore<E> {
    session: Arc<Session>,
    table: &'static str,
    aggregate_type_name: &'static str,
    _phantom: PhantomData<E>,
}

impl<E: DomainEvent> ScyllaEventStore<E> {
    pub fn new(session: Arc<Session>, table: &'static str, aggregate_type_name: &'static str) -> Self {
        Self {
            session,
            table,
            aggregate_type_name,
            _phantom: PhantomData,
        }
    }

    pub fn create_table_cql(table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                aggregate_id uuid,
                sequence_number bigint,
                event_id uuid,
                event_type text,
                event_version int,
                event_data text,
                causation_id uuid,
                correlation_id uuid,
                timestamp timestamp,
                metadata text,
                PRIMARY KEY ((aggregate_id), sequence_number)
            ) WITH CLUSTERING ORDER BY (sequence_number ASC)"
        )
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for ScyllaEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        mut events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyAppend);
        }

        let new_version = sequence_envelopes(expected_version, &mut events);

        let insert = format!(
            "INSERT INTO {} (
                aggregate_id, sequence_number, event_id, event_type, event_version,
                event_data, causation_id, correlation_id, timestamp, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS",
            self.table
        );

        let mut batch = Batch::default();
        let mut values: Vec<EventRow> = Vec::with_capacity(events.len());

        for envelope in &events {
            batch.append_statement(insert.as_str());
            values.push((
                aggregate_id,
                envelope.sequence_number,
                envelope.event_id,
                envelope.event_type.clone(),
                envelope.event_version,
                serialize_event(&envelope.event_data)?,
                envelope.causation_id,
                envelope.correlation_id,
                envelope.timestamp,
                serde_json::to_string(&envelope.metadata).map_err(StorageError::from)?,
            ));
        }

        let result = self
            .session
            .batch(&batch, values)
            .await
            .map_err(StorageError::scylla)?;

        if !lwt_applied(result)? {
            let actual = self.current_version(aggregate_id).await?;
            tracing::warn!(
                aggregate_id = %aggregate_id,
                aggregate_type = self.aggregate_type_name,
                expected_version,
                actual_version = actual,
                "Append lost a concurrent write race"
            );
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = self.aggregate_type_name,
            new_version,
            event_count = events.len(),
            "Appended events to event store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, EventStoreError> {
        let query = format!(
            "SELECT aggregate_id, sequence_number, event_id, event_type, event_version,
                    event_data, causation_id, correlation_id, timestamp, metadata
             FROM {}
             WHERE aggregate_id = ?",
            self.table
        );

        let result = self
            .session
            .query_unpaged(query, (aggregate_id,))
            .await
            .map_err(StorageError::scylla)?;

        let rows_result = result.into_rows_result().map_err(StorageError::scylla)?;

        let mut events = Vec::new();
        for row in rows_result.rows::<EventRow>().map_err(StorageError::scylla)? {
            let (
                agg_id,
                sequence_number,
                event_id,
                event_type,
                event_version,
                event_data_json,
                causation_id,
                correlation_id,
                timestamp,
                metadata_json,
            ) = row.map_err(StorageError::scylla)?;

            let metadata: HashMap<String, String> = if metadata_json.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&metadata_json).map_err(StorageError::from)?
            };

            events.push(EventEnvelope {
                event_id,
                aggregate_id: agg_id,
                sequence_number,
                event_type,
                event_version,
                event_data: deserialize_event(&event_data_json)?,
                causation_id,
                correlation_id,
                timestamp,
                metadata,
            });
        }

        tracing::debug!(aggregate_id = %aggregate_id, count = events.len(), "Loaded events");
        Ok(events)
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let query = format!(
            "SELECT sequence_number FROM {} WHERE aggregate_id = ? ORDER BY sequence_number DESC LIMIT 1",
            self.table
        );

        let result = self
            .session
            .query_unpaged(query, (aggregate_id,))
            .await
            .map_err(StorageError::scylla)?;

        let rows_result = result.into_rows_result().map_err(StorageError::scylla)?;
        let version = rows_result
            .maybe_first_row::<(i64,)>()
            .map_err(StorageError::scylla)?
            .map(|(version,)| version)
            .unwrap_or(0);

        Ok(version)
    }
}
