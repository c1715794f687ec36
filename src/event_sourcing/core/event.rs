use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::StorageError;

// ============================================================================
// Event Envelope
// ============================================================================
//
// Wraps a domain event with identity, ordering and tracing metadata.
// The envelope is what gets persisted; the payload is stored as JSON.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EventEnvelope<E> {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: i64,

    pub event_type: String,
    pub event_version: i32,

    pub event_data: E,

    pub causation_id: Option<Uuid>,
    /// Groups every event produced by one request
    pub correlation_id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub metadata: HashMap<String, String>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(aggregate_id: Uuid, sequence_number: i64, event_data: E, correlation_id: Uuid) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            sequence_number,
            event_type: event_data.event_name().to_string(),
            event_version: event_data.schema_version(),
            event_data,
            causation_id: None,
            correlation_id,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of this particular event, e.g. "OrderShipped"
    fn event_name(&self) -> &'static str;

    fn schema_version(&self) -> i32 {
        1
    }
}

pub fn serialize_event<E: Serialize>(event: &E) -> Result<String, StorageError> {
    Ok(serde_json::to_string(event)?)
}

pub fn deserialize_event<E: DeserializeOwned>(json: &str) -> Result<E, StorageError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[serde(tag = "type", content = "data")]
    enum TestEvent {
        Opened { note: String },
        Closed,
    }

    impl DomainEvent for TestEvent {
        fn event_name(&self) -> &'static str {
            match self {
                TestEvent::Opened { .. } => "TestOpened",
                TestEvent::Closed => "TestClosed",
            }
        }
    }

    #[test]
    fn test_envelope_takes_name_from_variant() {
        let aggregate_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let envelope = EventEnvelope::new(aggregate_id, 3, TestEvent::Closed, correlation_id)
            .with_metadata("initiator", "buyer");

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.sequence_number, 3);
        assert_eq!(envelope.event_type, "TestClosed");
        assert_eq!(envelope.event_version, 1);
        assert_eq!(envelope.correlation_id, correlation_id);
        assert_eq!(envelope.metadata.get("initiator").map(String::as_str), Some("buyer"));
    }

    #[test]
    fn test_payload_survives_storage_encoding() {
        let event = TestEvent::Opened { note: "first".to_string() };

        let json = serialize_event(&event).unwrap();
        assert!(json.contains("Opened"));

        let decoded: TestEvent = deserialize_event(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
