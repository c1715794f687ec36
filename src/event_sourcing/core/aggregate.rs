use uuid::Uuid;
use super::event::EventEnvelope;

// ============================================================================
// Aggregate Root Pattern
// ============================================================================
//
// - State is derived from events, never written directly
// - Commands are validated against current state before any event exists
// - Events are facts; applying one never fails for a well-formed history
//
// ============================================================================

/// Event-sourced aggregate
///
/// Type Parameters:
/// - `Event`: the domain event type for this aggregate
/// - `Command`: commands accepted by an existing aggregate
/// - `Error`: business rule violations
pub trait Aggregate: Sized + Send + Sync {
    type Event;
    type Command;
    type Error;

    /// Create the aggregate from its first event
    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error>;

    /// Apply a subsequent event
    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error>;

    /// Validate a command and return the events it produces
    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    fn aggregate_id(&self) -> Uuid;

    /// Sequence number of the last applied event
    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// Rebuild from history. `Ok(None)` means the stream is empty.
    fn load_from_events(events: Vec<EventEnvelope<Self::Event>>) -> Result<Option<Self>, Self::Error> {
        let mut iter = events.into_iter();

        let Some(first) = iter.next() else {
            return Ok(None);
        };

        let mut aggregate = Self::apply_first_event(first.aggregate_id, &first.event_data)?;
        aggregate.set_version(first.sequence_number);

        for envelope in iter {
            aggregate.apply_event(&envelope.event_data)?;
            aggregate.set_version(envelope.sequence_number);
        }

        Ok(Some(aggregate))
    }
}
