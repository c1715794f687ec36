// ============================================================================
// Event Sourcing Core - aggregate and event abstractions
// ============================================================================
//
// No domain types live here; `domain::order` builds on these.
//
// ============================================================================

pub mod aggregate;
pub mod event;

pub use aggregate::Aggregate;
pub use event::{deserialize_event, serialize_event, DomainEvent, EventEnvelope};
