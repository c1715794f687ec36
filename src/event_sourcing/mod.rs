// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic aggregate/event/store abstractions. Orders are the only
// event-sourced aggregate; their domain code lives in src/domain/order.
//
// ============================================================================

mod core;
mod store;

pub use self::core::*;
pub use self::store::*;
