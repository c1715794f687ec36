// ============================================================================
// Order Domain - the order aggregate and its lifecycle
// ============================================================================
//
// - Value objects (OrderItem, OrderStatus, OrderTotals, TrackingInfo)
// - Events (OrderPlaced, OrderShipped, OrderCancelled, ...)
// - Commands (Transition, AttachTracking)
// - Errors (OrderError)
// - Aggregate (OrderAggregate with the transition table)
// - Command handler (OrderLifecycleManager)
//
// ============================================================================

pub mod aggregate;
pub mod command_handler;
pub mod commands;
pub mod errors;
pub mod events;
pub mod repository;
pub mod value_objects;

pub use aggregate::*;
pub use command_handler::*;
pub use commands::*;
pub use errors::*;
pub use events::*;
pub use repository::*;
pub use value_objects::*;
