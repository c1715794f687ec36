use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("tracking info is required to ship an order")]
    TrackingRequired,

    #[error("tracking info cannot be attached while the order is {0}")]
    TrackingNotAllowed(OrderStatus),

    #[error("order items cannot be empty")]
    EmptyItems,

    #[error("invalid item quantity for {0}: must be at least 1")]
    InvalidQuantity(String),

    #[error("order cannot be reordered while {0}")]
    NotReorderable(OrderStatus),

    #[error("order {0} no longer holds its full stock reservation and can only be cancelled")]
    ReservationLost(uuid::Uuid),

    #[error("aggregate not initialized")]
    NotInitialized,

    #[error("corrupt order history: {0}")]
    CorruptHistory(String),
}
