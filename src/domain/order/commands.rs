use super::value_objects::{OrderStatus, TrackingInfo};
use crate::domain::shared::Initiator;

// ============================================================================
// Order Commands - Represent caller intent on an existing order
// ============================================================================
//
// Placing an order is not a command: orders are only ever created by the
// checkout orchestrator through `OrderAggregate::place`.
//
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    Transition {
        to: OrderStatus,
        /// Required when moving to shipped unless already attached
        tracking: Option<TrackingInfo>,
        /// Recorded for cancellations and returns
        reason: Option<String>,
        initiator: Initiator,
    },
    AttachTracking {
        tracking: TrackingInfo,
    },
}

impl OrderCommand {
    pub fn transition(to: OrderStatus, initiator: Initiator) -> Self {
        OrderCommand::Transition {
            to,
            tracking: None,
            reason: None,
            initiator,
        }
    }
}
