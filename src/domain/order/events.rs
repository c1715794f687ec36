use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{OrderItem, OrderStatus, OrderTotals, PaymentInfo, ShippingAddress, TrackingInfo};
use crate::domain::shared::{Initiator, ProductId};
use crate::event_sourcing::DomainEvent;

// ============================================================================
// Order Events - Domain Events for Order Aggregate
// ============================================================================

/// Order Event - Union type for all order events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Placed(OrderPlaced),
    Confirmed(StatusStamped),
    ProcessingStarted(StatusStamped),
    Shipped(OrderShipped),
    Delivered(StatusStamped),
    Cancelled(OrderCancelled),
    Returned(OrderReturned),
    TrackingAttached(TrackingAttached),
    StockSettled(StockSettled),
}

impl OrderEvent {
    /// Status this event moves the order into, if it is a transition
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self {
            OrderEvent::Placed(_) => Some(OrderStatus::Pending),
            OrderEvent::Confirmed(_) => Some(OrderStatus::Confirmed),
            OrderEvent::ProcessingStarted(_) => Some(OrderStatus::Processing),
            OrderEvent::Shipped(_) => Some(OrderStatus::Shipped),
            OrderEvent::Delivered(_) => Some(OrderStatus::Delivered),
            OrderEvent::Cancelled(_) => Some(OrderStatus::Cancelled),
            OrderEvent::Returned(_) => Some(OrderStatus::Returned),
            OrderEvent::TrackingAttached(_) | OrderEvent::StockSettled(_) => None,
        }
    }
}

impl DomainEvent for OrderEvent {
    fn event_name(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "OrderPlaced",
            OrderEvent::Confirmed(_) => "OrderConfirmed",
            OrderEvent::ProcessingStarted(_) => "OrderProcessingStarted",
            OrderEvent::Shipped(_) => "OrderShipped",
            OrderEvent::Delivered(_) => "OrderDelivered",
            OrderEvent::Cancelled(_) => "OrderCancelled",
            OrderEvent::Returned(_) => "OrderReturned",
            OrderEvent::TrackingAttached(_) => "OrderTrackingAttached",
            OrderEvent::StockSettled(_) => "OrderStockSettled",
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Placed - Initial event in order lifecycle
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderPlaced {
    pub buyer_id: Uuid,
    pub order_number: String,
    pub checkout_token: String,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub shipping_address: ShippingAddress,
    pub payment: Option<PaymentInfo>,
    pub placed_at: DateTime<Utc>,
}

/// Plain status advance carrying only its timestamp
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatusStamped {
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderShipped {
    pub tracking: TrackingInfo,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderCancelled {
    pub reason: Option<String>,
    pub initiator: Initiator,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderReturned {
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TrackingAttached {
    pub tracking: TrackingInfo,
}

/// What happened to stock the order no longer backs
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockSettlement {
    /// Reservation went back to the available pool
    Released,
    /// Reservation was consumed
    Committed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SettledLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub settlement: StockSettlement,
}

/// A stock effect went through on the ledger but the status change that
/// caused it was never recorded, and it could not be reversed
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StockSettled {
    pub lines: Vec<SettledLine>,
    pub at: DateTime<Utc>,
}
