use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::value_objects::{
    order_number, OrderItem, OrderStatus, OrderTimestamps, OrderTotals, PaymentInfo, PricingPolicy,
    ShippingAddress, TrackingInfo,
};
use crate::domain::shared::{Initiator, ProductId};
use crate::event_sourcing::Aggregate;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// `items` and `totals` are set by the first event and never touched again.
// Every later event is either a status edge from the transition table or a
// tracking update, so the only way to change `status` is through
// `handle_command`, which checks the table first.
//
// `settled_stock` lists units the order stopped backing without a status
// change (a stock effect that could neither be recorded nor undone). An order
// that lost part of its reservation can only be cancelled.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderAggregate {
    // Identity
    pub id: Uuid,
    pub order_number: String,
    pub version: i64,

    pub buyer_id: Uuid,
    pub checkout_token: String,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub shipping_address: ShippingAddress,
    pub status: OrderStatus,
    pub timestamps: OrderTimestamps,

    // Optional fields
    pub tracking: Option<TrackingInfo>,
    pub payment: Option<PaymentInfo>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Initiator>,
    pub return_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settled_stock: Vec<SettledLine>,
}

/// Everything the checkout orchestrator knows when it places an order
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub buyer_id: Uuid,
    pub checkout_token: String,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment: Option<PaymentInfo>,
}

impl OrderAggregate {
    /// Validate a new order and produce its first event
    pub fn place(order_id: Uuid, order: NewOrder, pricing: &PricingPolicy) -> Result<OrderEvent, OrderError> {
        validate_items(&order.items)?;

        let placed_at = Utc::now();
        let totals = OrderTotals::compute(&order.items, pricing);

        let event = OrderEvent::Placed(OrderPlaced {
            buyer_id: order.buyer_id,
            order_number: order_number(order_id, placed_at),
            checkout_token: order.checkout_token,
            items: order.items,
            totals,
            shipping_address: order.shipping_address,
            payment: order.payment,
            placed_at,
        });

        Ok(event)
    }

    pub fn is_cancellable(&self) -> bool {
        self.status.is_cancellable()
    }

    /// Units per product the order still holds on the stock ledger
    pub fn held_stock(&self) -> BTreeMap<ProductId, u32> {
        let mut held: BTreeMap<ProductId, u32> = BTreeMap::new();
        for item in &self.items {
            *held.entry(item.product_id.clone()).or_insert(0) += item.quantity;
        }

        for line in &self.settled_stock {
            if let Some(quantity) = held.get_mut(&line.product_id) {
                *quantity = quantity.saturating_sub(line.quantity);
            }
        }

        held.retain(|_, quantity| *quantity > 0);
        held
    }

    pub fn lost_reservation(&self) -> bool {
        self.settled_stock
            .iter()
            .any(|line| line.settlement == StockSettlement::Released)
    }

    /// A delivered order must never carry a cancellation stamp and vice versa
    pub fn check_invariants(&self) -> Result<(), OrderError> {
        if self.timestamps.cancelled_at.is_some() && self.timestamps.delivered_at.is_some() {
            return Err(OrderError::CorruptHistory(format!(
                "order {} is both cancelled and delivered",
                self.id
            )));
        }
        if self.items.is_empty() {
            return Err(OrderError::CorruptHistory(format!("order {} has no items", self.id)));
        }
        Ok(())
    }

    fn advance(&mut self, to: OrderStatus, at: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::CorruptHistory(format!(
                "recorded transition {} -> {} is not in the transition table",
                self.status, to
            )));
        }
        self.status = to;
        self.timestamps.stamp(to, at);
        Ok(())
    }

    fn handle_transition(
        &self,
        to: OrderStatus,
        tracking: Option<&TrackingInfo>,
        reason: Option<&String>,
        initiator: Initiator,
    ) -> Result<OrderEvent, OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition { from: self.status, to });
        }
        if to != OrderStatus::Cancelled && self.lost_reservation() {
            return Err(OrderError::ReservationLost(self.id));
        }

        let at = Utc::now();
        let event = match to {
            OrderStatus::Confirmed => OrderEvent::Confirmed(StatusStamped { at }),
            OrderStatus::Processing => OrderEvent::ProcessingStarted(StatusStamped { at }),
            OrderStatus::Shipped => {
                let tracking = tracking.or(self.tracking.as_ref()).ok_or(OrderError::TrackingRequired)?;
                OrderEvent::Shipped(OrderShipped {
                    tracking: tracking.clone(),
                    at,
                })
            }
            OrderStatus::Delivered => OrderEvent::Delivered(StatusStamped { at }),
            OrderStatus::Cancelled => OrderEvent::Cancelled(OrderCancelled {
                reason: reason.cloned(),
                initiator,
                at,
            }),
            OrderStatus::Returned => OrderEvent::Returned(OrderReturned {
                reason: reason.cloned(),
                at,
            }),
            // Nothing transitions into pending
            OrderStatus::Pending => return Err(OrderError::InvalidTransition { from: self.status, to }),
        };

        Ok(event)
    }
}

fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyItems);
    }

    for item in items {
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity(item.product_id.to_string()));
        }
    }

    Ok(())
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for OrderAggregate {
    type Event = OrderEvent;
    type Command = OrderCommand;
    type Error = OrderError;

    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            OrderEvent::Placed(e) => Ok(Self {
                id: aggregate_id,
                order_number: e.order_number.clone(),
                version: 0,
                buyer_id: e.buyer_id,
                checkout_token: e.checkout_token.clone(),
                items: e.items.clone(),
                totals: e.totals.clone(),
                shipping_address: e.shipping_address.clone(),
                status: OrderStatus::Pending,
                timestamps: OrderTimestamps::placed_at(e.placed_at),
                tracking: None,
                payment: e.payment.clone(),
                cancellation_reason: None,
                cancelled_by: None,
                return_reason: None,
                settled_stock: Vec::new(),
            }),
            _ => Err(OrderError::NotInitialized),
        }
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            OrderEvent::Placed(_) => Err(OrderError::CorruptHistory(format!(
                "order {} placed twice",
                self.id
            ))),
            OrderEvent::Confirmed(e) => self.advance(OrderStatus::Confirmed, e.at),
            OrderEvent::ProcessingStarted(e) => self.advance(OrderStatus::Processing, e.at),
            OrderEvent::Shipped(e) => {
                self.advance(OrderStatus::Shipped, e.at)?;
                self.tracking = Some(e.tracking.clone());
                Ok(())
            }
            OrderEvent::Delivered(e) => self.advance(OrderStatus::Delivered, e.at),
            OrderEvent::Cancelled(e) => {
                self.advance(OrderStatus::Cancelled, e.at)?;
                self.cancellation_reason = e.reason.clone();
                self.cancelled_by = Some(e.initiator);
                Ok(())
            }
            OrderEvent::Returned(e) => {
                self.advance(OrderStatus::Returned, e.at)?;
                self.return_reason = e.reason.clone();
                Ok(())
            }
            OrderEvent::TrackingAttached(e) => {
                self.tracking = Some(e.tracking.clone());
                Ok(())
            }
            OrderEvent::StockSettled(e) => {
                self.settled_stock.extend(e.lines.iter().cloned());
                Ok(())
            }
        }
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Transition {
                to,
                tracking,
                reason,
                initiator,
            } => Ok(vec![self.handle_transition(*to, tracking.as_ref(), reason.as_ref(), *initiator)?]),

            OrderCommand::AttachTracking { tracking } => match self.status {
                OrderStatus::Confirmed | OrderStatus::Processing => {
                    Ok(vec![OrderEvent::TrackingAttached(TrackingAttached {
                        tracking: tracking.clone(),
                    })])
                }
                other => Err(OrderError::TrackingNotAllowed(other)),
            },
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
