use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::shared::ProductId;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Catalog values copied into an order when it is placed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Decimal,
    pub image: Option<String>,
}

/// Immutable line of a placed order
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name_snapshot: String,
    pub price_snapshot: Decimal,
    pub quantity: u32,
    pub variant: Option<String>,
    pub image: Option<String>,
}

impl OrderItem {
    pub fn from_snapshot(snapshot: &ProductSnapshot, quantity: u32, variant: Option<String>) -> Self {
        Self {
            product_id: snapshot.product_id.clone(),
            name_snapshot: snapshot.name.clone(),
            price_snapshot: snapshot.unit_price,
            quantity,
            variant,
            image: snapshot.image.clone(),
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.price_snapshot * Decimal::from(self.quantity)
    }
}

// ============================================================================
// Order Status - the lifecycle state machine
// ============================================================================
//
//   pending -> confirmed -> processing -> shipped -> delivered -> returned
//      |           |
//      +-----------+--> cancelled
//
// cancelled and returned accept nothing. delivered only accepts returned.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Returned,
    ];

    pub fn allowed_targets(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
            OrderStatus::Confirmed => &[OrderStatus::Processing, OrderStatus::Cancelled],
            OrderStatus::Processing => &[OrderStatus::Shipped],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered => &[OrderStatus::Returned],
            OrderStatus::Cancelled | OrderStatus::Returned => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn is_cancellable(&self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }

    /// Orders whose items may be staged into the cart again
    pub fn is_reorderable(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Returned | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

// ============================================================================
// Pricing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    pub shipping_flat_fee: Decimal,
    /// Subtotal at or above which shipping is free
    pub free_shipping_threshold: Decimal,
    pub tax_rate: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            shipping_flat_fee: Decimal::from(50),
            free_shipping_threshold: Decimal::from(500),
            tax_rate: Decimal::new(18, 2),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    /// Computed once when the order is placed
    pub fn compute(items: &[OrderItem], policy: &PricingPolicy) -> Self {
        let subtotal: Decimal = items.iter().map(OrderItem::line_total).sum();
        let shipping = if subtotal >= policy.free_shipping_threshold {
            Decimal::ZERO
        } else {
            policy.shipping_flat_fee
        };
        let tax = (subtotal * policy.tax_rate).round_dp(2);
        let discount = Decimal::ZERO;

        Self {
            subtotal,
            shipping,
            tax,
            discount,
            total: subtotal + shipping + tax - discount,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.subtotal + self.shipping + self.tax - self.discount
    }
}

// ============================================================================
// Shipping, tracking, payment
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrackingInfo {
    pub number: String,
    pub carrier: String,
    pub estimated_delivery: Option<NaiveDate>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PaymentMethod {
    /// e.g. "card", "upi", "cod"
    pub kind: String,
    pub last4: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PaymentInfo {
    pub transaction_id: String,
    pub method: PaymentMethod,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrderTimestamps {
    pub order_date: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub processing_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl OrderTimestamps {
    pub fn placed_at(order_date: DateTime<Utc>) -> Self {
        Self {
            order_date,
            ..Default::default()
        }
    }

    /// Stamp the field that belongs to `status`
    pub fn stamp(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        let slot = match status {
            OrderStatus::Pending => return,
            OrderStatus::Confirmed => &mut self.confirmed_at,
            OrderStatus::Processing => &mut self.processing_at,
            OrderStatus::Shipped => &mut self.shipped_at,
            OrderStatus::Delivered => &mut self.delivered_at,
            OrderStatus::Cancelled => &mut self.cancelled_at,
            OrderStatus::Returned => &mut self.returned_at,
        };
        *slot = Some(at);
    }
}

/// Human-readable order number: ORD-YYYYMMDD-XXXXXXXX
pub fn order_number(order_id: Uuid, order_date: DateTime<Utc>) -> String {
    let simple = order_id.simple().to_string();
    format!(
        "ORD-{}-{}",
        order_date.format("%Y%m%d"),
        simple[..8].to_ascii_uppercase()
    )
}

// ============================================================================
// Unit Tests
// ============================================================================
