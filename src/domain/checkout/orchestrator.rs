use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::repository::{CheckoutTokenStore, TokenClaim};
use crate::audit::{AuditTrail, LifecycleEvent, LifecycleKind};
use crate::collaborators::{PaymentGateway, PaymentOutcome, PaymentRequest, ProductCatalog, RefundFailed};
use crate::domain::cart::{CartEntry, CartStore};
use crate::domain::order::{
    NewOrder, OrderAggregate, OrderItem, OrderLifecycleManager, OrderTotals, PaymentInfo, PaymentMethod,
    PricingPolicy, ShippingAddress,
};
use crate::domain::shared::ProductId;
use crate::domain::stock::StockLedger;
use crate::error::{EngineError, StockShortage};
use crate::metrics::Metrics;
use crate::utils::KeyedLocks;

// ============================================================================
// Checkout Orchestrator
// ============================================================================
//
// Turns the buyer's selected cart entries into exactly one order:
//
//   1. lock buyer, look up (buyer, token)      -> replay existing order
//   2. snapshot selection                      -> EmptySelection / InsufficientStock
//   3. reserve every product, ascending id     -> InsufficientStock (rolled back)
//   4. snapshot prices, claim token
//   5. charge payment (no lock on stock held)  -> PaymentDeclined (rolled back)
//   6. append OrderPlaced, index it
//   7. remove consumed cart entries, emit audit event
//
// Any failure after step 3 releases every reservation taken by this attempt
// and frees the token before the error is returned. An approved charge is
// refunded first; if the refund fails the token stays claimed so a retry
// with it can never charge again. The cart is only touched once the order
// is durable.
//
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    #[serde(alias = "buyerId")]
    pub buyer_id: Uuid,
    /// Client-generated idempotency token
    pub token: String,
    #[serde(alias = "shippingAddress")]
    pub shipping_address: ShippingAddress,
    #[serde(default, alias = "paymentMethod")]
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: OrderAggregate,
    /// True when the token was seen before and the original order is returned
    pub replayed: bool,
}

pub struct CheckoutOrchestrator {
    cart: Arc<CartStore>,
    ledger: Arc<StockLedger>,
    orders: Arc<OrderLifecycleManager>,
    tokens: Arc<dyn CheckoutTokenStore>,
    catalog: Arc<dyn ProductCatalog>,
    payment: Option<Arc<dyn PaymentGateway>>,
    pricing: PricingPolicy,
    audit: AuditTrail,
    locks: KeyedLocks<Uuid>,
    metrics: Option<Arc<Metrics>>,
}

impl CheckoutOrchestrator {
    pub fn new(
        cart: Arc<CartStore>,
        ledger: Arc<StockLedger>,
        orders: Arc<OrderLifecycleManager>,
        tokens: Arc<dyn CheckoutTokenStore>,
        catalog: Arc<dyn ProductCatalog>,
        pricing: PricingPolicy,
        audit: AuditTrail,
    ) -> Self {
        Self {
            cart,
            ledger,
            orders,
            tokens,
            catalog,
            payment: None,
            pricing,
            audit,
            locks: KeyedLocks::new(),
            metrics: None,
        }
    }

    pub fn with_payment(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.payment = Some(gateway);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, EngineError> {
        let started = Instant::now();
        let buyer_id = request.buyer_id;

        let result = self.run(request).await;

        let outcome = match &result {
            Ok(CheckoutOutcome { replayed: true, .. }) => "replayed",
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_checkout(outcome, started.elapsed().as_secs_f64());
        }
        if let Err(e) = &result {
            tracing::debug!(buyer_id = %buyer_id, error = %e, "Checkout failed");
        }

        result
    }

    async fn run(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, EngineError> {
        let buyer_id = request.buyer_id;
        let token = request.token.trim();
        if token.is_empty() {
            return Err(EngineError::Rejected("checkout token must not be empty".to_string()));
        }

        let _guard = self.locks.lock(&buyer_id).await;

        if let Some(order_id) = self.tokens.lookup(buyer_id, token).await? {
            return self.replay(buyer_id, token, order_id).await;
        }

        let selection = self.cart.list_selected(buyer_id).await?;

        if !selection.ineligible.is_empty() {
            let mut shortages: Vec<StockShortage> = selection
                .ineligible
                .iter()
                .map(|line| StockShortage {
                    product_id: line.entry.product_id.clone(),
                    requested: line.entry.quantity,
                    available: line.available,
                })
                .collect();
            shortages.extend(self.shortfalls(&quantities_by_product(&selection.eligible)).await?);
            shortages.sort_by(|a, b| a.product_id.cmp(&b.product_id));
            return Err(EngineError::InsufficientStock { shortages });
        }
        if selection.eligible.is_empty() {
            return Err(EngineError::EmptySelection);
        }

        let lines = quantities_by_product(&selection.eligible);
        self.ledger.reserve_all(&lines).await?;

        let order_id = Uuid::now_v7();

        let items = match self.snapshot_items(&selection.eligible).await {
            Ok(items) => items,
            Err(e) => return Err(self.abort(&lines, None, None, e).await),
        };

        match self.tokens.claim(buyer_id, token, order_id).await {
            Ok(TokenClaim::Claimed) => {}
            Ok(TokenClaim::Existing(existing)) => {
                self.ledger.release_all(&lines).await?;
                return self.replay(buyer_id, token, existing).await;
            }
            Err(e) => return Err(self.abort(&lines, None, None, e.into()).await),
        }

        let claim = Some((buyer_id, token, order_id));

        let payment = match self.charge(order_id, buyer_id, &items, request.payment_method.as_ref()).await {
            Ok(payment) => payment,
            Err(e) => return Err(self.abort(&lines, claim, None, e).await),
        };

        let new_order = NewOrder {
            buyer_id,
            checkout_token: token.to_string(),
            items,
            shipping_address: request.shipping_address,
            payment: payment.clone(),
        };

        let placed = match OrderAggregate::place(order_id, new_order, &self.pricing) {
            Ok(event) => event,
            Err(e) => return Err(self.abort(&lines, claim, payment.as_ref(), e.into()).await),
        };

        let order = match self.orders.place(order_id, placed, Uuid::now_v7()).await {
            Ok(order) => order,
            Err(e) => return Err(self.abort(&lines, claim, payment.as_ref(), e).await),
        };

        if let Err(e) = self.cart.remove_consumed(buyer_id, &selection.eligible).await {
            tracing::warn!(
                order_id = %order.id,
                buyer_id = %buyer_id,
                error = %e,
                "Order placed but consumed cart entries could not be removed"
            );
        }

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            buyer_id = %buyer_id,
            items = order.items.len(),
            total = %order.totals.total,
            "Order placed"
        );

        self.audit.record(LifecycleEvent::new(
            LifecycleKind::OrderPlaced,
            order.id,
            buyer_id,
            &order.order_number,
            order.status,
        ));

        Ok(CheckoutOutcome { order, replayed: false })
    }

    async fn replay(&self, buyer_id: Uuid, token: &str, order_id: Uuid) -> Result<CheckoutOutcome, EngineError> {
        match self.orders.get(order_id).await {
            Ok(order) => {
                tracing::info!(buyer_id = %buyer_id, token, order_id = %order_id, "Checkout token reused, returning original order");
                Ok(CheckoutOutcome { order, replayed: true })
            }
            // Claimed by an attempt that is still running, or one that failed
            // after a charge it could not refund
            Err(EngineError::NotFound(_)) => Err(EngineError::Rejected(format!(
                "checkout with token {token} has no order; it is still in progress or failed after payment"
            ))),
            Err(e) => Err(e),
        }
    }

    /// Products whose current availability is below the requested quantity
    async fn shortfalls(&self, lines: &BTreeMap<ProductId, u32>) -> Result<Vec<StockShortage>, EngineError> {
        let mut shortages = Vec::new();
        for (product_id, &requested) in lines {
            let available = self.ledger.availability(product_id).await?.available;
            if requested > available {
                shortages.push(StockShortage {
                    product_id: product_id.clone(),
                    requested,
                    available,
                });
            }
        }
        Ok(shortages)
    }

    /// Build order items from the catalog at reservation time
    async fn snapshot_items(&self, entries: &[CartEntry]) -> Result<Vec<OrderItem>, EngineError> {
        let mut items = Vec::with_capacity(entries.len());

        for entry in entries {
            let snapshot = self
                .catalog
                .snapshot(&entry.product_id)
                .await
                .ok_or_else(|| EngineError::NotFound(format!("catalog entry for product {}", entry.product_id)))?;
            items.push(OrderItem::from_snapshot(&snapshot, entry.quantity, entry.variant.clone()));
        }

        items.sort_by(|a, b| a.product_id.cmp(&b.product_id).then_with(|| a.variant.cmp(&b.variant)));
        Ok(items)
    }

    async fn charge(
        &self,
        order_id: Uuid,
        buyer_id: Uuid,
        items: &[OrderItem],
        method: Option<&PaymentMethod>,
    ) -> Result<Option<PaymentInfo>, EngineError> {
        let (Some(gateway), Some(method)) = (&self.payment, method) else {
            return Ok(None);
        };

        let amount = OrderTotals::compute(items, &self.pricing).total;
        let request = PaymentRequest {
            order_id,
            buyer_id,
            amount,
            method: method.clone(),
        };

        match gateway.charge(request).await {
            PaymentOutcome::Approved { transaction_id } => Ok(Some(PaymentInfo {
                transaction_id,
                method: method.clone(),
            })),
            PaymentOutcome::Declined { reason } => {
                tracing::info!(order_id = %order_id, buyer_id = %buyer_id, reason = %reason, "Payment declined");
                Err(EngineError::PaymentDeclined { reason })
            }
        }
    }

    /// Undo this attempt's reservations, charge and token claim, then hand
    /// back the error to return. A failed rollback wins over the original
    /// error.
    async fn abort(
        &self,
        lines: &BTreeMap<ProductId, u32>,
        claim: Option<(Uuid, &str, Uuid)>,
        payment: Option<&PaymentInfo>,
        err: EngineError,
    ) -> EngineError {
        let released = self.ledger.release_all(lines).await;

        let refund_failure = match (claim, payment) {
            (Some((_, _, order_id)), Some(payment)) => self.refund(order_id, payment).await.err(),
            _ => None,
        };

        if let Some((buyer_id, token, order_id)) = claim {
            if refund_failure.is_some() {
                tracing::error!(
                    buyer_id = %buyer_id,
                    order_id = %order_id,
                    token,
                    "Charge was not refunded, checkout token stays claimed"
                );
            } else if let Err(e) = self.tokens.release(buyer_id, token, order_id).await {
                tracing::error!(buyer_id = %buyer_id, order_id = %order_id, error = %e, "Failed to free checkout token");
            }
        }

        match (released, refund_failure) {
            (Err(rollback), _) => {
                tracing::error!(original = %err, error = %rollback, "Checkout rollback failed");
                rollback
            }
            (Ok(()), Some(refund)) => EngineError::InternalInconsistency(format!(
                "order was not created after payment was approved ({err}) and {refund}"
            )),
            (Ok(()), None) => err,
        }
    }

    async fn refund(&self, order_id: Uuid, payment: &PaymentInfo) -> Result<(), RefundFailed> {
        let Some(gateway) = &self.payment else {
            return Ok(());
        };

        match gateway.refund(order_id, &payment.transaction_id).await {
            Ok(refund_id) => {
                tracing::info!(
                    order_id = %order_id,
                    transaction_id = %payment.transaction_id,
                    refund_id = %refund_id,
                    "Refunded charge of abandoned checkout"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_payment_refund("refunded");
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "Refund of abandoned checkout failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_payment_refund("failed");
                }
                Err(e)
            }
        }
    }
}

fn quantities_by_product(entries: &[CartEntry]) -> BTreeMap<ProductId, u32> {
    let mut lines = BTreeMap::new();
    for entry in entries {
        *lines.entry(entry.product_id.clone()).or_insert(0) += entry.quantity;
    }
    lines
}
