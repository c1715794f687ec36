use chrono::{Duration, Utc};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::aggregate::OrderAggregate;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::{OrderEvent, SettledLine, StockSettled, StockSettlement};
use super::repository::OrderIndex;
use super::value_objects::{OrderStatus, TrackingInfo};
use crate::audit::{AuditTrail, LifecycleEvent, LifecycleKind};
use crate::domain::cart::{CartStore, UpsertOutcome};
use crate::domain::shared::{Initiator, ProductId};
use crate::domain::stock::{StockError, StockLedger};
use crate::error::EngineError;
use crate::event_sourcing::{Aggregate, EventEnvelope, EventStore, EventStoreError};
use crate::metrics::Metrics;
use crate::utils::KeyedLocks;

// ============================================================================
// Order Lifecycle Manager
// ============================================================================
//
// The single entry point for every change to an existing order:
//
//   lock(order_id) -> load -> handle_command -> stock effect -> append
//
// Stock effects (release on cancel, commit on ship) run before the append.
// If the append then fails the effect is reversed. Units that cannot be
// reversed (another buyer already took released stock) are recorded on the
// order stream as `StockSettled` so no later transition touches them again,
// and the caller gets `InternalInconsistency`.
//
// ============================================================================

/// Upper bound on orders returned by one listing
pub const MAX_LISTED_ORDERS: usize = 50;

/// How many index entries a listing scans before filtering
const LISTING_SCAN_LIMIT: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRequest {
    pub to: OrderStatus,
    #[serde(default)]
    pub tracking: Option<TrackingInfo>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_initiator")]
    pub initiator: Initiator,
}

fn default_initiator() -> Initiator {
    Initiator::Retailer
}

/// An order as shown to callers, with derived flags
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order: OrderAggregate,
    pub cancellable: bool,
}

impl From<OrderAggregate> for OrderView {
    fn from(order: OrderAggregate) -> Self {
        let cancellable = order.is_cancellable();
        Self { order, cancellable }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    /// Only orders placed within the last N days
    pub within_days: Option<u32>,
    /// Case-insensitive match on order number or item name
    pub search: Option<String>,
}

impl OrderQuery {
    fn matches(&self, order: &OrderAggregate) -> bool {
        if let Some(status) = self.status {
            if order.status != status {
                return false;
            }
        }

        if let Some(days) = self.within_days {
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            if order.timestamps.order_date < cutoff {
                return false;
            }
        }

        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let hit = order.order_number.to_lowercase().contains(&needle)
                || order
                    .items
                    .iter()
                    .any(|item| item.name_snapshot.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestagedItem {
    pub product_id: ProductId,
    pub variant: Option<String>,
    pub requested: u32,
    /// Quantity now in the cart after clamping
    pub quantity: u32,
    pub clamped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OutOfStock,
    Discontinued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub product_id: ProductId,
    pub variant: Option<String>,
    pub requested: u32,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReorderReport {
    pub restaged: Vec<RestagedItem>,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StockEffect {
    Release,
    Commit,
}

impl StockEffect {
    fn for_target(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Cancelled => Some(StockEffect::Release),
            OrderStatus::Shipped => Some(StockEffect::Commit),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            StockEffect::Release => "release",
            StockEffect::Commit => "commit",
        }
    }

    fn settlement(&self) -> StockSettlement {
        match self {
            StockEffect::Release => StockSettlement::Released,
            StockEffect::Commit => StockSettlement::Committed,
        }
    }
}

pub struct OrderLifecycleManager {
    events: Arc<dyn EventStore<OrderEvent>>,
    index: Arc<dyn OrderIndex>,
    ledger: Arc<StockLedger>,
    cart: Arc<CartStore>,
    audit: AuditTrail,
    locks: KeyedLocks<Uuid>,
    metrics: Option<Arc<Metrics>>,
}

impl OrderLifecycleManager {
    pub fn new(
        events: Arc<dyn EventStore<OrderEvent>>,
        index: Arc<dyn OrderIndex>,
        ledger: Arc<StockLedger>,
        cart: Arc<CartStore>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            events,
            index,
            ledger,
            cart,
            audit,
            locks: KeyedLocks::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Rebuild an order from its event stream
    pub async fn get(&self, order_id: Uuid) -> Result<OrderAggregate, EngineError> {
        let history = self.events.load_events(order_id).await.map_err(|e| store_error(order_id, e))?;

        let order = OrderAggregate::load_from_events(history)
            .map_err(|e| {
                tracing::error!(order_id = %order_id, error = %e, "Order history cannot be replayed");
                EngineError::from(e)
            })?
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))?;

        if let Err(e) = order.check_invariants() {
            tracing::error!(order_id = %order_id, status = %order.status, error = %e, "Order violates its invariants");
            return Err(e.into());
        }

        Ok(order)
    }

    pub async fn view(&self, order_id: Uuid) -> Result<OrderView, EngineError> {
        self.get(order_id).await.map(OrderView::from)
    }

    pub async fn is_cancellable(&self, order_id: Uuid) -> Result<bool, EngineError> {
        Ok(self.get(order_id).await?.is_cancellable())
    }

    pub async fn transition(&self, order_id: Uuid, request: TransitionRequest) -> Result<OrderAggregate, EngineError> {
        let command = OrderCommand::Transition {
            to: request.to,
            tracking: request.tracking,
            reason: request.reason,
            initiator: request.initiator,
        };
        self.execute(order_id, command).await
    }

    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        initiator: Initiator,
    ) -> Result<OrderAggregate, EngineError> {
        let command = OrderCommand::Transition {
            to: OrderStatus::Cancelled,
            tracking: None,
            reason,
            initiator,
        };
        self.execute(order_id, command).await
    }

    pub async fn attach_tracking(&self, order_id: Uuid, tracking: TrackingInfo) -> Result<OrderAggregate, EngineError> {
        self.execute(order_id, OrderCommand::AttachTracking { tracking }).await
    }

    /// Stage the items of a finished order into the buyer's cart again.
    ///
    /// Quantities are clamped to current stock; items with no stock or no
    /// stock record are listed under `skipped`.
    pub async fn reorder(&self, order_id: Uuid) -> Result<ReorderReport, EngineError> {
        let order = self.get(order_id).await?;

        if !order.status.is_reorderable() {
            if let Some(metrics) = &self.metrics {
                metrics.record_transition_rejection("NotReorderable");
            }
            return Err(OrderError::NotReorderable(order.status).into());
        }

        let mut report = ReorderReport::default();

        for item in &order.items {
            let outcome = self
                .cart
                .upsert(order.buyer_id, item.product_id.clone(), item.variant.clone(), i64::from(item.quantity))
                .await;

            let skip = |reason| SkippedItem {
                product_id: item.product_id.clone(),
                variant: item.variant.clone(),
                requested: item.quantity,
                reason,
            };

            match outcome {
                Ok(UpsertOutcome::Stored { entry, clamped }) => report.restaged.push(RestagedItem {
                    product_id: item.product_id.clone(),
                    variant: item.variant.clone(),
                    requested: item.quantity,
                    quantity: entry.quantity,
                    clamped,
                }),
                Ok(UpsertOutcome::Removed) | Err(EngineError::InsufficientStock { .. }) => {
                    report.skipped.push(skip(SkipReason::OutOfStock))
                }
                Err(EngineError::NotFound(_)) => report.skipped.push(skip(SkipReason::Discontinued)),
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            order_id = %order_id,
            buyer_id = %order.buyer_id,
            restaged = report.restaged.len(),
            skipped = report.skipped.len(),
            "Reordered items into cart"
        );

        self.audit.record(
            LifecycleEvent::new(LifecycleKind::Reordered, order.id, order.buyer_id, &order.order_number, order.status)
                .with_detail(format!("restaged {}, skipped {}", report.restaged.len(), report.skipped.len())),
        );

        Ok(report)
    }

    /// A buyer's orders, newest first, at most `MAX_LISTED_ORDERS`
    pub async fn list_for_buyer(&self, buyer_id: Uuid, query: &OrderQuery) -> Result<Vec<OrderView>, EngineError> {
        let ids = self.index.orders_for(buyer_id, LISTING_SCAN_LIMIT).await?;

        let mut orders: Vec<OrderAggregate> = try_join_all(ids.into_iter().map(|id| self.get(id)))
            .await?
            .into_iter()
            .filter(|order| order.buyer_id == buyer_id && query.matches(order))
            .collect();

        orders.sort_by(|a, b| b.timestamps.order_date.cmp(&a.timestamps.order_date));
        orders.truncate(MAX_LISTED_ORDERS);

        Ok(orders.into_iter().map(OrderView::from).collect())
    }

    /// Persist a freshly placed order. Only the checkout orchestrator calls this.
    pub(crate) async fn place(
        &self,
        order_id: Uuid,
        placed: OrderEvent,
        correlation_id: Uuid,
    ) -> Result<OrderAggregate, EngineError> {
        let mut order = OrderAggregate::apply_first_event(order_id, &placed)?;

        let envelope = EventEnvelope::new(order_id, 1, placed, correlation_id).with_metadata("source", "checkout");
        let version = self
            .events
            .append_events(order_id, 0, vec![envelope])
            .await
            .map_err(|e| store_error(order_id, e))?;
        order.set_version(version);

        if let Err(e) = self.index.record(order.buyer_id, order_id, order.timestamps.order_date).await {
            // The order is durable; only the buyer listing is missing it
            tracing::error!(order_id = %order_id, buyer_id = %order.buyer_id, error = %e, "Failed to index order");
        }

        Ok(order)
    }

    async fn execute(&self, order_id: Uuid, command: OrderCommand) -> Result<OrderAggregate, EngineError> {
        let _guard = self.locks.lock(&order_id).await;

        let mut order = self.get(order_id).await?;
        let from = order.status;

        let events = match order.handle_command(&command) {
            Ok(events) => events,
            Err(e) => {
                let err = EngineError::from(e);
                tracing::debug!(order_id = %order_id, from = %from, error = %err, "Order command rejected");
                if let Some(metrics) = &self.metrics {
                    metrics.record_transition_rejection(err.kind());
                }
                return Err(err);
            }
        };

        let target = events.iter().find_map(OrderEvent::target_status);
        let effect = target.and_then(StockEffect::for_target);
        let lines = order.held_stock();

        if let Some(effect) = effect {
            self.apply_stock_effect(&order, effect, &lines).await?;
        }

        let initiator = match &command {
            OrderCommand::Transition { initiator, .. } => Some(*initiator),
            OrderCommand::AttachTracking { .. } => None,
        };
        let correlation_id = Uuid::now_v7();
        let envelopes = events
            .iter()
            .cloned()
            .map(|event| {
                let envelope = EventEnvelope::new(order_id, 0, event, correlation_id);
                match initiator {
                    Some(initiator) => envelope.with_metadata("initiator", initiator.as_str()),
                    None => envelope,
                }
            })
            .collect();

        let version = match self.events.append_events(order_id, order.version, envelopes).await {
            Ok(version) => version,
            Err(e) => {
                let err = store_error(order_id, e);
                if let Some(effect) = effect {
                    if let Err(stranded) = self.undo_stock_effect(&order, effect, &lines).await {
                        return Err(self.settle_stranded(&order, effect, stranded, &err).await);
                    }
                }
                return Err(err);
            }
        };

        for event in &events {
            order.apply_event(event)?;
        }
        order.set_version(version);

        match target {
            Some(to) => {
                tracing::info!(order_id = %order_id, buyer_id = %order.buyer_id, from = %from, to = %to, "Order transitioned");
                if let Some(metrics) = &self.metrics {
                    metrics.record_transition(from.as_str(), to.as_str());
                }
                let mut event = LifecycleEvent::new(LifecycleKind::StatusChanged, order_id, order.buyer_id, &order.order_number, to)
                    .with_from(from);
                if let Some(reason) = order.cancellation_reason.as_ref().filter(|_| to == OrderStatus::Cancelled) {
                    event = event.with_detail(reason.clone());
                }
                self.audit.record(event);
            }
            None => {
                tracing::info!(order_id = %order_id, status = %order.status, "Tracking attached");
                self.audit.record(LifecycleEvent::new(
                    LifecycleKind::TrackingAttached,
                    order_id,
                    order.buyer_id,
                    &order.order_number,
                    order.status,
                ));
            }
        }

        Ok(order)
    }

    /// Apply the ledger side of a transition to every line, or to none.
    async fn apply_stock_effect(
        &self,
        order: &OrderAggregate,
        effect: StockEffect,
        lines: &BTreeMap<ProductId, u32>,
    ) -> Result<(), EngineError> {
        let mut done: BTreeMap<ProductId, u32> = BTreeMap::new();

        for (product_id, &quantity) in lines {
            let result = match effect {
                StockEffect::Release => self.ledger.release(product_id, quantity).await,
                StockEffect::Commit => self.ledger.commit(product_id, quantity).await,
            };

            if let Err(e) = result {
                tracing::error!(
                    order_id = %order.id,
                    status = %order.status,
                    product_id = %product_id,
                    quantity,
                    op = effect.as_str(),
                    error = %e,
                    "Stock ledger disagrees with order, transition aborted"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_transition_rejection("InternalInconsistency");
                }

                let cause = format!("{} of {} x{} failed: {}", effect.as_str(), product_id, quantity, e);
                if let Err(stranded) = self.undo_stock_effect(order, effect, &done).await {
                    return Err(self.settle_stranded(order, effect, stranded, &cause).await);
                }
                return Err(EngineError::InternalInconsistency(format!("{cause} (order {})", order.id)));
            }

            done.insert(product_id.clone(), quantity);
        }

        Ok(())
    }

    /// Reverse an applied effect line by line. `Err` carries the lines that
    /// stayed applied.
    async fn undo_stock_effect(
        &self,
        order: &OrderAggregate,
        effect: StockEffect,
        lines: &BTreeMap<ProductId, u32>,
    ) -> Result<(), BTreeMap<ProductId, u32>> {
        let mut stranded = BTreeMap::new();

        for (product_id, &quantity) in lines {
            let result: Result<_, StockError> = match effect {
                StockEffect::Release => self.ledger.reserve(product_id, quantity).await,
                StockEffect::Commit => self.ledger.revert_commit(product_id, quantity).await,
            };

            if let Err(e) = result {
                tracing::error!(
                    order_id = %order.id,
                    product_id = %product_id,
                    quantity,
                    op = effect.as_str(),
                    error = %e,
                    "Failed to reverse stock effect"
                );
                stranded.insert(product_id.clone(), quantity);
            }
        }

        if stranded.is_empty() {
            Ok(())
        } else {
            Err(stranded)
        }
    }

    /// Append `StockSettled` for the stranded lines and build the error for
    /// the caller. Runs under the order lock.
    async fn settle_stranded(
        &self,
        order: &OrderAggregate,
        effect: StockEffect,
        stranded: BTreeMap<ProductId, u32>,
        cause: &dyn std::fmt::Display,
    ) -> EngineError {
        let described = stranded
            .iter()
            .map(|(product_id, quantity)| format!("{product_id} x{quantity}"))
            .collect::<Vec<_>>()
            .join(", ");

        let event = OrderEvent::StockSettled(StockSettled {
            lines: stranded
                .into_iter()
                .map(|(product_id, quantity)| SettledLine {
                    product_id,
                    quantity,
                    settlement: effect.settlement(),
                })
                .collect(),
            at: Utc::now(),
        });

        let recorded = match self.events.current_version(order.id).await {
            Ok(version) => {
                let envelope = EventEnvelope::new(order.id, 0, event, Uuid::now_v7()).with_metadata("source", "compensation");
                self.events.append_events(order.id, version, vec![envelope]).await.map(|_| ())
            }
            Err(e) => Err(e),
        };

        let outcome = match recorded {
            Ok(()) => {
                tracing::warn!(order_id = %order.id, op = effect.as_str(), lines = %described, "Recorded stock the order no longer backs");
                "recorded on the order".to_string()
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    op = effect.as_str(),
                    lines = %described,
                    error = %e,
                    "Stock settlement could not be recorded, order and ledger disagree"
                );
                format!("not recorded: {e}")
            }
        };

        EngineError::InternalInconsistency(format!(
            "{} for order {} could not be reversed after {}; stranded {} ({})",
            effect.as_str(),
            order.id,
            cause,
            described,
            outcome
        ))
    }
}

fn store_error(order_id: Uuid, err: EventStoreError) -> EngineError {
    match err {
        EventStoreError::ConcurrencyConflict { expected, actual, .. } => {
            tracing::warn!(order_id = %order_id, expected, actual, "Order changed underneath this request");
            EngineError::StaleOrder { order_id }
        }
        EventStoreError::EmptyAppend => EngineError::InternalInconsistency(format!("empty append for order {order_id}")),
        EventStoreError::Storage(e) => EngineError::Storage(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;

    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use crate::domain::stock::{StockRecord, StockRepository};
    use crate::engine::test_support::{harness, harness_with, FlakyOrderEvents};
    use crate::engine::Backends;
    use crate::error::StorageError;
    use crate::storage::memory::InMemoryStockRepository;

    /// Stock repository that can drop a product's record, as when a product
    /// is withdrawn from sale
    #[derive(Default)]
    struct WithdrawableStock {
        inner: InMemoryStockRepository,
        withdrawn: Mutex<HashSet<ProductId>>,
    }

    impl WithdrawableStock {
        fn withdraw(&self, sku: &str) {
            self.withdrawn.lock().unwrap().insert(ProductId::new(sku));
        }
    }

    #[async_trait]
    impl StockRepository for WithdrawableStock {
        async fn load(&self, product_id: &ProductId) -> Result<Option<StockRecord>, StorageError> {
            if self.withdrawn.lock().unwrap().contains(product_id) {
                return Ok(None);
            }
            self.inner.load(product_id).await
        }

        async fn insert(&self, record: &StockRecord) -> Result<bool, StorageError> {
            self.inner.insert(record).await
        }

        async fn compare_and_swap(&self, expected_version: i64, next: &StockRecord) -> Result<bool, StorageError> {
            self.inner.compare_and_swap(expected_version, next).await
        }
    }

    async fn deliver(orders: &OrderLifecycleManager, order_id: Uuid) {
        orders.transition(order_id, to(OrderStatus::Confirmed)).await.unwrap();
        orders.transition(order_id, to(OrderStatus::Processing)).await.unwrap();
        orders
            .transition(
                order_id,
                TransitionRequest {
                    tracking: Some(tracking()),
                    ..to(OrderStatus::Shipped)
                },
            )
            .await
            .unwrap();
        orders.transition(order_id, to(OrderStatus::Delivered)).await.unwrap();
    }

    fn tracking() -> TrackingInfo {
        TrackingInfo {
            number: "AWB123456".to_string(),
            carrier: "BlueDart".to_string(),
            estimated_delivery: None,
        }
    }

    fn to(status: OrderStatus) -> TransitionRequest {
        TransitionRequest {
            to: status,
            tracking: None,
            reason: None,
            initiator: Initiator::Retailer,
        }
    }

    #[tokio::test]
    async fn test_happy_path_commits_stock_on_ship() {
        let mut h = harness(&[("A", 10, 100)]).await;
        let order = h.place(Uuid::new_v4(), &[("A", 3)]).await;
        let orders = &h.engine.orders;

        orders.transition(order.id, to(OrderStatus::Confirmed)).await.unwrap();
        orders.transition(order.id, to(OrderStatus::Processing)).await.unwrap();

        let shipped = orders
            .transition(
                order.id,
                TransitionRequest {
                    tracking: Some(tracking()),
                    ..to(OrderStatus::Shipped)
                },
            )
            .await
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert_eq!(shipped.tracking, Some(tracking()));
        assert!(shipped.timestamps.shipped_at.is_some());

        let a = h.stock("A").await;
        assert_eq!((a.available, a.reserved), (7, 0));

        let delivered = orders.transition(order.id, to(OrderStatus::Delivered)).await.unwrap();
        assert!(delivered.timestamps.delivered_at.is_some());
        assert_eq!(delivered.version, 5);
        assert!(!orders.is_cancellable(order.id).await.unwrap());

        let transitions: Vec<(Option<OrderStatus>, OrderStatus)> = h
            .drain_audit()
            .into_iter()
            .filter(|e| e.kind == LifecycleKind::StatusChanged)
            .map(|e| (e.from, e.to))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (Some(OrderStatus::Pending), OrderStatus::Confirmed),
                (Some(OrderStatus::Confirmed), OrderStatus::Processing),
                (Some(OrderStatus::Processing), OrderStatus::Shipped),
                (Some(OrderStatus::Shipped), OrderStatus::Delivered),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_releases_reservations() {
        let h = harness(&[("A", 10, 100), ("B", 4, 50)]).await;
        let order = h.place(Uuid::new_v4(), &[("A", 2), ("B", 4)]).await;
        assert!(h.engine.orders.is_cancellable(order.id).await.unwrap());

        let cancelled = h
            .engine
            .orders
            .cancel(order.id, Some("ordered by mistake".to_string()), Initiator::Buyer)
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("ordered by mistake"));
        assert_eq!(cancelled.cancelled_by, Some(Initiator::Buyer));

        let a = h.stock("A").await;
        assert_eq!((a.available, a.reserved), (10, 0));
        let b = h.stock("B").await;
        assert_eq!((b.available, b.reserved), (4, 0));

        let view = h.engine.orders.view(order.id).await.unwrap();
        assert!(!view.cancellable);
    }

    #[tokio::test]
    async fn test_illegal_edges_change_nothing() {
        let h = harness(&[("A", 10, 100)]).await;
        let order = h.place(Uuid::new_v4(), &[("A", 1)]).await;
        let orders = &h.engine.orders;

        let err = orders.transition(order.id, to(OrderStatus::Shipped)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped
            }
        ));

        orders.transition(order.id, to(OrderStatus::Confirmed)).await.unwrap();
        orders.transition(order.id, to(OrderStatus::Processing)).await.unwrap();

        // Processing can no longer be cancelled
        let err = orders.cancel(order.id, None, Initiator::Buyer).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        // Shipping needs tracking information
        let err = orders.transition(order.id, to(OrderStatus::Shipped)).await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));

        let current = orders.get(order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Processing);
        assert_eq!(h.stock("A").await.reserved, 1);
    }

    #[tokio::test]
    async fn test_attached_tracking_allows_ship() {
        let h = harness(&[("A", 10, 100)]).await;
        let order = h.place(Uuid::new_v4(), &[("A", 1)]).await;
        let orders = &h.engine.orders;

        let err = orders.attach_tracking(order.id, tracking()).await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));

        orders.transition(order.id, to(OrderStatus::Confirmed)).await.unwrap();
        let with_tracking = orders.attach_tracking(order.id, tracking()).await.unwrap();
        assert_eq!(with_tracking.status, OrderStatus::Confirmed);
        assert_eq!(with_tracking.tracking, Some(tracking()));

        orders.transition(order.id, to(OrderStatus::Processing)).await.unwrap();
        let shipped = orders.transition(order.id, to(OrderStatus::Shipped)).await.unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn test_ledger_disagreement_aborts_transition() {
        let h = harness(&[("A", 10, 100), ("B", 10, 100)]).await;
        let order = h.place(Uuid::new_v4(), &[("A", 2), ("B", 3)]).await;

        // Someone else drained B's reservation behind the order's back
        h.engine.ledger.release(&ProductId::new("B"), 3).await.unwrap();

        let err = h.engine.orders.cancel(order.id, None, Initiator::Buyer).await.unwrap_err();
        assert!(matches!(err, EngineError::InternalInconsistency(_)));

        // A's release was reversed and the order did not move
        let a = h.stock("A").await;
        assert_eq!((a.available, a.reserved), (8, 2));
        assert_eq!(h.engine.orders.get(order.id).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_cancel_append_is_undone() {
        let events = Arc::new(FlakyOrderEvents::new());
        let mut backends = Backends::in_memory();
        backends.order_events = events.clone();
        let h = harness_with(&[("A", 6, 100)], backends, None).await;
        let order = h.place(Uuid::new_v4(), &[("A", 2)]).await;

        events.fail_next(1);
        let err = h.engine.orders.cancel(order.id, None, Initiator::Buyer).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));

        // The release was reversed, the order still holds its units
        let a = h.stock("A").await;
        assert_eq!((a.available, a.reserved), (4, 2));
        let current = h.engine.orders.get(order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Pending);
        assert!(current.settled_stock.is_empty());

        h.engine.orders.cancel(order.id, None, Initiator::Buyer).await.unwrap();
        let a = h.stock("A").await;
        assert_eq!((a.available, a.reserved), (6, 0));
    }

    #[tokio::test]
    async fn test_unreversible_cancel_never_releases_twice() {
        let events = Arc::new(FlakyOrderEvents::new());
        let mut backends = Backends::in_memory();
        backends.order_events = events.clone();
        let h = harness_with(&[("A", 6, 100)], backends, None).await;
        let order = h.place(Uuid::new_v4(), &[("A", 2)]).await;

        // The cancel's append fails after a rival took every released unit
        events.rival_reserves(h.engine.ledger.clone(), "A", 6);
        events.fail_next(1);
        let err = h.engine.orders.cancel(order.id, None, Initiator::Buyer).await.unwrap_err();
        match err {
            EngineError::InternalInconsistency(message) => {
                assert!(message.contains("A x2"));
                assert!(message.contains("recorded on the order"));
            }
            other => panic!("expected InternalInconsistency, got {other:?}"),
        }

        let a = h.stock("A").await;
        assert_eq!((a.available, a.reserved), (0, 6));

        let current = h.engine.orders.get(order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Pending);
        assert!(current.held_stock().is_empty());

        // Nothing but a cancel is allowed, and it leaves the rival's units alone
        let err = h.engine.orders.transition(order.id, to(OrderStatus::Confirmed)).await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));

        let cancelled = h.engine.orders.cancel(order.id, None, Initiator::System).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        let a = h.stock("A").await;
        assert_eq!((a.available, a.reserved), (0, 6));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancels_release_once() {
        let h = harness(&[("A", 10, 100)]).await;
        let order = h.place(Uuid::new_v4(), &[("A", 4)]).await;

        let results = join_all((0..4).map(|_| h.engine.orders.cancel(order.id, None, Initiator::Buyer))).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::InvalidTransition { .. })));

        let a = h.stock("A").await;
        assert_eq!((a.available, a.reserved), (10, 0));
    }

    #[tokio::test]
    async fn test_reorder_restages_with_clamping() {
        let h = harness(&[("A", 10, 100), ("B", 10, 100), ("C", 10, 100)]).await;
        let buyer = Uuid::new_v4();
        let order = h.place(buyer, &[("A", 2), ("B", 5), ("C", 1)]).await;
        let orders = &h.engine.orders;

        let err = orders.reorder(order.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));

        orders.cancel(order.id, None, Initiator::Buyer).await.unwrap();

        // B drops to 3 units, C sells out
        h.place(Uuid::new_v4(), &[("B", 7)]).await;
        h.place(Uuid::new_v4(), &[("C", 10)]).await;

        let report = orders.reorder(order.id).await.unwrap();

        assert_eq!(report.restaged.len(), 2);
        let b = report
            .restaged
            .iter()
            .find(|item| item.product_id == ProductId::new("B"))
            .unwrap();
        assert_eq!((b.requested, b.quantity, b.clamped), (5, 3, true));
        assert_eq!(
            report.skipped,
            vec![SkippedItem {
                product_id: ProductId::new("C"),
                variant: None,
                requested: 1,
                reason: SkipReason::OutOfStock,
            }]
        );

        // Reorder only stages; nothing is reserved or selected
        assert_eq!(h.stock("A").await.reserved, 0);
        assert!(h.engine.cart.list_selected(buyer).await.unwrap().is_empty());
        assert_eq!(h.engine.cart.view(buyer).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reorder_delivered_order_skips_sold_out_item() {
        let h = harness(&[("A", 10, 100), ("B", 5, 100)]).await;
        let buyer = Uuid::new_v4();
        let order = h.place(buyer, &[("A", 2), ("B", 1)]).await;
        deliver(&h.engine.orders, order.id).await;

        // The remaining B units go to someone else
        h.place(Uuid::new_v4(), &[("B", 4)]).await;

        let report = h.engine.orders.reorder(order.id).await.unwrap();

        assert_eq!(
            report.restaged,
            vec![RestagedItem {
                product_id: ProductId::new("A"),
                variant: None,
                requested: 2,
                quantity: 2,
                clamped: false,
            }]
        );
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].product_id, ProductId::new("B"));
        assert_eq!(report.skipped[0].reason, SkipReason::OutOfStock);

        let cart = h.engine.cart.view(buyer).await.unwrap();
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].entry.product_id, ProductId::new("A"));
    }

    #[tokio::test]
    async fn test_reorder_returned_order_skips_withdrawn_product() {
        let stock = Arc::new(WithdrawableStock::default());
        let mut backends = Backends::in_memory();
        backends.stock = stock.clone();
        let h = harness_with(&[("A", 10, 100), ("C", 10, 100)], backends, None).await;
        let buyer = Uuid::new_v4();

        let order = h.place(buyer, &[("A", 1), ("C", 3)]).await;
        deliver(&h.engine.orders, order.id).await;
        h.engine.orders.transition(order.id, to(OrderStatus::Returned)).await.unwrap();

        stock.withdraw("C");
        let report = h.engine.orders.reorder(order.id).await.unwrap();

        assert_eq!(report.restaged.len(), 1);
        assert_eq!(report.restaged[0].product_id, ProductId::new("A"));
        assert_eq!(
            report.skipped,
            vec![SkippedItem {
                product_id: ProductId::new("C"),
                variant: None,
                requested: 3,
                reason: SkipReason::Discontinued,
            }]
        );
    }

    #[tokio::test]
    async fn test_list_for_buyer_filters() {
        let h = harness(&[("A", 50, 100), ("B", 50, 100)]).await;
        let buyer = Uuid::new_v4();

        let first = h.place(buyer, &[("A", 1)]).await;
        let second = h.place(buyer, &[("B", 1)]).await;
        h.place(Uuid::new_v4(), &[("A", 1)]).await;

        h.engine.orders.cancel(first.id, None, Initiator::Buyer).await.unwrap();

        let all = h.engine.orders.list_for_buyer(buyer, &OrderQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].order.id, second.id);

        let cancelled = h
            .engine
            .orders
            .list_for_buyer(
                buyer,
                &OrderQuery {
                    status: Some(OrderStatus::Cancelled),
                    ..OrderQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].order.id, first.id);

        let by_name = h
            .engine
            .orders
            .list_for_buyer(
                buyer,
                &OrderQuery {
                    search: Some("product b".to_string()),
                    within_days: Some(1),
                    ..OrderQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].order.id, second.id);
        assert!(by_name[0].cancellable);
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let h = harness(&[]).await;
        let err = h.engine.orders.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
