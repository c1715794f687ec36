use anyhow::Context;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditSink, AuditTrail, TracingAuditSink};
use crate::collaborators::{PaymentGateway, ProductCatalog};
use crate::config::{CartBackend, Config, StorageBackend};
use crate::domain::cart::{CartRepository, CartStore};
use crate::domain::checkout::{CheckoutOrchestrator, CheckoutTokenStore};
use crate::domain::order::{OrderEvent, OrderIndex, OrderLifecycleManager, PricingPolicy};
use crate::domain::stock::{StockLedger, StockRepository};
use crate::event_sourcing::{EventStore, InMemoryEventStore, ScyllaEventStore};
use crate::metrics::Metrics;
use crate::storage::{
    ensure_schema, InMemoryCartRepository, InMemoryCheckoutTokens, InMemoryOrderIndex, InMemoryStockRepository,
    RedisCartRepository, ScyllaCheckoutTokens, ScyllaOrderIndex, ScyllaStockRepository, ORDER_EVENTS_TABLE,
};
use crate::utils::RetryConfig;

// ============================================================================
// Engine Wiring
// ============================================================================
//
// Builds the four components over one set of backends:
//
//   StockLedger  <- CartStore  <- OrderLifecycleManager
//        ^             ^                 ^
//        +-------------+---- CheckoutOrchestrator
//
// All components share the same ledger, so every stock mutation goes through
// one compare-and-swap path regardless of which component issued it.
//
// ============================================================================

pub struct Backends {
    pub stock: Arc<dyn StockRepository>,
    pub carts: Arc<dyn CartRepository>,
    pub order_events: Arc<dyn EventStore<OrderEvent>>,
    pub order_index: Arc<dyn OrderIndex>,
    pub tokens: Arc<dyn CheckoutTokenStore>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            stock: Arc::new(InMemoryStockRepository::new()),
            carts: Arc::new(InMemoryCartRepository::new()),
            order_events: Arc::new(InMemoryEventStore::<OrderEvent>::new()),
            order_index: Arc::new(InMemoryOrderIndex::new()),
            tokens: Arc::new(InMemoryCheckoutTokens::new()),
        }
    }

    /// Connect whatever the configuration selects
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let mut backends = Self::in_memory();

        if config.storage.backend == StorageBackend::Scylla {
            let session = connect_scylla(config).await?;
            backends.stock = Arc::new(ScyllaStockRepository::new(session.clone()));
            backends.order_events = Arc::new(ScyllaEventStore::<OrderEvent>::new(
                session.clone(),
                ORDER_EVENTS_TABLE,
                "Order",
            ));
            backends.order_index = Arc::new(ScyllaOrderIndex::new(session.clone()));
            backends.tokens = Arc::new(ScyllaCheckoutTokens::new(session));
        }

        if config.cart.backend == CartBackend::Redis {
            let carts = RedisCartRepository::new(&config.cart.redis_url, config.cart_ttl())
                .await
                .context("Failed to connect cart store to Redis")?;
            backends.carts = Arc::new(carts);
        }

        Ok(backends)
    }
}

async fn connect_scylla(config: &Config) -> anyhow::Result<Arc<Session>> {
    tracing::info!(nodes = ?config.storage.scylla_nodes, "Connecting to ScyllaDB...");

    let session: Session = SessionBuilder::new()
        .known_nodes(&config.storage.scylla_nodes)
        .build()
        .await
        .context("Failed to connect to ScyllaDB")?;

    ensure_schema(&session, &config.storage.scylla_keyspace).await?;

    Ok(Arc::new(session))
}

pub struct EngineOptions {
    pub stock_retry: RetryConfig,
    pub pricing: PricingPolicy,
    pub audit_sink: Arc<dyn AuditSink>,
    pub payment: Option<Arc<dyn PaymentGateway>>,
    pub metrics: Option<Arc<Metrics>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stock_retry: RetryConfig::stock_cas(8, Duration::from_millis(2)),
            pricing: PricingPolicy::default(),
            audit_sink: Arc::new(TracingAuditSink),
            payment: None,
            metrics: None,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    pub ledger: Arc<StockLedger>,
    pub cart: Arc<CartStore>,
    pub orders: Arc<OrderLifecycleManager>,
    pub checkout: Arc<CheckoutOrchestrator>,
}

impl Engine {
    pub fn build(backends: Backends, catalog: Arc<dyn ProductCatalog>, options: EngineOptions) -> Self {
        let mut audit = AuditTrail::new(options.audit_sink);

        let mut ledger = StockLedger::new(backends.stock, options.stock_retry);
        if let Some(metrics) = &options.metrics {
            ledger = ledger.with_metrics(metrics.clone());
            audit = audit.with_metrics(metrics.clone());
        }
        let ledger = Arc::new(ledger);

        let cart = Arc::new(CartStore::new(backends.carts, ledger.clone()));

        let mut orders = OrderLifecycleManager::new(
            backends.order_events,
            backends.order_index,
            ledger.clone(),
            cart.clone(),
            audit.clone(),
        );
        if let Some(metrics) = &options.metrics {
            orders = orders.with_metrics(metrics.clone());
        }
        let orders = Arc::new(orders);

        let mut checkout = CheckoutOrchestrator::new(
            cart.clone(),
            ledger.clone(),
            orders.clone(),
            backends.tokens,
            catalog,
            options.pricing,
            audit,
        );
        if let Some(gateway) = options.payment {
            checkout = checkout.with_payment(gateway);
        }
        if let Some(metrics) = options.metrics {
            checkout = checkout.with_metrics(metrics);
        }

        Self {
            ledger,
            cart,
            orders,
            checkout: Arc::new(checkout),
        }
    }

    /// Everything in process memory, default pricing, audit to the log
    pub fn in_memory(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self::build(Backends::in_memory(), catalog, EngineOptions::default())
    }

    /// Build from configuration, connecting the selected backends
    pub async fn from_config(
        config: &Config,
        catalog: Arc<dyn ProductCatalog>,
        audit_sink: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let backends = Backends::connect(config).await?;
        let options = EngineOptions {
            stock_retry: config.stock_retry(),
            pricing: config.pricing_policy(),
            audit_sink,
            payment: None,
            metrics: Some(metrics),
        };

        tracing::info!(
            storage = ?config.storage.backend,
            cart = ?config.cart.backend,
            "Engine components ready"
        );
        Ok(Self::build(backends, catalog, options))
    }
}
