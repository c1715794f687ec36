use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use checkout_engine::api::start_api_server;
use checkout_engine::audit::{AuditSink, ChannelAuditSink, FanoutAuditSink, TracingAuditSink};
use checkout_engine::collaborators::InMemoryCatalog;
use checkout_engine::config::Config;
use checkout_engine::domain::shared::ProductId;
use checkout_engine::domain::stock::StockError;
use checkout_engine::health::{spawn_breaker_monitor, HealthRegistry, HealthStatus};
use checkout_engine::messaging::{spawn_audit_forwarder, RedpandaClient};
use checkout_engine::metrics::{start_metrics_server, Metrics};
use checkout_engine::Engine;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=debug
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,checkout_engine=debug")))
        .init();

    tracing::info!("🚀 Starting checkout engine");

    // === 1. Configuration ===
    let config = Config::from_env()?;
    tracing::info!(
        storage = ?config.storage.backend,
        cart = ?config.cart.backend,
        audit_publishing = config.redpanda.brokers.is_some(),
        "Configuration loaded"
    );

    // === 2. Metrics and health ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());
    let health = Arc::new(HealthRegistry::new());

    // === 3. Audit sinks (log always, Redpanda when configured) ===
    let mut sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(TracingAuditSink)];

    if let Some(brokers) = &config.redpanda.brokers {
        let redpanda = Arc::new(RedpandaClient::new(brokers)?);
        let (channel, rx) = ChannelAuditSink::new();
        sinks.push(Arc::new(channel));

        spawn_audit_forwarder(rx, redpanda.clone(), config.redpanda.audit_topic.clone(), Some(metrics.clone()));
        spawn_breaker_monitor(health.clone(), redpanda, Some(metrics.clone()), Duration::from_secs(10));
    }

    // === 4. Engine ===
    let catalog = Arc::new(InMemoryCatalog::new());
    let engine = Engine::from_config(&config, catalog.clone(), Arc::new(FanoutAuditSink::new(sinks)), metrics.clone()).await?;
    health.update("storage", HealthStatus::Healthy);

    seed_demo_catalog(&engine, &catalog).await?;

    // === 5. Serve ===
    let metrics_server = start_metrics_server(metrics, health, config.server.metrics_port);
    let api_server = start_api_server(engine, &config.server.host, config.server.port);

    tokio::try_join!(metrics_server, api_server)?;

    tracing::info!("👋 Checkout engine stopped");
    Ok(())
}

/// Products the demo catalog starts with; stock is only registered once
async fn seed_demo_catalog(engine: &Engine, catalog: &InMemoryCatalog) -> anyhow::Result<()> {
    let products = [
        ("sku-linen-shirt", "Linen Shirt", Decimal::from(1299), 25),
        ("sku-denim-jacket", "Denim Jacket", Decimal::from(3499), 10),
        ("sku-canvas-tote", "Canvas Tote", Decimal::from(399), 100),
    ];

    for (sku, name, price, initial) in products {
        let product_id = ProductId::new(sku);
        catalog.upsert(product_id.clone(), name, price, None);

        match engine.ledger.register_product(product_id, initial).await {
            Ok(_) | Err(StockError::AlreadyRegistered(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(products = products.len(), "Demo catalog seeded");
    Ok(())
}
