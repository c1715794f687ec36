use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use std::sync::Arc;

use super::Metrics;
use crate::health::HealthRegistry;

struct ServerState {
    metrics: Arc<Metrics>,
    health: Arc<HealthRegistry>,
}

/// Serve /metrics and /health on a dedicated port
pub async fn start_metrics_server(metrics: Arc<Metrics>, health: Arc<HealthRegistry>, port: u16) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    let state = web::Data::new(ServerState { metrics, health });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(state: web::Data<ServerState>) -> impl Responder {
    match state.metrics.render() {
        Ok(body) => HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn health_handler(state: web::Data<ServerState>) -> impl Responder {
    let report = state.health.report();
    if report.status.is_operational() {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::ServiceUnavailable().json(report)
    }
}
