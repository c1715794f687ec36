// ============================================================================
// HTTP API
// ============================================================================
//
// Thin actix-web layer over the engine. Handlers deserialize, call one engine
// operation and serialize the result; every failure leaves as
//
//   { "error": "<Kind>", "message": "...", "details": ... }
//
// with a status derived from the error kind.
//
// ============================================================================

pub mod routes;

use actix_web::{http::StatusCode, web, App, HttpResponse, HttpServer, ResponseError};
use serde::Serialize;
use serde_json::json;
use std::fmt;

use crate::engine::Engine;
use crate::error::EngineError;

pub use routes::configure;

#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    details: serde_json::Value,
}

impl ApiError {
    fn details(&self) -> serde_json::Value {
        match &self.0 {
            EngineError::InsufficientStock { shortages } => json!({ "shortages": shortages }),
            EngineError::InvalidTransition { from, to } => json!({ "from": from, "to": to }),
            EngineError::StaleOrder { order_id } => json!({ "order_id": order_id }),
            EngineError::PaymentDeclined { reason } => json!({ "reason": reason }),
            _ => serde_json::Value::Null,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidTransition { .. } | EngineError::StaleOrder { .. } => StatusCode::CONFLICT,
            EngineError::EmptySelection | EngineError::InsufficientStock { .. } | EngineError::Rejected(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::PaymentDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
            EngineError::InternalInconsistency(_) | EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, kind = self.0.kind(), error = %self.0, "Request failed");
        }

        HttpResponse::build(status).json(ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
            details: self.details(),
        })
    }
}

/// Serve the engine API until the server is stopped
pub async fn start_api_server(engine: Engine, host: &str, port: u16) -> std::io::Result<()> {
    tracing::info!("🛒 Starting API server on http://{}:{}", host, port);

    let engine = web::Data::new(engine);

    HttpServer::new(move || App::new().app_data(engine.clone()).configure(configure))
        .bind((host, port))?
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus;
    use crate::domain::shared::ProductId;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EngineError::NotFound("order".to_string()), StatusCode::NOT_FOUND),
            (
                EngineError::InvalidTransition {
                    from: OrderStatus::Delivered,
                    to: OrderStatus::Cancelled,
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::EmptySelection, StatusCode::UNPROCESSABLE_ENTITY),
            (
                EngineError::PaymentDeclined {
                    reason: "card expired".to_string(),
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                EngineError::InternalInconsistency("release failed".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).status_code(), expected);
        }
    }

    #[test]
    fn test_shortages_in_details() {
        let err = ApiError(EngineError::insufficient(ProductId::new("sku-9"), 3, 1));
        let details = err.details();
        assert_eq!(details["shortages"][0]["product_id"], "sku-9");
        assert_eq!(details["shortages"][0]["available"], 1);
    }
}
