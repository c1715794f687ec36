use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::ApiError;
use crate::domain::checkout::CheckoutRequest;
use crate::domain::order::{OrderQuery, OrderView, TrackingInfo, TransitionRequest};
use crate::domain::shared::{Initiator, ProductId};
use crate::engine::Engine;

type ApiResult = Result<HttpResponse, ApiError>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/checkout", web::post().to(checkout))
        .route("/orders/{order_id}", web::get().to(get_order))
        .route("/orders/{order_id}/cancel", web::post().to(cancel_order))
        .route("/orders/{order_id}/transition", web::post().to(transition_order))
        .route("/orders/{order_id}/tracking", web::post().to(attach_tracking))
        .route("/orders/{order_id}/reorder", web::post().to(reorder))
        .route("/buyers/{buyer_id}/orders", web::get().to(list_orders))
        .route("/buyers/{buyer_id}/cart", web::get().to(view_cart))
        .route("/buyers/{buyer_id}/cart/items", web::post().to(upsert_cart_item))
        .route("/buyers/{buyer_id}/cart/items", web::delete().to(remove_cart_item))
        .route("/buyers/{buyer_id}/cart/items/selection", web::put().to(select_cart_item))
        .route("/stock", web::post().to(register_product))
        .route("/stock/{product_id}", web::get().to(stock_availability))
        .route("/stock/{product_id}/restock", web::post().to(restock));
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
struct CancelBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default = "buyer_initiator")]
    initiator: Initiator,
}

fn buyer_initiator() -> Initiator {
    Initiator::Buyer
}

#[derive(Debug, Deserialize)]
struct CartItemBody {
    product_id: ProductId,
    #[serde(default)]
    variant: Option<String>,
    /// Signed change to the current quantity
    delta: i64,
}

#[derive(Debug, Deserialize)]
struct CartKeyBody {
    product_id: ProductId,
    #[serde(default)]
    variant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SelectionBody {
    product_id: ProductId,
    #[serde(default)]
    variant: Option<String>,
    selected: bool,
}

#[derive(Debug, Deserialize)]
struct RegisterProductBody {
    product_id: ProductId,
    initial: u32,
}

#[derive(Debug, Deserialize)]
struct RestockBody {
    quantity: u32,
}

// ============================================================================
// Orders
// ============================================================================

async fn checkout(engine: web::Data<Engine>, body: web::Json<CheckoutRequest>) -> ApiResult {
    let outcome = engine.checkout.checkout(body.into_inner()).await?;

    let mut response = if outcome.replayed {
        HttpResponse::Ok()
    } else {
        HttpResponse::Created()
    };
    Ok(response.json(outcome))
}

async fn get_order(engine: web::Data<Engine>, path: web::Path<Uuid>) -> ApiResult {
    let view = engine.orders.view(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(view))
}

async fn cancel_order(engine: web::Data<Engine>, path: web::Path<Uuid>, body: Option<web::Json<CancelBody>>) -> ApiResult {
    let (reason, initiator) = match body {
        Some(body) => {
            let body = body.into_inner();
            (body.reason, body.initiator)
        }
        None => (None, Initiator::Buyer),
    };

    let order = engine.orders.cancel(path.into_inner(), reason, initiator).await?;
    Ok(HttpResponse::Ok().json(OrderView::from(order)))
}

async fn transition_order(
    engine: web::Data<Engine>,
    path: web::Path<Uuid>,
    body: web::Json<TransitionRequest>,
) -> ApiResult {
    let order = engine.orders.transition(path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(OrderView::from(order)))
}

async fn attach_tracking(engine: web::Data<Engine>, path: web::Path<Uuid>, body: web::Json<TrackingInfo>) -> ApiResult {
    let order = engine.orders.attach_tracking(path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(OrderView::from(order)))
}

async fn reorder(engine: web::Data<Engine>, path: web::Path<Uuid>) -> ApiResult {
    let report = engine.orders.reorder(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(report))
}

async fn list_orders(engine: web::Data<Engine>, path: web::Path<Uuid>, query: web::Query<OrderQuery>) -> ApiResult {
    let orders = engine.orders.list_for_buyer(path.into_inner(), &query).await?;
    Ok(HttpResponse::Ok().json(orders))
}

// ============================================================================
// Cart
// ============================================================================

async fn view_cart(engine: web::Data<Engine>, path: web::Path<Uuid>) -> ApiResult {
    let lines = engine.cart.view(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(lines))
}

async fn upsert_cart_item(engine: web::Data<Engine>, path: web::Path<Uuid>, body: web::Json<CartItemBody>) -> ApiResult {
    let body = body.into_inner();
    let outcome = engine
        .cart
        .upsert(path.into_inner(), body.product_id, body.variant, body.delta)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

async fn remove_cart_item(engine: web::Data<Engine>, path: web::Path<Uuid>, body: web::Json<CartKeyBody>) -> ApiResult {
    let body = body.into_inner();
    let removed = engine.cart.remove(path.into_inner(), body.product_id, body.variant).await?;
    Ok(HttpResponse::Ok().json(json!({ "removed": removed })))
}

async fn select_cart_item(engine: web::Data<Engine>, path: web::Path<Uuid>, body: web::Json<SelectionBody>) -> ApiResult {
    let body = body.into_inner();
    let entry = engine
        .cart
        .set_selected(path.into_inner(), body.product_id, body.variant, body.selected)
        .await?;
    Ok(HttpResponse::Ok().json(entry))
}

// ============================================================================
// Stock administration
// ============================================================================

async fn register_product(engine: web::Data<Engine>, body: web::Json<RegisterProductBody>) -> ApiResult {
    let body = body.into_inner();
    let record = engine
        .ledger
        .register_product(body.product_id, body.initial)
        .await
        .map_err(crate::error::EngineError::from)?;
    Ok(HttpResponse::Created().json(record))
}

async fn stock_availability(engine: web::Data<Engine>, path: web::Path<String>) -> ApiResult {
    let product_id = ProductId::new(path.into_inner());
    let availability = engine
        .ledger
        .availability(&product_id)
        .await
        .map_err(crate::error::EngineError::from)?;
    Ok(HttpResponse::Ok().json(availability))
}

async fn restock(engine: web::Data<Engine>, path: web::Path<String>, body: web::Json<RestockBody>) -> ApiResult {
    let product_id = ProductId::new(path.into_inner());
    let record = engine
        .ledger
        .restock(&product_id, body.quantity)
        .await
        .map_err(crate::error::EngineError::from)?;
    Ok(HttpResponse::Ok().json(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::sync::Arc;

    use crate::collaborators::InMemoryCatalog;

    async fn seeded_engine() -> Engine {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.upsert(ProductId::new("sku-1"), "Linen Shirt", Decimal::from(120), None);
        let engine = Engine::in_memory(catalog);
        engine.ledger.register_product(ProductId::new("sku-1"), 5).await.unwrap();
        engine
    }

    fn address() -> Value {
        json!({
            "street": "1 Main St",
            "city": "Pune",
            "state": "MH",
            "zip_code": "411001",
            "country": "IN"
        })
    }

    #[actix_web::test]
    async fn test_checkout_then_cancel_over_http() {
        let engine = seeded_engine().await;
        let app = test::init_service(App::new().app_data(web::Data::new(engine.clone())).configure(configure)).await;
        let buyer = Uuid::new_v4();

        let req = test::TestRequest::post()
            .uri(&format!("/buyers/{buyer}/cart/items"))
            .set_json(json!({ "product_id": "sku-1", "delta": 2 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::put()
            .uri(&format!("/buyers/{buyer}/cart/items/selection"))
            .set_json(json!({ "product_id": "sku-1", "selected": true }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/checkout")
            .set_json(json!({ "buyerId": buyer, "token": "tok-1", "shipping_address": address() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["replayed"], false);
        assert_eq!(body["order"]["status"], "pending");
        let order_id = body["order"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/orders/{order_id}/cancel"))
            .set_json(json!({ "reason": "changed my mind" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["order"]["status"], "cancelled");
        assert_eq!(body["cancellable"], false);

        let req = test::TestRequest::get().uri("/stock/sku-1").to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["available"], 5);
        assert_eq!(body["reserved"], 0);
    }

    #[actix_web::test]
    async fn test_error_bodies() {
        let engine = seeded_engine().await;
        let app = test::init_service(App::new().app_data(web::Data::new(engine)).configure(configure)).await;
        let buyer = Uuid::new_v4();

        let req = test::TestRequest::post()
            .uri("/checkout")
            .set_json(json!({ "buyer_id": buyer, "token": "tok-1", "shipping_address": address() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "EmptySelection");

        let req = test::TestRequest::get()
            .uri(&format!("/orders/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "NotFound");
    }
}
