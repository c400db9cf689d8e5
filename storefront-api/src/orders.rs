use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use storefront_core::{NewOrder, Order};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrderLookupQuery {
    pub number: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderLookupResponse {
    pub orders: Vec<Order>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/orders", get(lookup_orders).post(place_order))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /v1/orders
async fn place_order(
    State(state): State<AppState>,
    Json(req): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state.coordinator.place_order(req).await?;
    info!("Checkout completed for order {}", order.order_number);
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/orders?number=... or ?email=...
async fn lookup_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderLookupQuery>,
) -> Result<Json<OrderLookupResponse>, AppError> {
    let number = query.number.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let email = query.email.as_deref().map(str::trim).filter(|e| !e.is_empty());

    let orders = match (number, email) {
        (Some(number), _) => vec![state.coordinator.get_order_by_number(number).await?],
        (None, Some(email)) => state.coordinator.orders_for_email(email).await?,
        (None, None) => {
            return Err(AppError::ValidationError(
                "Provide an order number or an email".to_string(),
            ))
        }
    };

    Ok(Json(OrderLookupResponse { orders }))
}
