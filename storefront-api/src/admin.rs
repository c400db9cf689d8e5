use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use storefront_core::repository::{SortDirection, SortField, DEFAULT_PAGE_SIZE};
use storefront_core::{
    CoreError, DateRange, Order, OrderFilter, OrderQuery, OrderSort, OrderStatus, PaymentStatus,
    RevenueBucket,
};
use storefront_order::coordinator::{DEFAULT_RECENT_ORDERS, DEFAULT_TOP_CUSTOMERS, DEFAULT_TREND_DAYS};
use storefront_order::{Dashboard, DashboardRequest, DispatchOptions};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// `all` or absent means every status; a comma-separated list matches
    /// any of them.
    pub status: Option<String>,
    pub payment_status: Option<String>,
    /// RFC 3339 creation-time bounds, inclusive.
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortDirection>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub item_weight: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchOrderRequest {
    #[serde(default)]
    pub item_weight: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub recent: Option<u32>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub bucket: Option<RevenueBucket>,
    pub top: Option<u32>,
    pub trend_days: Option<u32>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/orders", get(list_orders))
        .route("/v1/admin/orders/{id}", get(get_order))
        .route("/v1/admin/orders/{id}/status", put(update_status))
        .route("/v1/admin/orders/{id}/payment-status", put(update_payment_status))
        .route("/v1/admin/orders/{id}/cancel", post(cancel_order))
        .route("/v1/admin/orders/{id}/dispatch", post(dispatch_order))
        .route("/v1/admin/dashboard", get(dashboard))
}

fn validation(err: CoreError) -> AppError {
    AppError::ValidationError(err.to_string())
}

fn parse_status_filter(raw: Option<&str>) -> Result<Vec<OrderStatus>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(value) if value.eq_ignore_ascii_case("all") => Ok(Vec::new()),
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<OrderStatus>().map_err(validation))
            .collect(),
    }
}

/// Either bound alone is enough; the missing end is now, the missing start
/// is `default_days` before the end.
fn parse_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    default_days: u32,
) -> Result<Option<DateRange>, AppError> {
    if from.is_none() && to.is_none() {
        return Ok(None);
    }
    let end = to.unwrap_or_else(Utc::now);
    let start = from.unwrap_or_else(|| end - Duration::days(i64::from(default_days)));
    DateRange::new(start, end).map(Some).map_err(validation)
}

// ============================================================================
// Order Handlers
// ============================================================================

/// GET /v1/admin/orders
async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, AppError> {
    let payment_status = params
        .payment_status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.parse::<PaymentStatus>().map_err(validation))
        .transpose()?;

    let query = OrderQuery {
        filter: OrderFilter {
            status: None,
            statuses: parse_status_filter(params.status.as_deref())?,
            payment_status,
            created: parse_range(params.from, params.to, DEFAULT_TREND_DAYS)?,
            search: params.search,
        },
        page: params.page.unwrap_or(1),
        page_size: params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        sort: OrderSort {
            field: params.sort_by.unwrap_or_default(),
            direction: params.sort_order.unwrap_or_default(),
        },
    };

    let page = state.coordinator.list_orders(&query).await?;
    Ok(Json(OrderListResponse {
        total_pages: page.total_pages(),
        has_next_page: page.has_next_page(),
        has_prev_page: page.has_prev_page(),
        page: page.page,
        page_size: page.page_size,
        total: page.total,
        orders: page.items,
    }))
}

/// GET /v1/admin/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.coordinator.get_order(order_id).await?))
}

/// PUT /v1/admin/orders/{id}/status
async fn update_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let status: OrderStatus = req.status.parse().map_err(validation)?;

    let order = state
        .coordinator
        .change_status(order_id, status, DispatchOptions { item_weight: req.item_weight })
        .await?;
    info!("Order {} moved to {}", order.order_number, order.status);
    Ok(Json(order))
}

/// PUT /v1/admin/orders/{id}/payment-status
async fn update_payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let payment_status: PaymentStatus = req.payment_status.parse().map_err(validation)?;

    Ok(Json(
        state
            .coordinator
            .change_payment_status(order_id, payment_status)
            .await?,
    ))
}

/// POST /v1/admin/orders/{id}/cancel
async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .coordinator
        .cancel(order_id, req.reason.as_deref())
        .await?;
    info!("Order {} cancelled", order.order_number);
    Ok(Json(order))
}

/// POST /v1/admin/orders/{id}/dispatch
///
/// Explicit retry of a dispatch that left the order processing without a
/// consignment.
async fn dispatch_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<DispatchOrderRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .coordinator
            .dispatch(order_id, DispatchOptions { item_weight: req.item_weight })
            .await?,
    ))
}

/// GET /v1/admin/dashboard
async fn dashboard(
    State(state): State<AppState>,
    Query(params): Query<DashboardQuery>,
) -> Result<Json<Dashboard>, AppError> {
    let trend_days = params.trend_days.unwrap_or(DEFAULT_TREND_DAYS).clamp(1, 365);
    let request = DashboardRequest {
        recent_limit: params.recent.unwrap_or(DEFAULT_RECENT_ORDERS).clamp(1, 50),
        range: parse_range(params.from, params.to, trend_days)?,
        bucket: params.bucket.unwrap_or_default(),
        top_customers: params.top.unwrap_or(DEFAULT_TOP_CUSTOMERS).clamp(1, 50),
        trend_days,
    };
    Ok(Json(state.coordinator.dashboard(&request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_filter_parsing() {
        assert!(parse_status_filter(None).unwrap().is_empty());
        assert!(parse_status_filter(Some("all")).unwrap().is_empty());
        assert!(parse_status_filter(Some(" ")).unwrap().is_empty());
        assert_eq!(
            parse_status_filter(Some("shipped")).unwrap(),
            vec![OrderStatus::Shipped]
        );
        assert_eq!(
            parse_status_filter(Some("shipped, delivered")).unwrap(),
            vec![OrderStatus::Shipped, OrderStatus::Delivered]
        );
        assert!(matches!(
            parse_status_filter(Some("shipped,lost")),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_range_parsing() {
        assert_eq!(parse_range(None, None, 30).unwrap(), None);

        let to = Utc::now();
        let range = parse_range(None, Some(to), 7).unwrap().unwrap();
        assert_eq!(range.end, to);
        assert_eq!(range.end - range.start, Duration::days(7));

        assert!(matches!(
            parse_range(Some(to), Some(to - Duration::days(1)), 30),
            Err(AppError::ValidationError(_))
        ));
    }
}
