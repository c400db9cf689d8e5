use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use storefront_core::courier::{cancellation_reason, ensure_address, DEFAULT_ITEM_WEIGHT_GRAMS};
use storefront_core::repository::StatusCount;
use storefront_core::{
    ConsignmentSpec, CoreError, CourierError, CourierGateway, CourierLinkage, CustomerSummary,
    DateRange, NewOrder, Order, OrderPage, OrderPatch, OrderQuery, OrderRepository, OrderStats,
    OrderStatus, OrderTrends, PaymentStatus, RevenueBucket, RevenuePoint, StoreError,
};
use storefront_shared::models::events::{
    DispatchFailedEvent, OrderCancelledEvent, OrderDispatchedEvent, PaymentStatusChangedEvent,
    StatusChangedEvent,
};

use crate::checkout::build_order;
use crate::locks::OrderLocks;
use crate::pricing::PricingRules;

pub const DEFAULT_COURIER_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_RECENT_ORDERS: u32 = 5;
pub const DEFAULT_TOP_CUSTOMERS: u32 = 10;
pub const DEFAULT_TREND_DAYS: u32 = 30;

const ORDER_EVENTS: &str = "order.events";
const COURIER_EVENTS: &str = "order.courier";

/// Operator-supplied parameters for a dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Grams; missing or non-positive falls back to the configured default.
    pub item_weight: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct DashboardRequest {
    pub recent_limit: u32,
    /// Window for status counts and the revenue series. Without one, status
    /// counts cover every order and revenue covers the trend window.
    pub range: Option<DateRange>,
    pub bucket: RevenueBucket,
    pub top_customers: u32,
    pub trend_days: u32,
}

impl Default for DashboardRequest {
    fn default() -> Self {
        Self {
            recent_limit: DEFAULT_RECENT_ORDERS,
            range: None,
            bucket: RevenueBucket::Day,
            top_customers: DEFAULT_TOP_CUSTOMERS,
            trend_days: DEFAULT_TREND_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    /// All orders, every status.
    pub stats: OrderStats,
    pub counts_by_status: Vec<StatusCount>,
    pub recent_orders: Vec<Order>,
    /// Completed orders only from here down.
    pub revenue: Vec<RevenuePoint>,
    pub top_customers: Vec<CustomerSummary>,
    pub trends: OrderTrends,
}

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The local status write went through; only the courier side failed.
    /// `order` is the state the operator should now see.
    #[error("Order is processing but courier dispatch failed: {source}")]
    DispatchFailed {
        order: Box<Order>,
        #[source]
        source: CourierError,
    },

    /// Courier refused or never answered the cancellation; nothing was written.
    #[error("Cancellation aborted: {source}")]
    CancelRejected {
        #[source]
        source: CourierError,
    },

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => FulfillmentError::NotFound(id),
            StoreError::Persistence(msg) => FulfillmentError::Persistence(msg),
        }
    }
}

impl From<CoreError> for FulfillmentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => FulfillmentError::Validation(msg),
        }
    }
}

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;

/// Single entry point for every order transition.
///
/// Each operation takes the order's lock, re-reads the order from the store,
/// decides on the side effect and runs the store and courier calls in
/// sequence. Nothing is cached between calls and nothing is retried here.
pub struct FulfillmentCoordinator {
    orders: Arc<dyn OrderRepository>,
    courier: Arc<dyn CourierGateway>,
    locks: OrderLocks,
    pricing: PricingRules,
    default_item_weight_grams: u32,
    courier_timeout: Duration,
}

impl FulfillmentCoordinator {
    pub fn new(orders: Arc<dyn OrderRepository>, courier: Arc<dyn CourierGateway>) -> Self {
        Self {
            orders,
            courier,
            locks: OrderLocks::new(),
            pricing: PricingRules::default(),
            default_item_weight_grams: DEFAULT_ITEM_WEIGHT_GRAMS,
            courier_timeout: DEFAULT_COURIER_TIMEOUT,
        }
    }

    pub fn with_pricing(mut self, pricing: PricingRules) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_default_item_weight(mut self, grams: u32) -> Self {
        self.default_item_weight_grams = grams;
        self
    }

    pub fn with_courier_timeout(mut self, timeout: Duration) -> Self {
        self.courier_timeout = timeout;
        self
    }

    pub async fn place_order(&self, new_order: NewOrder) -> FulfillmentResult<Order> {
        let order = build_order(new_order, &self.pricing)?;
        self.orders.insert(&order).await?;
        info!(
            "Order {} placed: {} item(s), total {} {}",
            order.order_number,
            order.items.len(),
            order.total,
            order.currency
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> FulfillmentResult<Order> {
        Ok(self.orders.get(order_id).await?)
    }

    pub async fn get_order_by_number(&self, order_number: &str) -> FulfillmentResult<Order> {
        Ok(self.orders.get_by_number(order_number.trim()).await?)
    }

    pub async fn orders_for_email(&self, email: &str) -> FulfillmentResult<Vec<Order>> {
        let email = email.trim();
        if email.is_empty() {
            return Err(FulfillmentError::Validation("Email is required".to_string()));
        }
        Ok(self.orders.list_by_email(email).await?)
    }

    pub async fn list_orders(&self, query: &OrderQuery) -> FulfillmentResult<OrderPage> {
        Ok(self.orders.list(query).await?)
    }

    pub async fn dashboard(&self, request: &DashboardRequest) -> FulfillmentResult<Dashboard> {
        let trend_window = DateRange::last_days(Utc::now(), request.trend_days);
        let current = self.orders.completed_summary(&trend_window).await?;
        let previous = self.orders.completed_summary(&trend_window.preceding()).await?;
        let revenue_window = request.range.unwrap_or(trend_window);

        Ok(Dashboard {
            stats: self.orders.aggregate_stats().await?,
            counts_by_status: self.orders.counts_by_status(request.range.as_ref()).await?,
            recent_orders: self.orders.recent(request.recent_limit).await?,
            revenue: self.orders.revenue_series(&revenue_window, request.bucket).await?,
            top_customers: self.orders.top_customers(request.top_customers).await?,
            trends: OrderTrends::compare(request.trend_days, current, previous),
        })
    }

    /// Move an order to `next`.
    ///
    /// `processing` goes through dispatch and `cancelled` through cancel with
    /// the fallback reason. Everything else is a plain status write.
    pub async fn change_status(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        options: DispatchOptions,
    ) -> FulfillmentResult<Order> {
        match next {
            OrderStatus::Processing => self.dispatch(order_id, options).await,
            OrderStatus::Cancelled => self.cancel(order_id, None).await,
            _ => {
                let _guard = self.locks.acquire(order_id).await;
                let current = self.orders.get(order_id).await?;
                ensure_transition(&current, next)?;
                self.write_status(&current, next).await
            }
        }
    }

    /// Transition to `processing` and open a consignment with the courier.
    ///
    /// Local-first: the status write is committed before any courier call and
    /// is kept when the courier fails. Re-running dispatch is the recovery
    /// path; an order that already has a linkage is never sent again.
    pub async fn dispatch(&self, order_id: Uuid, options: DispatchOptions) -> FulfillmentResult<Order> {
        let _guard = self.locks.acquire(order_id).await;
        let current = self.orders.get(order_id).await?;
        ensure_transition(&current, OrderStatus::Processing)?;

        if let Some(linkage) = current.dispatched_linkage() {
            info!(
                "Order {} already has consignment {} with {}; skipping courier",
                current.order_number, linkage.consignment_id, linkage.provider
            );
            if current.status == OrderStatus::Processing {
                return Ok(current);
            }
            return self.write_status(&current, OrderStatus::Processing).await;
        }

        let order = self.write_status(&current, OrderStatus::Processing).await?;

        let consignment_id = match self.open_consignment(&order, options).await {
            Ok(consignment_id) => consignment_id,
            Err(source) => {
                record(
                    COURIER_EVENTS,
                    &DispatchFailedEvent {
                        order_id: order.id,
                        order_number: order.order_number.clone(),
                        provider: self.courier.provider().to_string(),
                        reason: source.to_string(),
                        timestamp: Utc::now().timestamp(),
                    },
                );
                warn!(
                    "Dispatch of order {} failed ({}); order stays processing without linkage",
                    order.order_number,
                    source.kind()
                );
                return Err(FulfillmentError::DispatchFailed {
                    order: Box::new(order),
                    source,
                });
            }
        };

        let linkage = CourierLinkage::new(self.courier.provider(), consignment_id.clone());
        let linked = match self.orders.apply_fields(order.id, &OrderPatch::courier(linkage)).await {
            Ok(linked) => linked,
            Err(err) => {
                error!(
                    "Failed to record consignment {} for order {}: {}",
                    consignment_id, order.order_number, err
                );
                self.release_orphan(&order, &consignment_id).await;
                return Err(err.into());
            }
        };

        record(
            COURIER_EVENTS,
            &OrderDispatchedEvent {
                order_id: linked.id,
                order_number: linked.order_number.clone(),
                provider: self.courier.provider().to_string(),
                consignment_id,
                collectable_amount: linked.total,
                timestamp: Utc::now().timestamp(),
            },
        );
        Ok(linked)
    }

    /// Transition to `cancelled`.
    ///
    /// Remote-first: a dispatched order is cancelled with the courier before
    /// anything is written locally. If the courier call fails the stored order
    /// is left exactly as it was.
    pub async fn cancel(&self, order_id: Uuid, reason: Option<&str>) -> FulfillmentResult<Order> {
        let _guard = self.locks.acquire(order_id).await;
        let current = self.orders.get(order_id).await?;
        ensure_transition(&current, OrderStatus::Cancelled)?;

        let reason = cancellation_reason(reason);
        let consignment_id = current
            .dispatched_linkage()
            .map(|linkage| linkage.consignment_id.clone());

        if let Some(linkage) = current.dispatched_linkage() {
            if linkage.provider != self.courier.provider() {
                return Err(FulfillmentError::CancelRejected {
                    source: CourierError::Rejected {
                        reason: format!(
                            "consignment {} belongs to provider {}",
                            linkage.consignment_id, linkage.provider
                        ),
                    },
                });
            }

            let result = self
                .with_timeout(self.courier.cancel_consignment(&linkage.consignment_id, &reason))
                .await;
            if let Err(source) = result {
                warn!(
                    "Courier refused to cancel consignment {} for order {} ({}); status left at {}",
                    linkage.consignment_id,
                    current.order_number,
                    source.kind(),
                    current.status
                );
                return Err(FulfillmentError::CancelRejected { source });
            }
        }

        let cancelled = self.write_status(&current, OrderStatus::Cancelled).await?;
        record(
            ORDER_EVENTS,
            &OrderCancelledEvent {
                order_id: cancelled.id,
                order_number: cancelled.order_number.clone(),
                consignment_id,
                reason,
                timestamp: Utc::now().timestamp(),
            },
        );
        Ok(cancelled)
    }

    /// Payment status is its own axis: no courier call and no constraint
    /// against the order status, cancelled orders included.
    pub async fn change_payment_status(
        &self,
        order_id: Uuid,
        next: PaymentStatus,
    ) -> FulfillmentResult<Order> {
        let _guard = self.locks.acquire(order_id).await;
        let current = self.orders.get(order_id).await?;
        let updated = self
            .orders
            .apply_fields(order_id, &OrderPatch::payment_status(next))
            .await?;
        record(
            ORDER_EVENTS,
            &PaymentStatusChangedEvent {
                order_id: updated.id,
                order_number: updated.order_number.clone(),
                from: current.payment_status.to_string(),
                to: next.to_string(),
                timestamp: Utc::now().timestamp(),
            },
        );
        Ok(updated)
    }

    async fn write_status(&self, current: &Order, next: OrderStatus) -> FulfillmentResult<Order> {
        let updated = self
            .orders
            .apply_fields(current.id, &OrderPatch::status(next))
            .await?;
        record(
            ORDER_EVENTS,
            &StatusChangedEvent {
                order_id: updated.id,
                order_number: updated.order_number.clone(),
                from: current.status.to_string(),
                to: next.to_string(),
                timestamp: Utc::now().timestamp(),
            },
        );
        Ok(updated)
    }

    async fn open_consignment(
        &self,
        order: &Order,
        options: DispatchOptions,
    ) -> Result<String, CourierError> {
        let free_text = order.shipping_address.free_text();
        let query = ensure_address(&free_text)?;
        let location = self.with_timeout(self.courier.resolve_address(query)).await?;
        let spec = ConsignmentSpec::for_order(
            order,
            location,
            options.item_weight,
            self.default_item_weight_grams,
        );
        self.with_timeout(self.courier.create_consignment(&spec)).await
    }

    /// Best effort: the consignment exists remotely but could not be linked
    /// locally, so try to take it back before reporting the failure.
    async fn release_orphan(&self, order: &Order, consignment_id: &str) {
        let reason = format!("Order {} could not be recorded", order.order_number);
        match self
            .with_timeout(self.courier.cancel_consignment(consignment_id, &reason))
            .await
        {
            Ok(()) => warn!("Cancelled unrecorded consignment {}", consignment_id),
            Err(err) => error!(
                "Consignment {} for order {} is live but unrecorded: {}",
                consignment_id, order.order_number, err
            ),
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, CourierError>>,
    ) -> Result<T, CourierError> {
        match tokio::time::timeout(self.courier_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CourierError::Timeout),
        }
    }
}

fn ensure_transition(current: &Order, next: OrderStatus) -> FulfillmentResult<()> {
    if current.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(FulfillmentError::InvalidTransition {
            from: current.status,
            to: next,
        })
    }
}

fn record<E: Serialize>(topic: &str, event: &E) {
    match serde_json::to_string(event) {
        Ok(payload) => info!(topic, %payload, "order event"),
        Err(err) => error!("Failed to serialize {} event: {}", topic, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOrderRepository;
    use crate::mock::ScriptedCourier;
    use storefront_core::{OrderItem, PaymentMethod, PaymentMethodKind, ShippingAddress};
    use storefront_shared::Masked;

    fn new_order() -> NewOrder {
        NewOrder {
            items: vec![OrderItem {
                product_id: "prod-7".to_string(),
                name: "Jamdani Saree".to_string(),
                sku: None,
                slug: None,
                image: None,
                unit_price: 4200,
                quantity: 1,
            }],
            shipping_address: ShippingAddress {
                first_name: "Mitu".to_string(),
                last_name: "Akter".to_string(),
                email: Masked("mitu@example.com".to_string()),
                phone: Masked("01555000111".to_string()),
                street: "Sector 4, Uttara".to_string(),
                city: "Dhaka".to_string(),
                postal_code: "1230".to_string(),
                country: "BD".to_string(),
            },
            payment_method: PaymentMethod::new(PaymentMethodKind::Cod),
        }
    }

    fn coordinator(courier: Arc<ScriptedCourier>) -> FulfillmentCoordinator {
        FulfillmentCoordinator::new(Arc::new(InMemoryOrderRepository::new()), courier)
    }

    #[tokio::test]
    async fn test_plain_status_write_has_no_side_effect() {
        let courier = Arc::new(ScriptedCourier::new());
        let coordinator = coordinator(courier.clone());
        let order = coordinator.place_order(new_order()).await.unwrap();

        let shipped = coordinator
            .change_status(order.id, OrderStatus::Shipped, DispatchOptions::default())
            .await
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert!(courier.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let coordinator = coordinator(Arc::new(ScriptedCourier::new()));
        let err = coordinator
            .change_status(Uuid::new_v4(), OrderStatus::Shipped, DispatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_place_order_validation() {
        let coordinator = coordinator(Arc::new(ScriptedCourier::new()));
        let mut input = new_order();
        input.items.clear();
        let err = coordinator.place_order(input).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_blank_email_lookup_rejected() {
        let coordinator = coordinator(Arc::new(ScriptedCourier::new()));
        let err = coordinator.orders_for_email("  ").await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }
}
