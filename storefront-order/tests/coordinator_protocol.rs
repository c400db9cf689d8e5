use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use storefront_core::repository::StatusCount;
use storefront_core::{
    CourierError, CourierLinkage, CustomerSummary, DateRange, NewOrder, Order, OrderItem,
    OrderPage, OrderPatch, OrderQuery, OrderRepository, OrderStats, OrderStatus, PaymentMethod,
    PaymentMethodKind, PaymentStatus, PeriodSummary, ResolvedLocation, RevenueBucket,
    RevenuePoint, ShippingAddress, StoreError, StoreResult,
};
use storefront_order::mock::CourierCall;
use storefront_order::{
    DashboardRequest, DispatchOptions, FulfillmentCoordinator, FulfillmentError,
    InMemoryOrderRepository, ScriptedCourier,
};
use storefront_shared::Masked;

struct Harness {
    orders: Arc<InMemoryOrderRepository>,
    courier: Arc<ScriptedCourier>,
    coordinator: Arc<FulfillmentCoordinator>,
}

fn harness_with(courier: ScriptedCourier) -> Harness {
    let orders = Arc::new(InMemoryOrderRepository::new());
    let courier = Arc::new(courier);
    let coordinator = Arc::new(
        FulfillmentCoordinator::new(orders.clone(), courier.clone())
            .with_courier_timeout(Duration::from_millis(200)),
    );
    Harness { orders, courier, coordinator }
}

fn harness() -> Harness {
    harness_with(ScriptedCourier::new())
}

fn checkout() -> NewOrder {
    NewOrder {
        items: vec![
            OrderItem {
                product_id: "prod-1".to_string(),
                name: "Khadi Panjabi".to_string(),
                sku: Some("KP-01".to_string()),
                slug: Some("khadi-panjabi".to_string()),
                image: None,
                unit_price: 1800,
                quantity: 2,
            },
            OrderItem {
                product_id: "prod-2".to_string(),
                name: "Nakshi Kantha".to_string(),
                sku: None,
                slug: None,
                image: None,
                unit_price: 2500,
                quantity: 1,
            },
        ],
        shipping_address: ShippingAddress {
            first_name: "Arif".to_string(),
            last_name: "Rahman".to_string(),
            email: Masked("arif@example.com".to_string()),
            phone: Masked("01712345678".to_string()),
            street: "House 3, Road 11, Banani".to_string(),
            city: "Dhaka".to_string(),
            postal_code: "1213".to_string(),
            country: String::new(),
        },
        payment_method: PaymentMethod::new(PaymentMethodKind::Cod),
    }
}

async fn place(h: &Harness) -> Order {
    h.coordinator.place_order(checkout()).await.unwrap()
}

async fn link(h: &Harness, order: &Order, consignment_id: &str) -> Order {
    h.orders
        .apply_fields(
            order.id,
            &OrderPatch {
                status: Some(OrderStatus::Processing),
                courier: Some(Some(CourierLinkage::new("carrybee", consignment_id))),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_dispatch_records_linkage() {
    let h = harness();
    h.courier.push_create(Ok("CB-123".to_string()));
    let order = place(&h).await;

    let dispatched = h
        .coordinator
        .change_status(order.id, OrderStatus::Processing, DispatchOptions::default())
        .await
        .unwrap();

    assert_eq!(dispatched.status, OrderStatus::Processing);
    assert_eq!(dispatched.courier, Some(CourierLinkage::new("carrybee", "CB-123")));

    let stored = h.orders.get(order.id).await.unwrap();
    assert_eq!(stored, dispatched);

    let calls = h.courier.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        CourierCall::ResolveAddress {
            query: "House 3, Road 11, Banani, Dhaka, 1213, BD".to_string()
        }
    );
}

#[tokio::test]
async fn test_consignment_uses_order_snapshot() {
    let h = harness();
    h.courier.push_resolve(Ok(ResolvedLocation { city_id: 14, zone_id: 92 }));
    let order = place(&h).await;

    h.coordinator
        .dispatch(order.id, DispatchOptions { item_weight: Some(-5) })
        .await
        .unwrap();

    let specs = h.courier.create_calls();
    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert_eq!(spec.merchant_order_ref, order.order_number);
    assert_eq!(spec.recipient_name, "Arif Rahman");
    assert_eq!(spec.recipient_phone.expose(), "01712345678");
    assert_eq!(spec.location, ResolvedLocation { city_id: 14, zone_id: 92 });
    assert_eq!(spec.item_weight_grams, 500);
    assert_eq!(spec.item_quantity, 2);
    assert_eq!(spec.collectable_amount, order.total);
    assert_eq!(spec.description, "Khadi Panjabi, Nakshi Kantha");
}

#[tokio::test]
async fn test_rejected_dispatch_keeps_processing() {
    let h = harness();
    h.courier.push_create(Err(CourierError::Rejected { reason: "invalid phone".to_string() }));
    let order = place(&h).await;

    let err = h
        .coordinator
        .change_status(order.id, OrderStatus::Processing, DispatchOptions::default())
        .await
        .unwrap_err();

    match err {
        FulfillmentError::DispatchFailed { order: reported, source } => {
            assert_eq!(reported.status, OrderStatus::Processing);
            assert!(reported.courier.is_none());
            assert!(matches!(source, CourierError::Rejected { .. }));
        }
        other => panic!("expected DispatchFailed, got {:?}", other),
    }

    let stored = h.orders.get(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Processing);
    assert!(stored.courier.is_none());
}

#[tokio::test]
async fn test_unresolved_address_keeps_processing() {
    let h = harness();
    h.courier.push_resolve(Err(CourierError::AddressUnresolved("no match".to_string())));
    let order = place(&h).await;

    let err = h.coordinator.dispatch(order.id, DispatchOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::DispatchFailed { source: CourierError::AddressUnresolved(_), .. }
    ));
    assert!(h.courier.create_calls().is_empty());
    assert_eq!(h.orders.get(order.id).await.unwrap().status, OrderStatus::Processing);
}

#[tokio::test]
async fn test_retried_dispatch_creates_one_consignment() {
    let h = harness();
    h.courier.push_create(Err(CourierError::Unavailable("502 Bad Gateway".to_string())));
    h.courier.push_create(Ok("CB-777".to_string()));
    let order = place(&h).await;

    assert!(h.coordinator.dispatch(order.id, DispatchOptions::default()).await.is_err());
    let dispatched = h.coordinator.dispatch(order.id, DispatchOptions::default()).await.unwrap();
    assert_eq!(dispatched.courier, Some(CourierLinkage::new("carrybee", "CB-777")));

    // A third attempt sees the linkage and stays away from the courier.
    let again = h.coordinator.dispatch(order.id, DispatchOptions::default()).await.unwrap();
    assert_eq!(again.courier, Some(CourierLinkage::new("carrybee", "CB-777")));
    assert_eq!(h.courier.create_calls().len(), 2);
    assert_eq!(h.orders.get(order.id).await.unwrap().courier, again.courier);
}

#[tokio::test]
async fn test_dispatch_timeout_is_reported() {
    let h = harness_with(ScriptedCourier::new().with_delay(Duration::from_millis(500)));
    let order = place(&h).await;

    let err = h.coordinator.dispatch(order.id, DispatchOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::DispatchFailed { source: CourierError::Timeout, .. }
    ));
    assert_eq!(h.orders.get(order.id).await.unwrap().status, OrderStatus::Processing);
    // The abandoned call no longer counts as running.
    assert_eq!(h.courier.in_flight(), 0);
}

/// Order Store whose linkage writes fail; every other call goes through.
struct LinkageWriteFails {
    inner: InMemoryOrderRepository,
}

#[async_trait]
impl OrderRepository for LinkageWriteFails {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        self.inner.insert(order).await
    }

    async fn get(&self, id: uuid::Uuid) -> StoreResult<Order> {
        self.inner.get(id).await
    }

    async fn get_by_number(&self, order_number: &str) -> StoreResult<Order> {
        self.inner.get_by_number(order_number).await
    }

    async fn list_by_email(&self, email: &str) -> StoreResult<Vec<Order>> {
        self.inner.list_by_email(email).await
    }

    async fn apply_fields(&self, id: uuid::Uuid, patch: &OrderPatch) -> StoreResult<Order> {
        if patch.courier.is_some() {
            return Err(StoreError::Persistence("connection reset".to_string()));
        }
        self.inner.apply_fields(id, patch).await
    }

    async fn list(&self, query: &OrderQuery) -> StoreResult<OrderPage> {
        self.inner.list(query).await
    }

    async fn aggregate_stats(&self) -> StoreResult<OrderStats> {
        self.inner.aggregate_stats().await
    }

    async fn counts_by_status(&self, range: Option<&DateRange>) -> StoreResult<Vec<StatusCount>> {
        self.inner.counts_by_status(range).await
    }

    async fn recent(&self, limit: u32) -> StoreResult<Vec<Order>> {
        self.inner.recent(limit).await
    }

    async fn revenue_series(
        &self,
        range: &DateRange,
        bucket: RevenueBucket,
    ) -> StoreResult<Vec<RevenuePoint>> {
        self.inner.revenue_series(range, bucket).await
    }

    async fn top_customers(&self, limit: u32) -> StoreResult<Vec<CustomerSummary>> {
        self.inner.top_customers(limit).await
    }

    async fn completed_summary(&self, range: &DateRange) -> StoreResult<PeriodSummary> {
        self.inner.completed_summary(range).await
    }
}

fn unlinkable() -> (Arc<LinkageWriteFails>, Arc<ScriptedCourier>, FulfillmentCoordinator) {
    let orders = Arc::new(LinkageWriteFails { inner: InMemoryOrderRepository::new() });
    let courier = Arc::new(ScriptedCourier::new());
    let coordinator = FulfillmentCoordinator::new(orders.clone(), courier.clone())
        .with_courier_timeout(Duration::from_millis(200));
    (orders, courier, coordinator)
}

#[tokio::test]
async fn test_unrecorded_consignment_is_cancelled() {
    let (orders, courier, coordinator) = unlinkable();
    courier.push_create(Ok("CB-900".to_string()));
    let order = coordinator.place_order(checkout()).await.unwrap();

    let err = coordinator.dispatch(order.id, DispatchOptions::default()).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::Persistence(_)));

    let cancels = courier.cancel_calls();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].0, "CB-900");
    assert!(cancels[0].1.contains(&order.order_number));

    let stored = orders.get(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Processing);
    assert!(stored.courier.is_none());
}

#[tokio::test]
async fn test_failed_compensation_still_reports_persistence() {
    let (orders, courier, coordinator) = unlinkable();
    courier.push_cancel(Err(CourierError::Unavailable("503".to_string())));
    let order = coordinator.place_order(checkout()).await.unwrap();

    let err = coordinator.dispatch(order.id, DispatchOptions::default()).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::Persistence(_)));
    let reason = format!("Order {} could not be recorded", order.order_number);
    assert_eq!(courier.cancel_calls(), vec![("CB-1".to_string(), reason)]);
    assert!(orders.get(order.id).await.unwrap().courier.is_none());
}

#[tokio::test]
async fn test_cancel_refuses_consignment_of_another_provider() {
    let h = harness_with(ScriptedCourier::new().with_provider("steadfast"));
    let order = place(&h).await;
    let linked = link(&h, &order, "CB-58").await;

    let err = h.coordinator.cancel(order.id, Some("customer request")).await.unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::CancelRejected { source: CourierError::Rejected { .. } }
    ));
    assert!(h.courier.calls().is_empty());
    assert_eq!(h.orders.get(order.id).await.unwrap(), linked);

    // Fresh dispatches are recorded under the gateway's own provider.
    let other = place(&h).await;
    let dispatched = h.coordinator.dispatch(other.id, DispatchOptions::default()).await.unwrap();
    assert_eq!(dispatched.courier, Some(CourierLinkage::new("steadfast", "CB-1")));
}

#[tokio::test]
async fn test_cancel_uses_fallback_reason() {
    let h = harness();
    let order = place(&h).await;
    link(&h, &order, "CB-55").await;

    let cancelled = h.coordinator.cancel(order.id, Some("")).await.unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(
        h.courier.cancel_calls(),
        vec![("CB-55".to_string(), "Cancelled by admin".to_string())]
    );
}

#[tokio::test]
async fn test_failed_courier_cancel_changes_nothing() {
    let h = harness();
    h.courier.push_cancel(Err(CourierError::Rejected { reason: "already picked up".to_string() }));
    let order = place(&h).await;
    let linked = link(&h, &order, "CB-56").await;

    let err = h.coordinator.cancel(order.id, Some("customer request")).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::CancelRejected { source: CourierError::Rejected { .. } }));

    let stored = h.orders.get(order.id).await.unwrap();
    assert_eq!(stored, linked);
}

#[tokio::test]
async fn test_cancel_timeout_blocks_status_write() {
    let h = harness_with(ScriptedCourier::new().with_delay(Duration::from_millis(500)));
    let order = place(&h).await;
    link(&h, &order, "CB-57").await;

    let err = h.coordinator.cancel(order.id, None).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::CancelRejected { source: CourierError::Timeout }));
    assert_eq!(h.orders.get(order.id).await.unwrap().status, OrderStatus::Processing);
}

#[tokio::test]
async fn test_cancel_without_linkage_skips_courier() {
    let h = harness();
    let order = place(&h).await;

    let cancelled = h
        .coordinator
        .change_status(order.id, OrderStatus::Cancelled, DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(h.courier.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_is_absorbing() {
    let h = harness();
    let order = place(&h).await;
    h.coordinator.cancel(order.id, None).await.unwrap();

    for next in OrderStatus::ALL {
        let result = h
            .coordinator
            .change_status(order.id, next, DispatchOptions::default())
            .await;
        assert!(
            matches!(result, Err(FulfillmentError::InvalidTransition { from: OrderStatus::Cancelled, .. })),
            "transition to {} should be refused",
            next
        );
    }
    assert!(h.coordinator.cancel(order.id, Some("again")).await.is_err());
    assert!(h.courier.calls().is_empty());
}

#[tokio::test]
async fn test_delivered_cannot_be_cancelled() {
    let h = harness();
    let order = place(&h).await;
    h.coordinator
        .change_status(order.id, OrderStatus::Delivered, DispatchOptions::default())
        .await
        .unwrap();

    let err = h.coordinator.cancel(order.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::InvalidTransition { from: OrderStatus::Delivered, to: OrderStatus::Cancelled }
    ));
}

#[tokio::test]
async fn test_payment_status_is_independent() {
    let h = harness();
    let order = place(&h).await;
    h.coordinator.cancel(order.id, None).await.unwrap();

    let refunded = h
        .coordinator
        .change_payment_status(order.id, PaymentStatus::Refunded)
        .await
        .unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(refunded.status, OrderStatus::Cancelled);

    let delivered_unpaid = place(&h).await;
    let delivered = h
        .coordinator
        .change_status(delivered_unpaid.id, OrderStatus::Delivered, DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(delivered.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_updated_at_moves_forward() {
    let h = harness();
    let order = place(&h).await;

    let shipped = h
        .coordinator
        .change_status(order.id, OrderStatus::Shipped, DispatchOptions::default())
        .await
        .unwrap();
    let same = h
        .coordinator
        .change_status(order.id, OrderStatus::Shipped, DispatchOptions::default())
        .await
        .unwrap();
    assert!(shipped.updated_at > order.updated_at);
    assert!(same.updated_at > shipped.updated_at);
    assert_eq!(same.created_at, order.created_at);
}

#[tokio::test]
async fn test_dispatch_and_cancel_on_one_order_are_serialized() {
    let h = harness_with(ScriptedCourier::new().with_delay(Duration::from_millis(20)));
    let order = place(&h).await;

    let dispatch = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.dispatch(order.id, DispatchOptions::default()).await })
    };
    let cancel = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.cancel(order.id, Some("changed mind")).await })
    };

    let dispatched = dispatch.await.unwrap();
    let cancelled = cancel.await.unwrap();
    assert!(dispatched.is_ok() || cancelled.is_ok());
    assert!(h.courier.max_in_flight() <= 1);

    let stored = h.orders.get(order.id).await.unwrap();
    if stored.status == OrderStatus::Cancelled && stored.courier.is_some() {
        // Dispatch won the race, so cancel must have reached the courier.
        assert_eq!(h.courier.cancel_calls().len(), 1);
    }
    if stored.status == OrderStatus::Processing {
        assert!(stored.courier.is_some());
    }
}

#[tokio::test]
async fn test_different_orders_run_concurrently() {
    let h = harness_with(ScriptedCourier::new().with_delay(Duration::from_millis(50)));
    let first = place(&h).await;
    let second = place(&h).await;

    let a = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.dispatch(first.id, DispatchOptions::default()).await })
    };
    let b = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.dispatch(second.id, DispatchOptions::default()).await })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_ne!(a.courier, b.courier);
    assert_eq!(h.courier.max_in_flight(), 2);
}

#[tokio::test]
async fn test_dashboard_and_listing() {
    let h = harness();
    let a = place(&h).await;
    place(&h).await;
    let c = place(&h).await;
    h.coordinator.dispatch(a.id, DispatchOptions::default()).await.unwrap();
    h.coordinator
        .change_status(c.id, OrderStatus::Shipped, DispatchOptions::default())
        .await
        .unwrap();

    let dashboard = h.coordinator.dashboard(&DashboardRequest::default()).await.unwrap();
    assert_eq!(dashboard.stats.total_orders, 3);
    assert_eq!(dashboard.stats.pending_count, 1);
    assert_eq!(dashboard.stats.processing_count, 1);
    assert_eq!(dashboard.recent_orders.len(), 3);
    assert_eq!(dashboard.counts_by_status.len(), 3);

    // Only the shipped order counts as revenue.
    assert_eq!(dashboard.revenue.len(), 1);
    assert_eq!(dashboard.revenue[0].revenue, c.total);
    assert_eq!(dashboard.top_customers.len(), 1);
    assert_eq!(dashboard.top_customers[0].total_spent, c.total);
    assert_eq!(dashboard.trends.current.total_orders, 1);
    assert_eq!(dashboard.trends.previous.total_orders, 0);
    assert_eq!(dashboard.trends.growth_rate, 0.0);

    let page = h.coordinator.list_orders(&Default::default()).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(h.coordinator.orders_for_email("arif@example.com").await.unwrap().len(), 3);
    assert_eq!(
        h.coordinator.get_order_by_number(&a.order_number).await.unwrap().id,
        a.id
    );
}
