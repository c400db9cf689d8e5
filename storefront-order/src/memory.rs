use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use storefront_core::repository::StatusCount;
use storefront_core::{
    CustomerSummary, DateRange, Order, OrderFilter, OrderPage, OrderPatch, OrderQuery,
    OrderRepository, OrderStats, PeriodSummary, RevenueBucket, RevenuePoint, StoreError,
    StoreResult,
};

/// Order Store kept in process memory. Used when no database is configured
/// and as the store behind coordinator tests.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::Persistence(format!("duplicate order id {}", order.id)));
        }
        if orders.values().any(|existing| existing.order_number == order.order_number) {
            return Err(StoreError::Persistence(format!(
                "duplicate order number {}",
                order.order_number
            )));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Order> {
        self.orders
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_by_number(&self, order_number: &str) -> StoreResult<Order> {
        self.orders
            .read()
            .await
            .values()
            .find(|order| order.order_number == order_number)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(order_number.to_string()))
    }

    async fn list_by_email(&self, email: &str) -> StoreResult<Vec<Order>> {
        let mut matching: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|order| order.shipping_address.email.expose() == email)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn apply_fields(&self, id: Uuid, patch: &OrderPatch) -> StoreResult<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        order.apply(patch, Utc::now());
        Ok(order.clone())
    }

    async fn list(&self, query: &OrderQuery) -> StoreResult<OrderPage> {
        let orders = self.orders.read().await;
        let mut matching: Vec<&Order> = orders
            .values()
            .filter(|order| query.filter.matches(order))
            .collect();
        matching.sort_by(|a, b| query.sort.compare(a, b));

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(query.page_size() as usize)
            .cloned()
            .collect();

        Ok(OrderPage {
            items,
            total,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn aggregate_stats(&self) -> StoreResult<OrderStats> {
        let orders = self.orders.read().await;
        Ok(OrderStats::from_orders(orders.values()))
    }

    async fn counts_by_status(&self, range: Option<&DateRange>) -> StoreResult<Vec<StatusCount>> {
        let orders = self.orders.read().await;
        Ok(StatusCount::tally(
            orders
                .values()
                .filter(|order| range.map_or(true, |range| range.contains(order.created_at))),
        ))
    }

    async fn recent(&self, limit: u32) -> StoreResult<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut all: Vec<&Order> = orders.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all.into_iter().take(limit as usize).cloned().collect())
    }

    async fn revenue_series(
        &self,
        range: &DateRange,
        bucket: RevenueBucket,
    ) -> StoreResult<Vec<RevenuePoint>> {
        let filter = OrderFilter::completed(Some(*range));
        let orders = self.orders.read().await;
        Ok(RevenuePoint::series(
            orders.values().filter(|order| filter.matches(order)),
            bucket,
        ))
    }

    async fn top_customers(&self, limit: u32) -> StoreResult<Vec<CustomerSummary>> {
        let filter = OrderFilter::completed(None);
        let orders = self.orders.read().await;
        Ok(CustomerSummary::rank(
            orders.values().filter(|order| filter.matches(order)),
            limit,
        ))
    }

    async fn completed_summary(&self, range: &DateRange) -> StoreResult<PeriodSummary> {
        let filter = OrderFilter::completed(Some(*range));
        let orders = self.orders.read().await;
        Ok(PeriodSummary::from_orders(
            orders.values().filter(|order| filter.matches(order)),
        ))
    }
}
