use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::order::{Money, Order, OrderPatch, OrderStatus, PaymentStatus};
use crate::{CoreError, CoreResult, StoreResult};
use storefront_shared::Masked;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Orders that have left the warehouse. Revenue, customer and trend
/// reports count only these.
pub const COMPLETED_STATUSES: [OrderStatus; 2] = [OrderStatus::Shipped, OrderStatus::Delivered];

/// Order Store contract.
///
/// Stores persist and read; they do not enforce the status state machine.
/// `apply_fields` is an unconditional field-level update so every legal
/// transition is decided one layer up, in the fulfillment coordinator.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Order>;

    async fn get_by_number(&self, order_number: &str) -> StoreResult<Order>;

    /// Newest first.
    async fn list_by_email(&self, email: &str) -> StoreResult<Vec<Order>>;

    /// Write the given fields, bump `updated_at`, return the stored order.
    async fn apply_fields(&self, id: Uuid, patch: &OrderPatch) -> StoreResult<Order>;

    async fn list(&self, query: &OrderQuery) -> StoreResult<OrderPage>;

    /// Computed over every order at query time; revenue sums `total`
    /// regardless of status.
    async fn aggregate_stats(&self) -> StoreResult<OrderStats>;

    /// Count per status, most frequent first. `range` limits it to orders
    /// created inside the window.
    async fn counts_by_status(&self, range: Option<&DateRange>) -> StoreResult<Vec<StatusCount>>;

    async fn recent(&self, limit: u32) -> StoreResult<Vec<Order>>;

    /// Completed orders created inside `range`, grouped by UTC day or month,
    /// oldest period first. Periods without sales are omitted.
    async fn revenue_series(
        &self,
        range: &DateRange,
        bucket: RevenueBucket,
    ) -> StoreResult<Vec<RevenuePoint>>;

    /// Completed orders grouped by customer email, biggest spenders first.
    async fn top_customers(&self, limit: u32) -> StoreResult<Vec<CustomerSummary>>;

    /// Count, revenue and average value of completed orders in `range`.
    async fn completed_summary(&self, range: &DateRange) -> StoreResult<PeriodSummary>;
}

/// Creation-time window, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if start > end {
            return Err(CoreError::ValidationError(
                "Date range start must not be after its end".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending at `end`.
    pub fn last_days(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
        }
    }

    /// Window of the same length that ends just before this one starts.
    pub fn preceding(&self) -> Self {
        let end = self.start - Duration::microseconds(1);
        Self {
            start: end - (self.end - self.start),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    /// Exact status.
    pub status: Option<OrderStatus>,
    /// Any of these statuses; empty means no constraint.
    #[serde(default)]
    pub statuses: Vec<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub created: Option<DateRange>,
    pub search: Option<String>,
}

impl OrderFilter {
    /// Search text with surrounding whitespace removed; blank means none.
    pub fn search_text(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Completed orders, optionally inside a creation window.
    pub fn completed(created: Option<DateRange>) -> Self {
        Self {
            statuses: COMPLETED_STATUSES.to_vec(),
            created,
            ..Default::default()
        }
    }

    /// Reference semantics for the filter, shared by every store.
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(status) = self.status {
            if order.status != status {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&order.status) {
            return false;
        }
        if let Some(payment_status) = self.payment_status {
            if order.payment_status != payment_status {
                return false;
            }
        }
        if let Some(range) = &self.created {
            if !range.contains(order.created_at) {
                return false;
            }
        }
        match self.search_text() {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                let address = &order.shipping_address;
                [
                    order.order_number.as_str(),
                    address.first_name.as_str(),
                    address.last_name.as_str(),
                    address.email.expose().as_str(),
                ]
                .iter()
                .any(|haystack| haystack.to_lowercase().contains(&needle))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Total,
    OrderNumber,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Total => "total",
            SortField::OrderNumber => "order_number",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Defaults to newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl OrderSort {
    pub fn compare(&self, a: &Order, b: &Order) -> Ordering {
        let ordering = match self.field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Total => a.total.cmp(&b.total),
            SortField::OrderNumber => a.order_number.cmp(&b.order_number),
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderQuery {
    pub filter: OrderFilter,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
    pub sort: OrderSort,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            filter: OrderFilter::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: OrderSort::default(),
        }
    }
}

impl OrderQuery {
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.page_size())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl OrderPage {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next_page(&self) -> bool {
        u64::from(self.page) < self.total_pages()
    }

    pub fn has_prev_page(&self) -> bool {
        self.page > 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_orders: u64,
    pub total_revenue: Money,
    pub average_order_value: f64,
    pub pending_count: u64,
    pub processing_count: u64,
}

impl OrderStats {
    /// Fold a set of orders into stats. Stores that can push the
    /// aggregation down to the database do so instead.
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut stats = OrderStats::default();
        for order in orders {
            stats.total_orders += 1;
            stats.total_revenue = stats.total_revenue.saturating_add(order.total);
            match order.status {
                OrderStatus::Pending => stats.pending_count += 1,
                OrderStatus::Processing => stats.processing_count += 1,
                _ => {}
            }
        }
        if stats.total_orders > 0 {
            stats.average_order_value = stats.total_revenue as f64 / stats.total_orders as f64;
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: u64,
}

impl StatusCount {
    /// Non-zero counts, most frequent first.
    pub fn tally<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Vec<Self> {
        let mut counts: HashMap<OrderStatus, u64> = HashMap::new();
        for order in orders {
            *counts.entry(order.status).or_default() += 1;
        }
        let mut tally: Vec<Self> = OrderStatus::ALL
            .iter()
            .filter_map(|status| {
                counts.get(status).map(|count| StatusCount { status: *status, count: *count })
            })
            .collect();
        tally.sort_by(|a, b| b.count.cmp(&a.count));
        tally
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevenueBucket {
    #[default]
    Day,
    Month,
}

impl RevenueBucket {
    /// `YYYY-MM-DD` or `YYYY-MM`, in UTC.
    pub fn label(&self, at: DateTime<Utc>) -> String {
        match self {
            RevenueBucket::Day => at.format("%Y-%m-%d").to_string(),
            RevenueBucket::Month => at.format("%Y-%m").to_string(),
        }
    }

    /// Postgres `to_char` pattern producing the same label.
    pub fn pg_format(&self) -> &'static str {
        match self {
            RevenueBucket::Day => "YYYY-MM-DD",
            RevenueBucket::Month => "YYYY-MM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenuePoint {
    pub period: String,
    pub revenue: Money,
    pub order_count: u64,
}

impl RevenuePoint {
    /// Bucket already-filtered orders; oldest period first.
    pub fn series<'a>(
        orders: impl IntoIterator<Item = &'a Order>,
        bucket: RevenueBucket,
    ) -> Vec<Self> {
        let mut periods: BTreeMap<String, (Money, u64)> = BTreeMap::new();
        for order in orders {
            let entry = periods.entry(bucket.label(order.created_at)).or_default();
            entry.0 = entry.0.saturating_add(order.total);
            entry.1 += 1;
        }
        periods
            .into_iter()
            .map(|(period, (revenue, order_count))| RevenuePoint { period, revenue, order_count })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub email: Masked<String>,
    /// Name on the customer's latest order.
    pub name: String,
    pub total_orders: u64,
    pub total_spent: Money,
    pub last_order_at: DateTime<Utc>,
}

impl CustomerSummary {
    /// Group already-filtered orders by email; ties on spend break by email.
    pub fn rank<'a>(orders: impl IntoIterator<Item = &'a Order>, limit: u32) -> Vec<Self> {
        let mut customers: HashMap<&str, CustomerSummary> = HashMap::new();
        for order in orders {
            let address = &order.shipping_address;
            let name = format!("{} {}", address.first_name, address.last_name);
            let summary = customers
                .entry(address.email.expose().as_str())
                .or_insert_with(|| CustomerSummary {
                    email: address.email.clone(),
                    name: name.clone(),
                    total_orders: 0,
                    total_spent: 0,
                    last_order_at: order.created_at,
                });
            summary.total_orders += 1;
            summary.total_spent = summary.total_spent.saturating_add(order.total);
            if order.created_at >= summary.last_order_at {
                summary.last_order_at = order.created_at;
                summary.name = name;
            }
        }
        let mut ranked: Vec<Self> = customers.into_values().collect();
        ranked.sort_by(|a, b| {
            b.total_spent
                .cmp(&a.total_spent)
                .then_with(|| a.email.expose().cmp(b.email.expose()))
        });
        ranked.truncate(limit as usize);
        ranked
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub total_orders: u64,
    pub total_revenue: Money,
    pub average_order_value: f64,
}

impl PeriodSummary {
    pub fn new(total_orders: u64, total_revenue: Money) -> Self {
        let average_order_value = if total_orders > 0 {
            round2(total_revenue as f64 / total_orders as f64)
        } else {
            0.0
        };
        Self {
            total_orders,
            total_revenue,
            average_order_value,
        }
    }

    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let (count, revenue) = orders
            .into_iter()
            .fold((0u64, 0 as Money), |(count, revenue), order| {
                (count + 1, revenue.saturating_add(order.total))
            });
        Self::new(count, revenue)
    }
}

/// Completed-order activity over the last `days` days against the window
/// of the same length before it. Growth rates are percentages; a previous
/// window with nothing in it gives 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderTrends {
    pub days: u32,
    pub current: PeriodSummary,
    pub previous: PeriodSummary,
    pub growth_rate: f64,
    pub revenue_growth_rate: f64,
}

impl OrderTrends {
    pub fn compare(days: u32, current: PeriodSummary, previous: PeriodSummary) -> Self {
        Self {
            days,
            current,
            previous,
            growth_rate: growth(current.total_orders as f64, previous.total_orders as f64),
            revenue_growth_rate: growth(current.total_revenue as f64, previous.total_revenue as f64),
        }
    }
}

fn growth(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        round2((current - previous) / previous * 100.0)
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_normalization() {
        let query = OrderQuery { page: 0, page_size: 500, ..Default::default() };
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), MAX_PAGE_SIZE);
        assert_eq!(query.offset(), 0);

        let query = OrderQuery { page: 2, page_size: 12, ..Default::default() };
        assert_eq!(query.offset(), 12);
    }

    #[test]
    fn test_page_navigation() {
        let page = OrderPage { items: vec![], total: 15, page: 1, page_size: 12 };
        assert_eq!(page.total_pages(), 2);
        assert!(page.has_next_page());
        assert!(!page.has_prev_page());

        let page = OrderPage { items: vec![], total: 15, page: 2, page_size: 12 };
        assert!(!page.has_next_page());
        assert!(page.has_prev_page());
    }

    #[test]
    fn test_empty_filter_search_is_ignored() {
        let filter = OrderFilter { search: Some("   ".to_string()), ..Default::default() };
        assert_eq!(filter.search_text(), None);
    }

    #[test]
    fn test_date_range_rejects_inverted_window() {
        let now = Utc::now();
        assert!(DateRange::new(now, now).is_ok());
        assert!(matches!(
            DateRange::new(now, now - Duration::seconds(1)),
            Err(CoreError::ValidationError(_))
        ));
    }

    #[test]
    fn test_preceding_window_does_not_overlap() {
        let end = Utc::now();
        let window = DateRange::last_days(end, 30);
        let previous = window.preceding();
        assert!(previous.end < window.start);
        assert_eq!(previous.end - previous.start, window.end - window.start);
        assert!(!previous.contains(window.start));
    }

    #[test]
    fn test_trend_growth_rates() {
        let trends = OrderTrends::compare(30, PeriodSummary::new(6, 3000), PeriodSummary::new(4, 4000));
        assert_eq!(trends.growth_rate, 50.0);
        assert_eq!(trends.revenue_growth_rate, -25.0);
        assert_eq!(trends.current.average_order_value, 500.0);

        let from_nothing = OrderTrends::compare(7, PeriodSummary::new(3, 900), PeriodSummary::default());
        assert_eq!(from_nothing.growth_rate, 0.0);
        assert_eq!(from_nothing.revenue_growth_rate, 0.0);
    }

    #[test]
    fn test_period_summary_rounds_average() {
        let summary = PeriodSummary::new(3, 1000);
        assert_eq!(summary.average_order_value, 333.33);
        assert_eq!(PeriodSummary::new(0, 0).average_order_value, 0.0);
    }
}
