use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::error;
use uuid::Uuid;

use storefront_core::repository::{SortDirection, StatusCount};
use storefront_core::{
    CourierLinkage, CustomerSummary, DateRange, Order, OrderFilter, OrderItem, OrderPage,
    OrderPatch, OrderQuery, OrderRepository, OrderStats, OrderStatus, PaymentMethod,
    PaymentStatus, PeriodSummary, RevenueBucket, RevenuePoint, ShippingAddress, StoreError,
    StoreResult,
};
use storefront_shared::Masked;

const ORDER_COLUMNS: &str = "id, order_number, items, shipping_address, payment_method, \
     subtotal, shipping_fee, tax, total, currency, status, payment_status, \
     courier_provider, courier_consignment_id, created_at, updated_at";

/// Postgres-backed Order Store. One row per order; items, address and
/// payment method are embedded as JSONB snapshots.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count(&self, filter: &OrderFilter) -> StoreResult<u64> {
        let mut count: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM orders");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(u64::try_from(total).unwrap_or_default())
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    items: Json<Vec<OrderItem>>,
    shipping_address: Json<ShippingAddress>,
    payment_method: Json<PaymentMethod>,
    subtotal: i64,
    shipping_fee: i64,
    tax: i64,
    total: i64,
    currency: String,
    status: String,
    payment_status: String,
    courier_provider: Option<String>,
    courier_consignment_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status: OrderStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Persistence(format!("order {}: {}", row.id, e)))?;
        let payment_status: PaymentStatus = row
            .payment_status
            .parse()
            .map_err(|e| StoreError::Persistence(format!("order {}: {}", row.id, e)))?;
        let courier = match (row.courier_provider, row.courier_consignment_id) {
            (Some(provider), Some(consignment_id)) => Some(CourierLinkage { provider, consignment_id }),
            _ => None,
        };

        Ok(Order {
            id: row.id,
            order_number: row.order_number,
            items: row.items.0,
            shipping_address: row.shipping_address.0,
            payment_method: row.payment_method.0,
            subtotal: row.subtotal,
            shipping_fee: row.shipping_fee,
            tax: row.tax,
            total: row.total,
            currency: row.currency,
            status,
            payment_status,
            courier,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_orders: i64,
    total_revenue: i64,
    pending_count: i64,
    processing_count: i64,
}

#[derive(sqlx::FromRow)]
struct RevenueRow {
    period: String,
    revenue: i64,
    order_count: i64,
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    email: String,
    name: String,
    total_orders: i64,
    total_spent: i64,
    last_order_at: DateTime<Utc>,
}

fn persistence(err: sqlx::Error) -> StoreError {
    error!("Order store query failed: {}", err);
    StoreError::Persistence(err.to_string())
}

fn to_orders(rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

/// Escape LIKE metacharacters so search text is matched literally.
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    builder.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if !filter.statuses.is_empty() {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
        builder.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(payment_status) = filter.payment_status {
        builder.push(" AND payment_status = ").push_bind(payment_status.as_str());
    }
    if let Some(range) = filter.created {
        builder
            .push(" AND created_at >= ")
            .push_bind(range.start)
            .push(" AND created_at <= ")
            .push_bind(range.end);
    }
    if let Some(search) = filter.search_text() {
        let pattern = like_pattern(search);
        builder
            .push(" AND (order_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR shipping_address->>'first_name' ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR shipping_address->>'last_name' ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR customer_email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        let (courier_provider, courier_consignment_id) = match &order.courier {
            Some(linkage) => (Some(linkage.provider.clone()), Some(linkage.consignment_id.clone())),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, items, shipping_address, customer_email, payment_method,
                                subtotal, shipping_fee, tax, total, currency, status, payment_status,
                                courier_provider, courier_consignment_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(Json(&order.items))
        .bind(Json(&order.shipping_address))
        .bind(order.shipping_address.email.expose())
        .bind(Json(&order.payment_method))
        .bind(order.subtotal)
        .bind(order.shipping_fee)
        .bind(order.tax)
        .bind(order.total)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(courier_provider)
        .bind(courier_consignment_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;

        row.ok_or_else(|| StoreError::NotFound(id.to_string()))?.try_into()
    }

    async fn get_by_number(&self, order_number: &str) -> StoreResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_number = $1",
            ORDER_COLUMNS
        ))
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;

        row.ok_or_else(|| StoreError::NotFound(order_number.to_string()))?.try_into()
    }

    async fn list_by_email(&self, email: &str) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE customer_email = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        to_orders(rows)
    }

    async fn apply_fields(&self, id: Uuid, patch: &OrderPatch) -> StoreResult<Order> {
        // Timestamps are microsecond precision in Postgres.
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "UPDATE orders SET updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond')",
        );
        if let Some(status) = patch.status {
            builder.push(", status = ").push_bind(status.as_str());
        }
        if let Some(payment_status) = patch.payment_status {
            builder.push(", payment_status = ").push_bind(payment_status.as_str());
        }
        match &patch.courier {
            Some(Some(linkage)) => {
                builder
                    .push(", courier_provider = ")
                    .push_bind(linkage.provider.clone())
                    .push(", courier_consignment_id = ")
                    .push_bind(linkage.consignment_id.clone());
            }
            Some(None) => {
                builder.push(", courier_provider = NULL, courier_consignment_id = NULL");
            }
            None => {}
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(ORDER_COLUMNS);

        let row = builder
            .build_query_as::<OrderRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;

        row.ok_or_else(|| StoreError::NotFound(id.to_string()))?.try_into()
    }

    async fn list(&self, query: &OrderQuery) -> StoreResult<OrderPage> {
        let total = self.count(&query.filter).await?;

        let direction = match query.sort.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let mut select: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM orders", ORDER_COLUMNS));
        push_filter(&mut select, &query.filter);
        select
            .push(format!(" ORDER BY {} {}, id", query.sort.field.column(), direction))
            .push(" LIMIT ")
            .push_bind(i64::from(query.page_size()))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));

        let rows = select
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;

        Ok(OrderPage {
            items: to_orders(rows)?,
            total,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn aggregate_stats(&self) -> StoreResult<OrderStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT COUNT(*) AS total_orders,
                   COALESCE(SUM(total), 0)::BIGINT AS total_revenue,
                   COUNT(*) FILTER (WHERE status = 'pending') AS pending_count,
                   COUNT(*) FILTER (WHERE status = 'processing') AS processing_count
            FROM orders
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(persistence)?;

        let total_orders = u64::try_from(row.total_orders).unwrap_or_default();
        let average_order_value = if total_orders > 0 {
            row.total_revenue as f64 / total_orders as f64
        } else {
            0.0
        };

        Ok(OrderStats {
            total_orders,
            total_revenue: row.total_revenue,
            average_order_value,
            pending_count: u64::try_from(row.pending_count).unwrap_or_default(),
            processing_count: u64::try_from(row.processing_count).unwrap_or_default(),
        })
    }

    async fn counts_by_status(&self, range: Option<&DateRange>) -> StoreResult<Vec<StatusCount>> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT status, COUNT(*) AS count FROM orders");
        push_filter(&mut builder, &OrderFilter { created: range.copied(), ..Default::default() });
        builder.push(" GROUP BY status ORDER BY count DESC");

        let rows: Vec<(String, i64)> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = status
                    .parse()
                    .map_err(|e| StoreError::Persistence(format!("status count: {}", e)))?;
                Ok(StatusCount {
                    status,
                    count: u64::try_from(count).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn recent(&self, limit: u32) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders ORDER BY created_at DESC LIMIT $1",
            ORDER_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        to_orders(rows)
    }

    async fn revenue_series(
        &self,
        range: &DateRange,
        bucket: RevenueBucket,
    ) -> StoreResult<Vec<RevenuePoint>> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT to_char(created_at AT TIME ZONE 'UTC', '{}') AS period, \
             COALESCE(SUM(total), 0)::BIGINT AS revenue, COUNT(*) AS order_count FROM orders",
            bucket.pg_format()
        ));
        push_filter(&mut builder, &OrderFilter::completed(Some(*range)));
        builder.push(" GROUP BY period ORDER BY period");

        let rows = builder
            .build_query_as::<RevenueRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;

        Ok(rows
            .into_iter()
            .map(|row| RevenuePoint {
                period: row.period,
                revenue: row.revenue,
                order_count: u64::try_from(row.order_count).unwrap_or_default(),
            })
            .collect())
    }

    async fn top_customers(&self, limit: u32) -> StoreResult<Vec<CustomerSummary>> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            r#"
            SELECT customer_email AS email,
                   COALESCE((ARRAY_AGG((shipping_address->>'first_name') || ' ' || (shipping_address->>'last_name')
                             ORDER BY created_at DESC))[1], '') AS name,
                   COUNT(*) AS total_orders,
                   COALESCE(SUM(total), 0)::BIGINT AS total_spent,
                   MAX(created_at) AS last_order_at
            FROM orders"#,
        );
        push_filter(&mut builder, &OrderFilter::completed(None));
        builder
            .push(" GROUP BY customer_email ORDER BY total_spent DESC, email LIMIT ")
            .push_bind(i64::from(limit));

        let rows = builder
            .build_query_as::<CustomerRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;

        Ok(rows
            .into_iter()
            .map(|row| CustomerSummary {
                email: Masked(row.email),
                name: row.name,
                total_orders: u64::try_from(row.total_orders).unwrap_or_default(),
                total_spent: row.total_spent,
                last_order_at: row.last_order_at,
            })
            .collect())
    }

    async fn completed_summary(&self, range: &DateRange) -> StoreResult<PeriodSummary> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT COUNT(*), COALESCE(SUM(total), 0)::BIGINT FROM orders",
        );
        push_filter(&mut builder, &OrderFilter::completed(Some(*range)));

        let (total_orders, total_revenue): (i64, i64) = builder
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(persistence)?;

        Ok(PeriodSummary::new(
            u64::try_from(total_orders).unwrap_or_default(),
            total_revenue,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::OrderSort;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ord"), "%ord%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_filter_sql() {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM orders");
        push_filter(
            &mut builder,
            &OrderFilter {
                status: Some(OrderStatus::Pending),
                search: Some(" rahim ".to_string()),
                ..Default::default()
            },
        );
        let sql = builder.sql();
        assert!(sql.contains("status = $1"));
        assert!(sql.contains("order_number ILIKE $2"));
        assert!(sql.contains("customer_email ILIKE $5"));
    }

    #[test]
    fn test_blank_search_adds_no_clause() {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM orders");
        push_filter(&mut builder, &OrderFilter { search: Some("  ".to_string()), ..Default::default() });
        assert_eq!(builder.sql(), "SELECT COUNT(*) FROM orders WHERE TRUE");
        assert_eq!(OrderSort::default().field.column(), "created_at");
    }

    #[test]
    fn test_completed_window_sql() {
        let now = Utc::now();
        let range = DateRange::last_days(now, 30);
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM orders");
        push_filter(
            &mut builder,
            &OrderFilter {
                payment_status: Some(PaymentStatus::Paid),
                ..OrderFilter::completed(Some(range))
            },
        );
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM orders WHERE TRUE AND status = ANY($1) \
             AND payment_status = $2 AND created_at >= $3 AND created_at <= $4"
        );
        assert_eq!(RevenueBucket::Month.pg_format(), "YYYY-MM");
    }

    #[test]
    fn test_row_with_half_linkage_is_undispatched() {
        let row = OrderRow {
            id: Uuid::new_v4(),
            order_number: "ORD-1-ABCDEFGHI".to_string(),
            items: Json(vec![]),
            shipping_address: Json(ShippingAddress {
                first_name: "A".to_string(),
                last_name: "B".to_string(),
                email: storefront_shared::Masked("a@example.com".to_string()),
                phone: storefront_shared::Masked("017".to_string()),
                street: "S".to_string(),
                city: "Dhaka".to_string(),
                postal_code: "1000".to_string(),
                country: "BD".to_string(),
            }),
            payment_method: Json(PaymentMethod::new(storefront_core::PaymentMethodKind::Cod)),
            subtotal: 0,
            shipping_fee: 80,
            tax: 0,
            total: 80,
            currency: "BDT".to_string(),
            status: "processing".to_string(),
            payment_status: "pending".to_string(),
            courier_provider: Some("carrybee".to_string()),
            courier_consignment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let order = Order::try_from(row).unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
        assert!(order.courier.is_none());
    }
}
