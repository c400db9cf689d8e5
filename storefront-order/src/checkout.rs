use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use storefront_core::{CoreError, CoreResult, NewOrder, Order, OrderStatus, PaymentStatus, ShippingAddress};

use crate::pricing::PricingRules;

const ORDER_NUMBER_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ORDER_NUMBER_SUFFIX_LEN: usize = 9;

/// Validate checkout input and build a pending order with its totals.
pub fn build_order(new_order: NewOrder, rules: &PricingRules) -> CoreResult<Order> {
    let NewOrder {
        items,
        mut shipping_address,
        payment_method,
    } = new_order;

    if items.is_empty() {
        return Err(CoreError::ValidationError("Cart items are required".to_string()));
    }

    for item in &items {
        if item.product_id.trim().is_empty() {
            return Err(CoreError::ValidationError("Every item needs a product id".to_string()));
        }
        if item.quantity == 0 {
            return Err(CoreError::ValidationError(format!(
                "Quantity for product {} must be at least 1",
                item.product_id
            )));
        }
        if item.unit_price < 0 {
            return Err(CoreError::ValidationError(format!(
                "Price for product {} cannot be negative",
                item.product_id
            )));
        }
    }

    let missing = shipping_address.missing_fields();
    if !missing.is_empty() {
        return Err(CoreError::ValidationError(format!(
            "Missing required field: {}",
            missing.join(", ")
        )));
    }

    if shipping_address.country.trim().is_empty() {
        shipping_address.country = ShippingAddress::DEFAULT_COUNTRY.to_string();
    }

    let totals = rules.totals(&items, &shipping_address)?;
    let now = Utc::now();

    Ok(Order {
        id: Uuid::new_v4(),
        order_number: generate_order_number(),
        items,
        shipping_address,
        payment_method,
        subtotal: totals.subtotal,
        shipping_fee: totals.shipping_fee,
        tax: totals.tax,
        total: totals.total,
        currency: rules.currency.clone(),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        courier: None,
        created_at: now,
        updated_at: now,
    })
}

/// Format: ORD-{unix_millis}-{9 uppercase alphanumerics}
pub fn generate_order_number() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| ORDER_NUMBER_CHARSET[rng.gen_range(0..ORDER_NUMBER_CHARSET.len())] as char)
        .collect();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}
