use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_shared::Masked;

use crate::order::{Money, Order};

pub const DEFAULT_ITEM_WEIGHT_GRAMS: u32 = 500;
pub const DEFAULT_CANCELLATION_REASON: &str = "Cancelled by admin";

/// Location identifiers returned by the courier's geocoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub city_id: i64,
    pub zone_id: i64,
}

/// Everything a courier needs to open a consignment for one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsignmentSpec {
    /// Local order number.
    pub merchant_order_ref: String,
    pub recipient_name: String,
    pub recipient_phone: Masked<String>,
    pub recipient_address: String,
    pub location: ResolvedLocation,
    pub item_weight_grams: u32,
    pub item_quantity: u32,
    /// Cash on delivery: always the order total.
    pub collectable_amount: Money,
    pub description: String,
}

impl ConsignmentSpec {
    pub fn for_order(
        order: &Order,
        location: ResolvedLocation,
        item_weight: Option<i64>,
        default_weight_grams: u32,
    ) -> Self {
        let address = &order.shipping_address;
        Self {
            merchant_order_ref: order.order_number.clone(),
            recipient_name: address.recipient_name(),
            recipient_phone: address.phone.clone(),
            recipient_address: address.free_text(),
            location,
            item_weight_grams: normalize_item_weight(item_weight, default_weight_grams),
            item_quantity: u32::try_from(order.items.len()).unwrap_or(u32::MAX),
            collectable_amount: order.total,
            description: order.item_names(),
        }
    }
}

/// Missing, zero and negative weights fall back to the default.
pub fn normalize_item_weight(weight: Option<i64>, default_grams: u32) -> u32 {
    let fallback = if default_grams == 0 {
        DEFAULT_ITEM_WEIGHT_GRAMS
    } else {
        default_grams
    };
    match weight {
        Some(grams) if grams > 0 => u32::try_from(grams).unwrap_or(u32::MAX),
        _ => fallback,
    }
}

/// Blank reasons become the fixed fallback.
pub fn cancellation_reason(reason: Option<&str>) -> String {
    match reason.map(str::trim) {
        Some(reason) if !reason.is_empty() => reason.to_string(),
        _ => DEFAULT_CANCELLATION_REASON.to_string(),
    }
}

/// Rejects an effectively empty geocoding query before it reaches the network.
pub fn ensure_address(free_text: &str) -> Result<&str, CourierError> {
    let trimmed = free_text.trim();
    let meaningful = trimmed
        .split(',')
        .any(|part| !part.trim().is_empty());
    if meaningful {
        Ok(trimmed)
    } else {
        Err(CourierError::EmptyAddress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CourierError {
    #[error("Courier unavailable: {0}")]
    Unavailable(String),

    #[error("Courier request timed out")]
    Timeout,

    #[error("Courier rejected the request: {reason}")]
    Rejected { reason: String },

    #[error("Courier could not resolve address: {0}")]
    AddressUnresolved(String),

    #[error("Shipping address is empty")]
    EmptyAddress,
}

impl CourierError {
    pub fn kind(&self) -> &'static str {
        match self {
            CourierError::Unavailable(_) => "courier_unavailable",
            CourierError::Timeout => "courier_timeout",
            CourierError::Rejected { .. } => "courier_rejected",
            CourierError::AddressUnresolved(_) => "address_unresolved",
            CourierError::EmptyAddress => "empty_address",
        }
    }

    /// Whether an operator retry with the same payload may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CourierError::Unavailable(_) | CourierError::Timeout)
    }
}

/// Stateless adapter to an external delivery provider. Every call is a
/// network round trip; implementations carry their own bounded timeout.
#[async_trait]
pub trait CourierGateway: Send + Sync {
    /// Provider name recorded in the courier linkage.
    fn provider(&self) -> &str;

    async fn resolve_address(&self, free_text: &str) -> Result<ResolvedLocation, CourierError>;

    /// Returns the provider-issued consignment id.
    async fn create_consignment(&self, spec: &ConsignmentSpec) -> Result<String, CourierError>;

    /// Must treat "already cancelled" as success.
    async fn cancel_consignment(&self, consignment_id: &str, reason: &str) -> Result<(), CourierError>;
}
