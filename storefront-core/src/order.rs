use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use storefront_shared::Masked;

use crate::CoreError;

/// Amounts in whole units of the shop currency.
pub type Money = i64;

/// Order status in the fulfillment lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// `cancelled` is absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }

    /// Whether an operator may move an order from `self` to `next`.
    ///
    /// Any non-cancelled state may move to any other non-cancelled state.
    /// Cancellation is only reachable from pending, processing and shipped.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::Cancelled, _) => false,
            (OrderStatus::Delivered, OrderStatus::Cancelled) => false,
            _ => true,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(CoreError::ValidationError(format!("unknown order status '{}'", other))),
        }
    }
}

/// Payment status, independent of [`OrderStatus`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(CoreError::ValidationError(format!("unknown payment status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethodKind {
    Card,
    Paypal,
    Stripe,
    Cod,
    Bkash,
    Nagad,
}

/// Only the tag is ever persisted; card details are dropped at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMethod {
    #[serde(rename = "type")]
    pub kind: PaymentMethodKind,
}

impl PaymentMethod {
    pub fn new(kind: PaymentMethodKind) -> Self {
        Self { kind }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingAddress {
    pub first_name: String,
    pub last_name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
}

impl ShippingAddress {
    pub const DEFAULT_COUNTRY: &'static str = "BD";
    const FREE_TEXT_DELIMITER: &'static str = ", ";

    pub fn recipient_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// Street, city, postal code and country joined with a fixed delimiter,
    /// skipping blank parts. This is the query sent for courier geocoding.
    pub fn free_text(&self) -> String {
        [&self.street, &self.city, &self.postal_code, &self.country]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(Self::FREE_TEXT_DELIMITER)
    }

    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required: [(&'static str, &str); 7] = [
            ("first_name", self.first_name.as_str()),
            ("last_name", self.last_name.as_str()),
            ("email", self.email.expose().as_str()),
            ("phone", self.phone.expose().as_str()),
            ("street", self.street.as_str()),
            ("city", self.city.as_str()),
            ("postal_code", self.postal_code.as_str()),
        ];
        required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect()
    }
}

/// A product snapshot taken at checkout. Immutable once the order exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderItem {
    /// `None` when price times quantity does not fit in `Money`.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(Money::from(self.quantity))
    }
}

/// (provider, consignment id) recorded once a dispatch succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourierLinkage {
    pub provider: String,
    pub consignment_id: String,
}

impl CourierLinkage {
    pub fn new(provider: impl Into<String>, consignment_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            consignment_id: consignment_id.into(),
        }
    }

    pub fn is_dispatched(&self) -> bool {
        !self.provider.trim().is_empty() && !self.consignment_id.trim().is_empty()
    }
}

/// Checkout input for the Order Store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

/// The durable record of a customer's purchase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub total: Money,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub courier: Option<CourierLinkage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The courier linkage, only if it names a live consignment.
    pub fn dispatched_linkage(&self) -> Option<&CourierLinkage> {
        self.courier.as_ref().filter(|linkage| linkage.is_dispatched())
    }

    pub fn item_names(&self) -> String {
        self.items
            .iter()
            .map(|item| {
                if item.name.trim().is_empty() {
                    "Unknown Item"
                } else {
                    item.name.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Apply a patch in place and bump `updated_at` so it always moves
    /// strictly forward.
    pub fn apply(&mut self, patch: &OrderPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(payment_status) = patch.payment_status {
            self.payment_status = payment_status;
        }
        if let Some(courier) = &patch.courier {
            self.courier = courier.clone();
        }
        let floor = self.updated_at + chrono::Duration::microseconds(1);
        self.updated_at = if now > floor { now } else { floor };
    }
}

/// Field-level update accepted by `OrderRepository::apply_fields`.
///
/// `courier: Some(None)` clears the linkage; `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub courier: Option<Option<CourierLinkage>>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn payment_status(payment_status: PaymentStatus) -> Self {
        Self {
            payment_status: Some(payment_status),
            ..Default::default()
        }
    }

    pub fn courier(linkage: CourierLinkage) -> Self {
        Self {
            courier: Some(Some(linkage)),
            ..Default::default()
        }
    }

    pub fn clear_courier() -> Self {
        Self {
            courier: Some(None),
            ..Default::default()
        }
    }
}
