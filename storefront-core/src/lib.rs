pub mod order;
pub mod repository;
pub mod courier;

pub use order::{
    CourierLinkage, NewOrder, Order, OrderItem, OrderPatch, OrderStatus, PaymentMethod,
    PaymentMethodKind, PaymentStatus, ShippingAddress, Money,
};
pub use repository::{
    CustomerSummary, DateRange, OrderFilter, OrderPage, OrderQuery, OrderRepository, OrderSort,
    OrderStats, OrderTrends, PeriodSummary, RevenueBucket, RevenuePoint,
};
pub use courier::{ConsignmentSpec, CourierError, CourierGateway, ResolvedLocation};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Failures surfaced by an Order Store. Stores never retry on their own.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    NotFound(String),
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
pub type StoreResult<T> = Result<T, StoreError>;
