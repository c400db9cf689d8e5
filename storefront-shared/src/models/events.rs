use uuid::Uuid;

// Payloads recorded by the fulfillment coordinator on every transition.

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct StatusChangedEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PaymentStatusChangedEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderDispatchedEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub provider: String,
    pub consignment_id: String,
    pub collectable_amount: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct DispatchFailedEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub provider: String,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderCancelledEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub consignment_id: Option<String>,
    pub reason: String,
    pub timestamp: i64,
}
