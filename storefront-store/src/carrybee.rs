use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use storefront_core::{ConsignmentSpec, CourierError, CourierGateway, ResolvedLocation};
use storefront_shared::Masked;

use crate::app_config::CourierConfig;

const DELIVERY_TYPE_NORMAL: u8 = 1;
const PRODUCT_TYPE_PARCEL: u8 = 1;

/// Every CarryBee response carries `error`, even on HTTP 200.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    error: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Serialize)]
struct AddressQuery<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct AddressDetails {
    city_id: Option<i64>,
    zone_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    store_id: &'a str,
    merchant_order_id: &'a str,
    delivery_type: u8,
    product_type: u8,
    recipient_phone: &'a str,
    recipient_secendary_phone: Option<&'a str>,
    recipient_name: &'a str,
    recipient_address: &'a str,
    city_id: i64,
    zone_id: i64,
    area_id: i64,
    special_instruction: Option<&'a str>,
    product_description: &'a str,
    item_weight: u32,
    item_quantity: u32,
    collectable_amount: i64,
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedOrderData {
    order: Option<CreatedOrder>,
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
    consignment_id: Option<String>,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    cancellation_reason: &'a str,
}

/// Raw outcome of one HTTP exchange: status plus the envelope, if the body
/// parsed as one.
struct Reply<T> {
    status: StatusCode,
    envelope: Option<Envelope<T>>,
}

pub struct CarryBeeGateway {
    client: Client,
    base_url: String,
    provider: String,
    client_id: Masked<String>,
    client_secret: Masked<String>,
    client_context: Masked<String>,
    store_id: String,
    area_id_fallback: i64,
}

impl CarryBeeGateway {
    pub fn new(config: &CourierConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            provider: config.provider.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            client_context: config.client_context.clone(),
            store_id: config.store_id.clone(),
            area_id_fallback: config.area_id_fallback,
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<Reply<T>, CourierError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Client-ID", self.client_id.expose().as_str())
            .header("Client-Secret", self.client_secret.expose().as_str())
            .header("Client-Context", self.client_context.expose().as_str())
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        let envelope = serde_json::from_str::<Envelope<T>>(&text).ok();
        if envelope.is_none() {
            warn!("CarryBee {} returned HTTP {} with an unreadable body", path, status);
        }
        Ok(Reply { status, envelope })
    }
}

fn transport_error(err: reqwest::Error) -> CourierError {
    if err.is_timeout() {
        CourierError::Timeout
    } else {
        CourierError::Unavailable(err.to_string())
    }
}

fn interpret_address(reply: Reply<AddressDetails>) -> Result<ResolvedLocation, CourierError> {
    if reply.status.is_server_error() {
        return Err(CourierError::Unavailable(format!("HTTP {}", reply.status)));
    }
    let envelope = reply
        .envelope
        .ok_or_else(|| CourierError::AddressUnresolved(format!("HTTP {}", reply.status)))?;
    if !reply.status.is_success() || envelope.error {
        return Err(CourierError::AddressUnresolved(envelope.message));
    }
    let details = envelope.data.ok_or_else(|| {
        CourierError::AddressUnresolved("no location returned".to_string())
    })?;
    match (details.city_id, details.zone_id) {
        (Some(city_id), Some(zone_id)) if city_id > 0 && zone_id > 0 => {
            Ok(ResolvedLocation { city_id, zone_id })
        }
        _ => Err(CourierError::AddressUnresolved(
            "city_id/zone_id missing from response".to_string(),
        )),
    }
}

fn interpret_create(reply: Reply<CreatedOrderData>) -> Result<String, CourierError> {
    if reply.status.is_server_error() {
        return Err(CourierError::Unavailable(format!("HTTP {}", reply.status)));
    }
    let envelope = reply.envelope.ok_or_else(|| CourierError::Rejected {
        reason: format!("HTTP {} with unreadable body", reply.status),
    })?;
    if !reply.status.is_success() || envelope.error {
        return Err(CourierError::Rejected { reason: envelope.message });
    }
    envelope
        .data
        .and_then(|data| data.order)
        .and_then(|order| order.consignment_id)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| CourierError::Rejected {
            reason: "no consignment id in response".to_string(),
        })
}

fn interpret_cancel(reply: Reply<serde_json::Value>) -> Result<(), CourierError> {
    if reply.status.is_server_error() {
        return Err(CourierError::Unavailable(format!("HTTP {}", reply.status)));
    }
    match reply.envelope {
        None if reply.status.is_success() => Ok(()),
        None => Err(CourierError::Rejected {
            reason: format!("HTTP {} with unreadable body", reply.status),
        }),
        Some(envelope) if reply.status.is_success() && !envelope.error => Ok(()),
        Some(envelope) if envelope.message.to_lowercase().contains("already cancel") => Ok(()),
        Some(envelope) => Err(CourierError::Rejected { reason: envelope.message }),
    }
}

#[async_trait]
impl CourierGateway for CarryBeeGateway {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn resolve_address(&self, free_text: &str) -> Result<ResolvedLocation, CourierError> {
        debug!("Resolving address with CarryBee: {}", free_text);
        let reply = self
            .post("/api/v2/address-details", &AddressQuery { query: free_text })
            .await?;
        interpret_address(reply)
    }

    async fn create_consignment(&self, spec: &ConsignmentSpec) -> Result<String, CourierError> {
        let request = CreateOrderRequest {
            store_id: &self.store_id,
            merchant_order_id: &spec.merchant_order_ref,
            delivery_type: DELIVERY_TYPE_NORMAL,
            product_type: PRODUCT_TYPE_PARCEL,
            recipient_phone: spec.recipient_phone.expose(),
            recipient_secendary_phone: None,
            recipient_name: &spec.recipient_name,
            recipient_address: &spec.recipient_address,
            city_id: spec.location.city_id,
            zone_id: spec.location.zone_id,
            area_id: self.area_id_fallback,
            special_instruction: None,
            product_description: &spec.description,
            item_weight: spec.item_weight_grams,
            item_quantity: spec.item_quantity,
            collectable_amount: spec.collectable_amount,
            is_closed: false,
        };
        debug!(
            "Creating CarryBee consignment for {} (recipient phone {})",
            spec.merchant_order_ref,
            spec.recipient_phone.hint()
        );
        let reply = self.post("/api/v2/orders", &request).await?;
        interpret_create(reply)
    }

    async fn cancel_consignment(&self, consignment_id: &str, reason: &str) -> Result<(), CourierError> {
        let path = format!("/api/v2/orders/{}/cancel", consignment_id);
        let reply = self
            .post(&path, &CancelRequest { cancellation_reason: reason })
            .await?;
        interpret_cancel(reply)
    }
}
