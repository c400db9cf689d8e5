use std::sync::Arc;
use storefront_order::FulfillmentCoordinator;
use storefront_shared::Masked;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: Masked<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<FulfillmentCoordinator>,
    pub auth: AuthConfig,
}
