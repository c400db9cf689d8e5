use serde::Deserialize;
use std::env;
use storefront_order::PricingRules;
use storefront_shared::Masked;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub courier: CourierConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Without a URL orders live in memory for the life of the process.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct CourierConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: String,
    pub client_id: Masked<String>,
    pub client_secret: Masked<String>,
    pub client_context: Masked<String>,
    pub store_id: String,
    /// Sent as `area_id`; address resolution never returns one.
    #[serde(default)]
    pub area_id_fallback: i64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_provider() -> String { "carrybee".to_string() }
fn default_timeout_ms() -> u64 { 10_000 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: Masked<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_low_tier_fee")]
    pub low_tier_fee: i64,
    #[serde(default = "default_high_tier_fee")]
    pub high_tier_fee: i64,
    #[serde(default = "default_low_cost_cities")]
    pub low_cost_cities: Vec<String>,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default = "default_item_weight")]
    pub default_item_weight_grams: u32,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_low_tier_fee() -> i64 { 80 }
fn default_high_tier_fee() -> i64 { 130 }
fn default_low_cost_cities() -> Vec<String> { vec!["dhaka".to_string()] }
fn default_item_weight() -> u32 { 500 }
fn default_currency() -> String { "BDT".to_string() }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            low_tier_fee: default_low_tier_fee(),
            high_tier_fee: default_high_tier_fee(),
            low_cost_cities: default_low_cost_cities(),
            tax_rate: 0.0,
            default_item_weight_grams: default_item_weight(),
            currency: default_currency(),
        }
    }
}

impl BusinessRules {
    pub fn pricing(&self) -> PricingRules {
        PricingRules {
            low_tier_fee: self.low_tier_fee,
            high_tier_fee: self.high_tier_fee,
            low_cost_cities: self.low_cost_cities.clone(),
            tax_rate: self.tax_rate,
            currency: self.currency.clone(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. STOREFRONT__COURIER__CLIENT_SECRET
            .add_source(config::Environment::with_prefix("STOREFRONT").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
