use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use storefront_api::{app, state::{AppState, AuthConfig}};
use storefront_core::OrderRepository;
use storefront_order::{FulfillmentCoordinator, InMemoryOrderRepository};
use storefront_store::app_config::Config;
use storefront_store::{CarryBeeGateway, DbClient, PgOrderRepository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "storefront_api=debug,storefront_order=debug,storefront_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting storefront API on port {}", config.server.port);

    let orders: Arc<dyn OrderRepository> = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PgOrderRepository::new(db.pool.clone()))
        }
        None => {
            tracing::warn!("No database.url configured; orders are kept in memory");
            Arc::new(InMemoryOrderRepository::new())
        }
    };

    let courier = CarryBeeGateway::new(&config.courier).context("Failed to build courier client")?;
    let rules = &config.business_rules;
    let coordinator = FulfillmentCoordinator::new(orders, Arc::new(courier))
        .with_pricing(rules.pricing())
        .with_default_item_weight(rules.default_item_weight_grams)
        // Outer bound; the HTTP client enforces its own timeout first.
        .with_courier_timeout(Duration::from_millis(config.courier.timeout_ms + 1_000));

    let app_state = AppState {
        coordinator: Arc::new(coordinator),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
