//! Escrow Marketplace - cart and order service

use std::sync::Arc;

use anyhow::Result;
use escrow_market::config::AppConfig;
use escrow_market::http::{router, AppState};
use escrow_market::outbound::memory::{InMemoryCartStore, InMemoryCatalog, InMemoryOrderStore};
use escrow_market::outbound::nats::NatsEventPublisher;
use escrow_market::outbound::postgres::{self, PgCartStore, PgOrderStore, PgProductCatalog};
use escrow_market::ports::{CartStore, EventPublisher, NoopEventPublisher, OrderStore, ProductCatalog};
use escrow_market::services::{clear_backoff, write_backoff, CartService, OrderService, TotalAggregator};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let (carts, orders, catalog): (Arc<dyn CartStore>, Arc<dyn OrderStore>, Arc<dyn ProductCatalog>) = match &config.database_url {
        Some(url) => {
            let pool = postgres::connect(url, config.database_max_connections).await?;
            tracing::info!("using PostgreSQL storage");
            (Arc::new(PgCartStore::new(pool.clone())), Arc::new(PgOrderStore::new(pool.clone())), Arc::new(PgProductCatalog::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory storage with an empty catalog");
            (Arc::new(InMemoryCartStore::new()), Arc::new(InMemoryOrderStore::new()), Arc::new(InMemoryCatalog::new()))
        }
    };

    let events: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsEventPublisher::new(client, config.nats_subject_prefix.clone())),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable; events will not be published");
                Arc::new(NoopEventPublisher)
            }
        },
        None => Arc::new(NoopEventPublisher),
    };

    let cart_service = CartService::new(carts, TotalAggregator::new(catalog), events.clone(), &config.default_currency)
        .with_write_backoff(write_backoff(config.cart_total_max_attempts));
    let order_service = OrderService::new(cart_service.clone(), orders, events)
        .with_clear_backoff(clear_backoff(config.cart_clear_max_retries));
    let state = AppState { carts: cart_service, orders: order_service };

    let app = router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()));

    tracing::info!("🚀 Escrow Market listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
