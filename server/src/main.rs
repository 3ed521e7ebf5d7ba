//! Duplex Server - HTTP front for dual-store ERP replication.
//!
//! Every write is applied to the primary PostgreSQL database and mirrored,
//! with the same ids, to the secondary one through the duplex-engine
//! services. Maintenance routes report and repair drift between the two.

mod auth;
mod config;
mod db;
mod entities;
mod error;
mod handlers;
mod routes;

use crate::config::Config;
use crate::db::PgStore;
use axum::Router;
use duplex_engine::Stores;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "duplex_server=debug,duplex_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Duplex Server on {}:{}", config.host, config.port);

    // Create database pools
    let primary =
        db::create_pool("primary", &config.primary_database_url, config.max_connections).await?;
    let secondary = db::create_pool(
        "secondary",
        &config.secondary_database_url,
        config.max_connections,
    )
    .await?;

    // Run migrations
    if config.run_migrations {
        db::run_migrations("primary", &primary).await?;
        db::run_migrations("secondary", &secondary).await?;
    }

    // Build application state
    let stores = Stores::new(
        Arc::new(PgStore::new("primary", primary)),
        Arc::new(PgStore::new("secondary", secondary)),
        entities::registry(),
    );
    let state = AppState {
        stores,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
