mod config;
mod credits;
mod db;
mod errors;
mod models;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::credits::month::SystemClock;
use crate::credits::repository::{PgConfigRepository, PgLedgerRepository};
use crate::credits::service::CreditService;
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting HireLens credits API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (pool + migrations)
    let db = create_pool(&config.database_url).await?;

    // Wire the credit service against the Postgres repositories
    let credits = CreditService::new(
        Arc::new(PgConfigRepository::new(db.clone())),
        Arc::new(PgLedgerRepository::new(db)),
        Arc::new(SystemClock),
    );
    info!("Credit service initialized");

    let state = AppState { credits };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
