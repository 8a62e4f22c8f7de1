use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod metrics;
mod models;
mod services;
mod utils;
mod websocket;

use crate::config::AppConfig;
use crate::db::Database;
use crate::services::matching::{MatchingEngine, OrderFlowOrchestrator};
use crate::services::snapshot::SnapshotPublisher;

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub orchestrator: Arc<OrderFlowOrchestrator>,
    pub snapshot_publisher: Arc<SnapshotPublisher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting limitbook-engine v{} for {}", env!("CARGO_PKG_VERSION"), config.symbol);

    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;
    tracing::info!("database connected and migrated");

    let _metrics_handle = crate::metrics::init_metrics();

    let engine = MatchingEngine::new();

    match engine.recover_orders_from_db(&db.pool).await {
        Ok(count) => {
            if count > 0 {
                tracing::info!("recovered {} resting orders into the book", count);
            } else {
                tracing::info!("no resting orders to recover");
            }
        }
        Err(e) => {
            tracing::error!("failed to recover orders from database: {}", e);
            tracing::warn!("starting with an empty orderbook");
        }
    }

    let orchestrator = Arc::new(OrderFlowOrchestrator::new(engine.clone(), db.pool.clone()));
    orchestrator.start_persistence_worker();
    tracing::info!("trade persistence worker spawned");

    let snapshot_publisher = SnapshotPublisher::new();
    snapshot_publisher.clone().spawn(
        engine.clone(),
        Duration::from_millis(config.snapshot_interval_ms),
        config.default_book_depth,
    );
    tracing::info!(
        "snapshot publisher started (interval={}ms, depth={})",
        config.snapshot_interval_ms,
        config.default_book_depth
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        orchestrator,
        snapshot_publisher,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api::routes::create_router(state.clone()))
        .nest("/ws", websocket::routes::create_router(state.clone()))
        .layer(middleware::from_fn(api::middleware::metrics_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from_str(&config.bind_address).unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));
    tracing::info!("server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
