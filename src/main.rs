use std::sync::Arc;

use promo_engine::{
    create_router, db,
    persistence::{InMemoryStore, PersistenceService, PgStore},
    AppConfig, AppState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Promotion engine - Starting...");

    let config = AppConfig::from_env().expect("Invalid configuration");

    let store: Arc<dyn PersistenceService> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url, config.db_max_connections)
                .await
                .expect("Failed to create database pool");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let state = AppState::build(&config, store);
    let engine = state.engine.clone();
    let app = create_router(state);

    let addr = config.bind_address();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Promotion engine is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    engine.metrics().log_summary();
}
