//! Lending Desk server
//!
//! REST API server for library lending.

use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lending_desk::{
    api,
    config::{AppConfig, CacheBackend, StorageBackend},
    repository::Repository,
    services::{
        cache::{CacheStore, MemoryCache},
        email::{EmailService, LogNotifier, Notifier},
        overdue::spawn_overdue_scan,
        redis::RedisCache,
        tasks::{ChannelQueue, TaskQueue, TaskWorker},
        Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().expect("Failed to load configuration");

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lending_desk={},tower_http=debug", config.logging.level).into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Lending Desk v{}", env!("CARGO_PKG_VERSION"));

    let repository = match config.storage.backend {
        StorageBackend::Postgres => {
            // Create database connection pool
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .connect(&config.database.url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Connected to database");

            // Run migrations
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run database migrations");

            tracing::info!("Database migrations completed");
            Repository::new(pool)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, records are lost on shutdown");
            Repository::in_memory()
        }
    };

    let cache: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Redis => {
            let redis = RedisCache::new(&config.cache.url)
                .await
                .expect("Failed to connect to Redis");
            tracing::info!("Connected to Redis");
            Arc::new(redis)
        }
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
    };

    // Notification pipeline
    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
        Arc::new(EmailService::new(config.email.clone()))
    } else {
        Arc::new(LogNotifier)
    };
    let (channel, receiver) = ChannelQueue::new(config.notifications.queue_capacity);
    let queue: Arc<dyn TaskQueue> = Arc::new(channel);
    TaskWorker::new(repository.clone(), notifier, &config.notifications).spawn(receiver);

    // Save server address before moving config
    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    let services = Services::new(repository, cache, queue.clone(), &config);

    spawn_overdue_scan(
        services.loans.clone(),
        queue,
        Duration::from_secs(config.jobs.overdue_scan_interval_secs),
    );

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    // Build router
    let app = api::create_router(state);

    // Start server
    let addr = SocketAddr::new(
        server_host.parse().expect("Invalid host address"),
        server_port,
    );

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
