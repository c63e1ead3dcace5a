//! Mediascribe Server - Main entry point
//!
//! Serves the job API and runs the worker and stuck-job monitor in-process.

use std::net::SocketAddr;
use std::sync::Arc;

use mediascribe_core::{
    api::{self, AppState},
    config::{Config, StoreBackendKind},
    jobs::{
        InMemoryQueueBackend, InMemoryStore, JobQueue, KvStore, QueueBackend, QueueConfig,
        RedisQueueBackend, RedisStore,
    },
    orchestrator::Orchestrator,
    pipeline::MediaPipeline,
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });
    config.validate()?;

    let telemetry = telemetry::init_telemetry(&config.logging, &config.metrics)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Mediascribe Server"
    );

    let queue_config = QueueConfig {
        max_size: config.jobs.queue_capacity,
        ..QueueConfig::default()
    };

    let mut purger = None;
    let (kv, queue_backend): (Arc<dyn KvStore>, Arc<dyn QueueBackend>) = match config.store.backend {
        StoreBackendKind::Memory => {
            let store = Arc::new(InMemoryStore::new());
            purger = Some(store.spawn_purger(config.store.purge_interval));
            tracing::info!("Using in-memory job store");
            (
                store,
                Arc::new(InMemoryQueueBackend::new(queue_config.max_size)),
            )
        }
        StoreBackendKind::Redis => {
            let store = RedisStore::connect(&config.store.redis_url, config.store.key_prefix.clone()).await?;
            let client = redis::Client::open(config.store.redis_url.as_str())
                .map_err(|e| anyhow::anyhow!("Failed to create Redis client: {}", e))?;
            tracing::info!(url = %config.store.redis_url, "Connected to Redis job store");
            (
                Arc::new(store),
                Arc::new(RedisQueueBackend::new(
                    client,
                    format!("{}queue", config.store.key_prefix),
                )),
            )
        }
    };
    let queue = Arc::new(JobQueue::new(queue_backend, queue_config));

    let pipeline = Arc::new(MediaPipeline::from_config(&config.pipeline)?);

    let orchestrator = Arc::new(Orchestrator::new(
        config.jobs.clone(),
        &config.server.public_url,
        kv,
        queue,
        pipeline,
    )?);
    orchestrator.start();
    tracing::info!("Orchestrator started");

    // Create app state
    let app_state = AppState {
        orchestrator: orchestrator.clone(),
        metrics: telemetry.metrics.clone(),
    };

    // Build router
    let app = api::build_router(app_state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, public_url = %config.server.public_url, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    orchestrator.shutdown().await;
    if let Some(purger) = purger {
        purger.abort();
    }
    telemetry.shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
