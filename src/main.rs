use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use ingest_gateway::api::{self, AppState};
use ingest_gateway::config::GatewayConfig;
use ingest_gateway::ingest::IngestionService;
use ingest_gateway::ingest::ports::{EventStore, IdempotencyGate, RateLimiter, WorkQueue};
use ingest_gateway::store::{LibSqlEventStore, LibSqlGate, LibSqlQueue, LibSqlTokenBucket, Storage};
use ingest_gateway::worker::RecoveryWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = GatewayConfig::from_env().context("Failed to load configuration")?;

    eprintln!("📨 Ingest Gateway v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path);
    eprintln!("   Ingest API: http://0.0.0.0:{}/v1/ingest/{{sms,chat,voice}}", config.api.port);
    eprintln!(
        "   Rate limit: capacity {}, refill {}/s per tenant",
        config.limiter.capacity, config.limiter.refill_rate_per_second
    );
    if config.worker.simulation_mode {
        eprintln!("   ⚠ Simulation mode is ON: forced-failure envelopes will dead-letter");
    }

    // ── Storage and ports ────────────────────────────────────────────
    let storage = Storage::open(Path::new(&config.db_path))
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path))?;

    let gate: Arc<dyn IdempotencyGate> = Arc::new(LibSqlGate::new(storage.connection()));
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(LibSqlTokenBucket::new(storage.connection(), &config.limiter));
    let queue: Arc<dyn WorkQueue> = Arc::new(LibSqlQueue::new(storage.connection()));
    let events: Arc<dyn EventStore> = Arc::new(LibSqlEventStore::new(storage.connection()));

    let ingest = Arc::new(IngestionService::new(
        gate,
        limiter,
        queue.clone(),
        config.gate.clone(),
    ));

    // ── Recovery worker ──────────────────────────────────────────────
    let worker = RecoveryWorker::new(queue.clone(), events.clone(), config.worker.clone());
    let worker_stop = worker.stop_handle();
    let worker_task = tokio::spawn(worker.run());

    // ── HTTP surface ─────────────────────────────────────────────────
    let state = AppState {
        ingest,
        events,
        queue,
        internal_enabled: config.api.enable_internal_endpoints,
    };
    let app = api::router(state, config.api.enable_cors);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.api.port))?;
    tracing::info!(port = config.api.port, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Let the worker finish its current envelope before exiting.
    tracing::info!("Shutting down, stopping recovery worker");
    worker_stop.stop();
    worker_task.await.context("Worker task panicked")?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
