//! Worker entry point.

use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use worker::{Config, StoreKind, Worker, WorkerError};

const MAX_DB_CONNECTIONS: u32 = 10;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    // 1. Configuration and tracing
    let config = Config::from_env()?;
    worker::init_tracing(&config);

    // 2. Prometheus exporter with its own HTTP listener
    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()?;
    tracing::info!(addr = %config.metrics_addr, "metrics exporter listening");

    // 3. Shutdown wiring
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    // 4. Broker and store, then run until shutdown
    let broker = worker::connect_broker(&config).await?;
    match config.store {
        StoreKind::Memory => {
            tracing::warn!("running against the in-memory store; nothing is persisted");
            let store = InMemoryStore::new();
            Worker::new(
                &config,
                store.outbox(),
                store.reservations(),
                store.allocations(),
                store.transactions(),
                broker,
            )
            .run(shutdown)
            .await;
        }
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(worker::ConfigError::Missing("DATABASE_URL"))?;
            let pool = PgPoolOptions::new()
                .max_connections(MAX_DB_CONNECTIONS)
                .connect(url)
                .await?;
            let store = PostgresStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("database migrations applied");

            Worker::new(
                &config,
                store.outbox(),
                store.reservations(),
                store.allocations(),
                store.transactions(),
                broker,
            )
            .run(shutdown)
            .await;
        }
    }

    tracing::info!("worker shut down gracefully");
    Ok(())
}
