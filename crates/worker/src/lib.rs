//! Background worker for the inventory core.
//!
//! Runs three independent poll loops against one store:
//! - the outbox [`Publisher`] relaying committed events to the broker
//! - the [`ExpirySweeper`] expiring overdue reservations
//! - the [`RetentionReaper`] deleting rows past their retention window
//!
//! Configuration comes from the environment ([`Config::from_env`]); logs go
//! through `tracing` and metrics through a Prometheus exporter.

pub mod config;
pub mod error;
pub mod reaper;
pub mod sweeper;

use std::sync::Arc;

use domain::{AllocationRepository, ReservationRepository, ReservationService, TransactionRepository};
use outbox::{InMemoryBroker, MessageBroker, OutboxRepository, Publisher};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use config::{BrokerKind, Config, LogFormat, StoreKind};
pub use error::{ConfigError, WorkerError};
pub use reaper::{ReapStats, RetentionPolicy, RetentionReaper};
pub use sweeper::ExpirySweeper;

/// Broker shared by every publisher in the process.
pub type SharedBroker = Arc<dyn MessageBroker>;

/// The publisher, sweeper and reaper wired to one store.
pub struct Worker<O: OutboxRepository, R, A, T> {
    publisher: Publisher<O, SharedBroker>,
    sweeper: ExpirySweeper<R, T>,
    reaper: RetentionReaper<R, A, T>,
}

impl<O, R, A, T> Worker<O, R, A, T>
where
    O: OutboxRepository,
    R: ReservationRepository + Clone,
    A: AllocationRepository,
    T: TransactionRepository + Clone,
{
    pub fn new(
        config: &Config,
        outbox: O,
        reservations: R,
        allocations: A,
        transactions: T,
        broker: SharedBroker,
    ) -> Self {
        let publisher = Publisher::new(outbox, broker, config.publisher.clone());
        let sweeper = ExpirySweeper::new(
            ReservationService::new(reservations.clone(), transactions.clone()),
            config.sweep_interval,
            config.sweep_batch_size,
        );
        let reaper =
            RetentionReaper::new(reservations, allocations, transactions, config.reaper_interval);
        Self {
            publisher,
            sweeper,
            reaper,
        }
    }

    pub fn publisher(&self) -> &Publisher<O, SharedBroker> {
        &self.publisher
    }

    /// Runs all loops until `shutdown` is cancelled. Each loop finishes the
    /// batch it is working on before returning.
    pub async fn run(&self, shutdown: CancellationToken) {
        tokio::join!(
            self.publisher.run(shutdown.clone()),
            self.sweeper.run(shutdown.clone()),
            self.reaper.run(shutdown),
        );
        tracing::info!(stats = ?self.publisher.stats(), "worker stopped");
    }
}

/// Connects the broker named by the configuration.
pub async fn connect_broker(config: &Config) -> Result<SharedBroker, WorkerError> {
    match config.broker {
        BrokerKind::Memory => Ok(Arc::new(InMemoryBroker::new())),
        #[cfg(feature = "redis")]
        BrokerKind::Redis => {
            let broker = outbox::RedisStreamBroker::connect(&config.redis_url).await?;
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "redis"))]
        BrokerKind::Redis => Err(WorkerError::BrokerUnavailable("redis")),
    }
}

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
