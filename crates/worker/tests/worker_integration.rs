//! Runs the assembled worker against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{CallContext, Money, QueryScope, Tenancy};
use domain::{
    InventoryReservation, LedgerService, NewReservation, ReceiveStock, ReservationRepository,
    ReservationStatus,
};
use outbox::{InMemoryBroker, OutboxRepository};
use store::InMemoryStore;
use tokio_util::sync::CancellationToken;
use worker::{BrokerKind, Config, Worker, WorkerError};

fn fast_config() -> Config {
    let mut config = Config::default();
    config.publisher.poll_interval = Duration::from_millis(10);
    config.sweep_interval = Duration::from_millis(10);
    config
}

#[tokio::test]
async fn worker_relays_events_and_expires_reservations_until_shutdown() {
    let store = InMemoryStore::new();
    let tenancy = Tenancy::new("T1", "F1", "W1");

    LedgerService::new(store.ledgers(), store.transactions())
        .receive(
            &CallContext::new(),
            ReceiveStock::new(tenancy.clone(), "SKU-1", 10, Money::usd(500), "DOCK-1", "PO-1", "rx"),
        )
        .await
        .unwrap();

    let params = NewReservation::new(tenancy, "SKU-1", "O-1", "A-01", 2, "clerk")
        .with_id("RSV-STALE")
        .expiring_in(ChronoDuration::minutes(5));
    let mut stale =
        InventoryReservation::new_at(params, Utc::now() - ChronoDuration::minutes(10)).unwrap();
    store.reservations().save(&mut stale).await.unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let worker = Worker::new(
        &fast_config(),
        store.outbox(),
        store.reservations(),
        store.allocations(),
        store.transactions(),
        broker.clone(),
    );

    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stopper.cancel();
    });
    worker.run(shutdown).await;

    // Three ledger events, then the reservation's creation and expiry.
    assert_eq!(broker.published_count().await, 5);
    assert_eq!(worker.publisher().stats().published, 5);
    assert!(
        store
            .outbox()
            .find_unpublished(100, 10)
            .await
            .unwrap()
            .is_empty()
    );

    let swept = store
        .reservations()
        .find_by_id(&QueryScope::Global, "RSV-STALE")
        .await
        .unwrap();
    assert_eq!(swept.status(), ReservationStatus::Expired);
}

#[tokio::test]
async fn memory_broker_is_always_available() {
    let config = Config::default();
    assert!(worker::connect_broker(&config).await.is_ok());
}

#[cfg(not(feature = "redis"))]
#[tokio::test]
async fn redis_broker_requires_the_feature() {
    let config = Config {
        broker: BrokerKind::Redis,
        ..Config::default()
    };
    let err = worker::connect_broker(&config).await.err().unwrap();
    assert!(matches!(err, WorkerError::BrokerUnavailable("redis")));
}
