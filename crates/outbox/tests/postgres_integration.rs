//! PostgreSQL integration tests for the outbox.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p outbox --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use outbox::{
    InMemoryBroker, OutboxEvent, OutboxRepository, PostgresOutbox, Publisher, PublisherConfig,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/004_create_outbox_events.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_outbox() -> PostgresOutbox {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE outbox_events")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOutbox::new(pool)
}

fn event(aggregate_id: &str, n: u32) -> OutboxEvent {
    OutboxEvent::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("InventoryReservation")
        .event_type("wms.reservation.created")
        .topic(outbox::INVENTORY_TOPIC)
        .tenant("T1", "F1")
        .data_raw(serde_json::json!({ "n": n }))
        .build()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn rows_round_trip_with_cloud_event_payload() {
    let outbox = get_test_outbox().await;
    let row = event("RSV-1", 1);
    outbox.save(row.clone()).await.unwrap();

    let stored = outbox.get_by_id(row.id).await.unwrap().unwrap();
    assert_eq!(stored.payload, row.payload);
    assert_eq!(stored.payload.tenantid.as_deref(), Some("T1"));
    assert!(stored.published_at.is_none());
    assert_eq!(stored.retry_count, 0);
}

#[tokio::test]
#[serial]
async fn unpublished_rows_come_back_in_insertion_order() {
    let outbox = get_test_outbox().await;
    let rows: Vec<_> = (0..5).map(|n| event("RSV-1", n)).collect();
    outbox.save_all(rows.clone()).await.unwrap();

    let found = outbox.find_unpublished(10, 3).await.unwrap();
    let ids: Vec<_> = found.iter().map(|e| e.id).collect();
    let expected: Vec<_> = rows.iter().map(|e| e.id).collect();
    assert_eq!(ids, expected);

    let by_aggregate = outbox.find_by_aggregate_id("RSV-1").await.unwrap();
    assert_eq!(by_aggregate.len(), 5);
}

#[tokio::test]
#[serial]
async fn insert_all_rolls_back_with_the_transaction() {
    let outbox = get_test_outbox().await;

    let mut tx = outbox.pool().begin().await.unwrap();
    PostgresOutbox::insert_all(&mut tx, &[event("RSV-1", 1), event("RSV-1", 2)])
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(outbox.count_unpublished(3).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn retries_turn_rows_into_dead_letters() {
    let outbox = get_test_outbox().await;
    let row = event("RSV-1", 1);
    outbox.save(row.clone()).await.unwrap();

    for _ in 0..3 {
        outbox.increment_retry(row.id, "broker down").await.unwrap();
    }

    assert!(outbox.find_unpublished(10, 3).await.unwrap().is_empty());
    let dead = outbox.find_dead_letters(10, 3).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].last_error.as_deref(), Some("broker down"));
}

#[tokio::test]
#[serial]
async fn publisher_marks_rows_and_cleanup_keeps_recent_ones() {
    let outbox = get_test_outbox().await;
    outbox
        .save_all(vec![event("RSV-1", 1), event("RSV-2", 2)])
        .await
        .unwrap();

    let broker = InMemoryBroker::new();
    let publisher = Publisher::new(outbox.clone(), broker.clone(), PublisherConfig::default());

    assert_eq!(publisher.poll_once().await.unwrap(), 2);
    assert_eq!(broker.published_count().await, 2);
    assert_eq!(outbox.count_unpublished(10).await.unwrap(), 0);

    // Published just now, so well inside the retention window.
    assert_eq!(publisher.cleanup().await.unwrap(), 0);
    assert_eq!(outbox.delete_published(-60).await.unwrap(), 2);
}
