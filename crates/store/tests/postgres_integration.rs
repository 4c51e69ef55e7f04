//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CallContext, Money, QueryScope, Tenancy, TenantScope, Version};
use domain::ledger::is_balanced;
use domain::{
    AggregateRoot, AllocationRepository, AllocationStatus, ConsumeStock, InventoryAllocation,
    InventoryError, InventoryReservation, InventoryTransaction, LedgerEntryRepository,
    LedgerRepository, LedgerService, LocationKind, NewAllocation, NewReservation, ReceiveStock,
    ReferenceType, ReservationRepository, ReservationService, ReservationStatus,
    TransactionRepository, TransactionType,
};
use outbox::OutboxRepository;
use serial_test::serial;
use sqlx::PgPool;
use store::PostgresStore;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
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
            for migration in [
                include_str!("../../../migrations/001_create_inventory_ledgers.sql"),
                include_str!("../../../migrations/002_create_reservations_allocations.sql"),
                include_str!("../../../migrations/003_create_inventory_transactions.sql"),
                include_str!("../../../migrations/004_create_outbox_events.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE inventory_ledgers, ledger_entries, inventory_reservations, \
         inventory_allocations, inventory_transactions, outbox_events",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

fn tenancy() -> Tenancy {
    Tenancy::new("T1", "F1", "W1")
}

fn scope() -> TenantScope {
    tenancy().scope()
}

fn receive(qty: u64, cents: i64, po: &str) -> ReceiveStock {
    ReceiveStock::new(tenancy(), "WIDGET-001", qty, Money::usd(cents), "DOCK-1", po, "receiver")
}

fn reservation(id: &str) -> NewReservation {
    NewReservation::new(tenancy(), "SKU-1", "O-1", "A-01", 4, "clerk").with_id(id)
}

#[tokio::test]
#[serial]
async fn ledger_save_writes_document_entries_and_outbox_together() {
    let store = get_test_store().await;
    let service = LedgerService::new(store.ledgers(), store.transactions());
    let ctx = CallContext::new();

    service.receive(&ctx, receive(100, 1500, "PO-1")).await.unwrap();
    service.receive(&ctx, receive(75, 1100, "PO-2")).await.unwrap();
    let posting = service
        .consume(
            &ctx,
            ConsumeStock::new(
                scope(),
                "WIDGET-001",
                120,
                "PICK-1",
                "SO-1",
                ReferenceType::SalesOrder,
                "picker",
            ),
        )
        .await
        .unwrap();
    assert_eq!(posting.cost_of_goods_sold, Money::usd(172_000));

    let ledger = store.ledgers().find_by_sku(&scope(), "WIDGET-001").await.unwrap();
    assert_eq!(ledger.version(), Version::new(3));
    assert_eq!(ledger.current_balance(), 55);
    assert_eq!(ledger.current_value(), Money::usd(60_500));
    assert_eq!(ledger.cost_layers()[0].source_reference, "PO-2");

    let entries = store
        .ledger_entries()
        .find_by_sku(&QueryScope::from(scope()), "WIDGET-001", 100)
        .await
        .unwrap();
    assert_eq!(entries.len(), 8);
    assert!(is_balanced(&entries));

    let pick = store
        .ledger_entries()
        .find_by_reference(&scope(), "WIDGET-001", "SO-1")
        .await
        .unwrap();
    assert_eq!(pick.len(), 4);
    assert!(pick.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let unpublished = store.outbox().find_unpublished(100, 10).await.unwrap();
    // Three per receipt, then transaction-recorded and valued for the pick.
    assert_eq!(unpublished.len(), 8);
    assert_eq!(unpublished[0].event_type, "wms.inventory.received");

    let audit = store
        .transactions()
        .count_by_sku(&scope(), "WIDGET-001")
        .await
        .unwrap();
    assert_eq!(audit, 3);
}

#[tokio::test]
#[serial]
async fn stale_ledger_save_is_rejected_without_side_effects() {
    let store = get_test_store().await;
    let ctx = CallContext::new();
    LedgerService::new(store.ledgers(), store.transactions())
        .receive(&ctx, receive(10, 500, "PO-1"))
        .await
        .unwrap();
    let outbox_rows = store.outbox().find_unpublished(100, 10).await.unwrap().len();

    let consume = |qty| {
        ConsumeStock::new(
            scope(),
            "WIDGET-001",
            qty,
            "PICK-1",
            "SO-1",
            ReferenceType::SalesOrder,
            "picker",
        )
    };
    let mut first = store.ledgers().find_by_sku(&scope(), "WIDGET-001").await.unwrap();
    let mut second = store.ledgers().find_by_sku(&scope(), "WIDGET-001").await.unwrap();

    first.record_consumption(&consume(2)).unwrap();
    store.ledgers().save(&mut first).await.unwrap();
    let after_first = store.outbox().find_unpublished(100, 10).await.unwrap().len();
    assert!(after_first > outbox_rows);

    second.record_consumption(&consume(3)).unwrap();
    let err = store.ledgers().save(&mut second).await.unwrap_err();
    match err {
        InventoryError::ConcurrentModification {
            expected, actual, ..
        } => {
            assert_eq!(expected, Version::new(1));
            assert_eq!(actual, Version::new(2));
        }
        other => panic!("expected ConcurrentModification, got {other:?}"),
    }

    assert_eq!(
        store.outbox().find_unpublished(100, 10).await.unwrap().len(),
        after_first
    );
    let stored = store.ledgers().find_by_sku(&scope(), "WIDGET-001").await.unwrap();
    assert_eq!(stored.current_balance(), 8);
}

#[tokio::test]
#[serial]
async fn balance_at_time_reads_latest_entry() {
    let store = get_test_store().await;
    let ctx = CallContext::new();
    let service = LedgerService::new(store.ledgers(), store.transactions());
    let t0 = Utc::now() - Duration::hours(2);

    service
        .receive(&ctx, receive(100, 1500, "PO-1").at(t0))
        .await
        .unwrap();
    service
        .receive(&ctx, receive(75, 1100, "PO-2").at(t0 + Duration::hours(1)))
        .await
        .unwrap();

    let entries = store.ledger_entries();
    let first = entries
        .get_balance_at_time(&scope(), "WIDGET-001", t0 + Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(first.quantity, 100);
    assert_eq!(first.value, Money::usd(150_000));

    let empty = entries
        .get_balance_at_time(&scope(), "WIDGET-001", t0 - Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(empty.quantity, 0);

    let range = entries
        .find_by_time_range(
            &QueryScope::from(scope()),
            "WIDGET-001",
            t0,
            t0 + Duration::minutes(30),
        )
        .await
        .unwrap();
    assert_eq!(range.len(), 2);
}

#[tokio::test]
#[serial]
async fn reservation_queries_respect_scope_and_status() {
    let store = get_test_store().await;
    let repo = store.reservations();

    let mut mine = InventoryReservation::new(reservation("RSV-1")).unwrap();
    repo.save(&mut mine).await.unwrap();
    let mut theirs = InventoryReservation::new(
        NewReservation::new(Tenancy::new("T2", "F1", "W1"), "SKU-1", "O-9", "A-01", 1, "clerk")
            .with_id("RSV-2"),
    )
    .unwrap();
    repo.save(&mut theirs).await.unwrap();

    let tenant = QueryScope::from(scope());
    assert_eq!(
        repo.find_by_sku(&tenant, "SKU-1", None).await.unwrap().len(),
        1
    );
    assert_eq!(
        repo.find_by_sku(&QueryScope::Global, "SKU-1", None)
            .await
            .unwrap()
            .len(),
        2
    );
    assert!(matches!(
        repo.find_by_id(&tenant, "RSV-2").await.unwrap_err(),
        InventoryError::NotFound { .. }
    ));
    assert_eq!(
        repo.find_by_location(&tenant, "A-01", Some(ReservationStatus::Active))
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        repo.get_active_reservation_count_by_sku(&scope(), "SKU-1")
            .await
            .unwrap(),
        1
    );

    repo.update_status(&tenant, "RSV-1", ReservationStatus::Cancelled)
        .await
        .unwrap();
    let cancelled = repo.find_by_id(&tenant, "RSV-1").await.unwrap();
    assert_eq!(cancelled.status(), ReservationStatus::Cancelled);
    assert_eq!(cancelled.version(), Version::new(2));

    let purged = repo
        .purge_terminal(Utc::now() + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(purged, 1);
}

#[tokio::test]
#[serial]
async fn expiry_sweep_over_postgres() {
    let store = get_test_store().await;
    let service = ReservationService::new(store.reservations(), store.transactions());
    let ctx = CallContext::new();

    let short = service
        .reserve(&ctx, reservation("RSV-1").expiring_in(Duration::minutes(15)))
        .await
        .unwrap();
    service
        .reserve(&ctx, reservation("RSV-2").expiring_in(Duration::hours(1)))
        .await
        .unwrap();

    let as_of = short.expires_at() + Duration::minutes(1);
    let overdue = store.reservations().find_expired(as_of, 10).await.unwrap();
    assert_eq!(overdue.len(), 1);

    assert_eq!(service.expire_overdue(&ctx, as_of, 10).await.unwrap(), 1);
    let expired = store
        .reservations()
        .find_by_id(&QueryScope::Global, "RSV-1")
        .await
        .unwrap();
    assert_eq!(expired.status(), ReservationStatus::Expired);

    let active = store
        .reservations()
        .find_by_sku(&QueryScope::from(scope()), "SKU-1", Some(ReservationStatus::Active))
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].reservation_id(), "RSV-2");
    assert_eq!(
        store
            .reservations()
            .get_active_reservation_count_by_sku(&scope(), "SKU-1")
            .await
            .unwrap(),
        1
    );

    let releases = store
        .transactions()
        .find_by_type(
            &QueryScope::from(scope()),
            TransactionType::Release,
            Utc::now() - Duration::minutes(5),
            Utc::now() + Duration::minutes(5),
            10,
        )
        .await
        .unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].reference_id, "RSV-1");
}

#[tokio::test]
#[serial]
async fn allocation_queries_by_location_kind() {
    let store = get_test_store().await;
    let repo = store.allocations();

    let mut allocation = InventoryAllocation::new(
        NewAllocation::new(tenancy(), "SKU-1", "RSV-1", "O-1", 2, "A-01", "STG-1", "picker")
            .with_id("ALC-1"),
    )
    .unwrap();
    repo.save(&mut allocation).await.unwrap();
    allocation.mark_packed("packer").unwrap();
    repo.save(&mut allocation).await.unwrap();

    let tenant = QueryScope::from(scope());
    let by_source = repo
        .find_by_location(&tenant, "A-01", LocationKind::Source, None)
        .await
        .unwrap();
    assert_eq!(by_source.len(), 1);
    let by_staging = repo
        .find_by_location(&tenant, "A-01", LocationKind::Staging, None)
        .await
        .unwrap();
    assert!(by_staging.is_empty());
    let any = repo
        .find_by_location(&tenant, "STG-1", LocationKind::Any, Some(AllocationStatus::Packed))
        .await
        .unwrap();
    assert_eq!(any.len(), 1);
    assert_eq!(any[0].version(), Version::new(2));

    assert_eq!(repo.find_active(&tenant, 10).await.unwrap().len(), 1);
    assert_eq!(
        repo.get_active_allocation_count_by_sku(&scope(), "SKU-1")
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        repo.find_by_reservation_id(&tenant, "RSV-1")
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
#[serial]
async fn transaction_retention_purges_old_rows() {
    let store = get_test_store().await;
    let repo = store.transactions();

    let old = InventoryTransaction::new(
        tenancy(),
        TransactionType::Receive,
        "SKU-1",
        "DOCK-1",
        "PO-1",
        10,
        "receiver",
    )
    .at(Utc::now() - Duration::days(100));
    let recent = InventoryTransaction::new(
        tenancy(),
        TransactionType::Pick,
        "SKU-1",
        "A-01",
        "SO-1",
        -2,
        "picker",
    );
    repo.save(old).await.unwrap();
    repo.save(recent).await.unwrap();

    let purged = repo
        .purge_older_than(Utc::now() - Duration::days(90))
        .await
        .unwrap();
    assert_eq!(purged, 1);

    let left = repo
        .find_by_location(&QueryScope::from(scope()), "A-01", 10)
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].transaction_type, TransactionType::Pick);
}
