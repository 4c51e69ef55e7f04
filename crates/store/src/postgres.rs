use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{QueryScope, TenantScope, Version};
use domain::{
    AccountType, AggregateRoot, AllocationRepository, AllocationStatus, Balance,
    InventoryAllocation, InventoryError, InventoryLedger, InventoryReservation,
    InventoryTransaction, LedgerEntry, LedgerEntryRepository, LedgerRepository, LocationKind,
    ReservationRepository, ReservationStatus, Result, TransactionRepository, TransactionType,
};
use outbox::PostgresOutbox;
use serde::de::DeserializeOwned;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

fn db(e: sqlx::Error) -> InventoryError {
    InventoryError::storage(e)
}

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Splits a read scope into nullable filter parameters. `NULL` matches every
/// tenant, which is how global reads are expressed in SQL.
fn scope_params(scope: &QueryScope) -> (Option<&str>, Option<&str>) {
    match scope.as_tenant() {
        Some(s) => (Some(s.tenant_id.as_str()), Some(s.facility_id.as_str())),
        None => (None, None),
    }
}

fn document<T: DeserializeOwned>(row: &PgRow) -> Result<T> {
    let value: serde_json::Value = row.try_get("document").map_err(db)?;
    Ok(serde_json::from_value(value)?)
}

fn aggregate<A: AggregateRoot + DeserializeOwned>(row: &PgRow) -> Result<A> {
    let mut aggregate: A = document(row)?;
    aggregate.set_version(Version::new(row.try_get("version").map_err(db)?));
    Ok(aggregate)
}

fn aggregates<A: AggregateRoot + DeserializeOwned>(rows: Vec<PgRow>) -> Result<Vec<A>> {
    rows.iter().map(aggregate).collect()
}

fn documents<T: DeserializeOwned>(rows: Vec<PgRow>) -> Result<Vec<T>> {
    rows.iter().map(document).collect()
}

fn conflict(entity: &'static str, id: &str, expected: Version, stored: Option<i64>) -> InventoryError {
    InventoryError::ConcurrentModification {
        entity,
        id: id.to_string(),
        expected,
        actual: stored.map(Version::new).unwrap_or_else(Version::initial),
    }
}

/// PostgreSQL-backed store.
///
/// Aggregates are kept as JSONB documents next to the columns they are
/// queried by. Each save runs one database transaction that writes the
/// aggregate row (guarded by its version), any journal entries, and the
/// outbox rows for the pending events.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Outbox repository sharing this store's pool.
    pub fn outbox(&self) -> PostgresOutbox {
        PostgresOutbox::new(self.pool.clone())
    }

    pub fn ledgers(&self) -> PgLedgers {
        PgLedgers(self.pool.clone())
    }

    pub fn ledger_entries(&self) -> PgLedgerEntries {
        PgLedgerEntries(self.pool.clone())
    }

    pub fn reservations(&self) -> PgReservations {
        PgReservations(self.pool.clone())
    }

    pub fn allocations(&self) -> PgAllocations {
        PgAllocations(self.pool.clone())
    }

    pub fn transactions(&self) -> PgTransactions {
        PgTransactions(self.pool.clone())
    }
}

async fn insert_entries(conn: &mut PgConnection, entries: &[LedgerEntry]) -> Result<()> {
    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries
                (entry_id, sequence, transaction_id, tenant_id, facility_id, sku,
                 account_type, reference_id, created_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&entry.entry_id)
        .bind(entry.sequence as i64)
        .bind(entry.transaction_id.as_str())
        .bind(&entry.scope.tenant_id)
        .bind(&entry.scope.facility_id)
        .bind(&entry.sku)
        .bind(entry.account_type.as_str())
        .bind(&entry.reference_id)
        .bind(entry.created_at)
        .bind(serde_json::to_value(entry)?)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
    }
    Ok(())
}

/// Ledger repository over a [`PostgresStore`] pool.
#[derive(Clone)]
pub struct PgLedgers(PgPool);

#[async_trait]
impl LedgerRepository for PgLedgers {
    #[tracing::instrument(skip(self, ledger), fields(sku = ledger.sku()))]
    async fn save(&self, ledger: &mut InventoryLedger) -> Result<()> {
        let rows = ledger.outbox_events()?;
        let expected = ledger.version();
        let tenancy = ledger.tenancy();
        let doc = serde_json::to_value(&*ledger)?;

        let mut tx = self.0.begin().await.map_err(db)?;

        let written = if expected.is_initial() {
            sqlx::query(
                r#"
                INSERT INTO inventory_ledgers
                    (tenant_id, facility_id, sku, warehouse_id, seller_id, version,
                     document, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, 1, $6, $7, $8)
                ON CONFLICT (tenant_id, facility_id, sku) DO NOTHING
                "#,
            )
            .bind(&tenancy.tenant_id)
            .bind(&tenancy.facility_id)
            .bind(ledger.sku())
            .bind(&tenancy.warehouse_id)
            .bind(&tenancy.seller_id)
            .bind(&doc)
            .bind(ledger.created_at())
            .bind(ledger.updated_at())
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE inventory_ledgers
                SET version = version + 1, document = $4, updated_at = $5
                WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3 AND version = $6
                "#,
            )
            .bind(&tenancy.tenant_id)
            .bind(&tenancy.facility_id)
            .bind(ledger.sku())
            .bind(&doc)
            .bind(ledger.updated_at())
            .bind(expected.as_i64())
            .execute(&mut *tx)
            .await
        }
        .map_err(db)?;

        if written.rows_affected() == 0 {
            let stored: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM inventory_ledgers WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3",
            )
            .bind(&tenancy.tenant_id)
            .bind(&tenancy.facility_id)
            .bind(ledger.sku())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;
            return Err(conflict(
                InventoryLedger::aggregate_type(),
                &ledger.aggregate_id(),
                expected,
                stored,
            ));
        }

        insert_entries(&mut tx, ledger.pending_entries()).await?;
        PostgresOutbox::insert_all(&mut tx, &rows).await?;
        tx.commit().await.map_err(db)?;

        ledger.mark_committed();
        Ok(())
    }

    async fn find_by_sku(&self, scope: &TenantScope, sku: &str) -> Result<InventoryLedger> {
        let row = sqlx::query(
            r#"
            SELECT version, document FROM inventory_ledgers
            WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3
            "#,
        )
        .bind(&scope.tenant_id)
        .bind(&scope.facility_id)
        .bind(sku)
        .fetch_optional(&self.0)
        .await
        .map_err(db)?
        .ok_or_else(|| InventoryError::not_found("InventoryLedger", sku))?;
        aggregate(&row)
    }

    async fn find_all(
        &self,
        scope: &QueryScope,
        limit_rows: usize,
        offset: usize,
    ) -> Result<Vec<InventoryLedger>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_ledgers
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
            ORDER BY updated_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(limit(limit_rows))
        .bind(limit(offset))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn delete(&self, scope: &TenantScope, sku: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM inventory_ledgers WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.facility_id)
        .bind(sku)
        .execute(&self.0)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(InventoryError::not_found("InventoryLedger", sku));
        }
        Ok(())
    }
}

/// Journal repository over a [`PostgresStore`] pool.
#[derive(Clone)]
pub struct PgLedgerEntries(PgPool);

#[async_trait]
impl LedgerEntryRepository for PgLedgerEntries {
    async fn save(&self, entry: LedgerEntry) -> Result<()> {
        let mut conn = self.0.acquire().await.map_err(db)?;
        insert_entries(&mut conn, std::slice::from_ref(&entry)).await
    }

    async fn save_all(&self, entries: Vec<LedgerEntry>) -> Result<()> {
        let mut tx = self.0.begin().await.map_err(db)?;
        insert_entries(&mut tx, &entries).await?;
        tx.commit().await.map_err(db)
    }

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        limit_rows: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT document FROM ledger_entries
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND sku = $3
            ORDER BY created_at DESC, sequence DESC
            LIMIT $4
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(sku)
        .bind(limit(limit_rows))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn find_by_transaction_id(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM ledger_entries
            WHERE tenant_id = $1 AND transaction_id = $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn find_by_reference(
        &self,
        scope: &TenantScope,
        sku: &str,
        reference_id: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM ledger_entries
            WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3 AND reference_id = $4
            ORDER BY sequence ASC
            "#,
        )
        .bind(&scope.tenant_id)
        .bind(&scope.facility_id)
        .bind(sku)
        .bind(reference_id)
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn find_by_time_range(
        &self,
        scope: &QueryScope,
        sku: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT document FROM ledger_entries
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND sku = $3
              AND created_at >= $4 AND created_at <= $5
            ORDER BY created_at ASC, sequence ASC
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(sku)
        .bind(start)
        .bind(end)
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn find_by_account_type(
        &self,
        scope: &QueryScope,
        sku: &str,
        account: AccountType,
        limit_rows: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT document FROM ledger_entries
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND sku = $3 AND account_type = $4
            ORDER BY created_at DESC, sequence DESC
            LIMIT $5
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(sku)
        .bind(account.as_str())
        .bind(limit(limit_rows))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn get_balance_at_time(
        &self,
        scope: &TenantScope,
        sku: &str,
        at: DateTime<Utc>,
    ) -> Result<Balance> {
        let row = sqlx::query(
            r#"
            SELECT document FROM ledger_entries
            WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3 AND created_at <= $4
            ORDER BY created_at DESC, sequence DESC
            LIMIT 1
            "#,
        )
        .bind(&scope.tenant_id)
        .bind(&scope.facility_id)
        .bind(sku)
        .bind(at)
        .fetch_optional(&self.0)
        .await
        .map_err(db)?;

        match row {
            Some(row) => {
                let entry: LedgerEntry = document(&row)?;
                Ok(Balance {
                    quantity: entry.running_balance,
                    value: entry.running_value,
                })
            }
            None => Ok(Balance::empty()),
        }
    }
}

fn status_names<S: Copy>(
    statuses: &[S],
    keep: impl Fn(S) -> bool,
    name: impl Fn(S) -> &'static str,
) -> Vec<String> {
    statuses
        .iter()
        .copied()
        .filter(|s| keep(*s))
        .map(|s| name(s).to_string())
        .collect()
}

/// Reservation repository over a [`PostgresStore`] pool.
#[derive(Clone)]
pub struct PgReservations(PgPool);

#[async_trait]
impl ReservationRepository for PgReservations {
    #[tracing::instrument(skip(self, reservation), fields(reservation_id = reservation.reservation_id()))]
    async fn save(&self, reservation: &mut InventoryReservation) -> Result<()> {
        let rows = reservation.outbox_events()?;
        let expected = reservation.version();
        let tenancy = reservation.tenancy();
        let doc = serde_json::to_value(&*reservation)?;

        let mut tx = self.0.begin().await.map_err(db)?;

        let written = if expected.is_initial() {
            sqlx::query(
                r#"
                INSERT INTO inventory_reservations
                    (reservation_id, tenant_id, facility_id, warehouse_id, sku, order_id,
                     location_id, status, expires_at, version, document, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1, $10, $11, $12)
                ON CONFLICT (reservation_id) DO NOTHING
                "#,
            )
            .bind(reservation.reservation_id())
            .bind(&tenancy.tenant_id)
            .bind(&tenancy.facility_id)
            .bind(&tenancy.warehouse_id)
            .bind(reservation.sku())
            .bind(reservation.order_id())
            .bind(reservation.location_id())
            .bind(reservation.status().as_str())
            .bind(reservation.expires_at())
            .bind(&doc)
            .bind(reservation.created_at())
            .bind(reservation.updated_at())
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE inventory_reservations
                SET status = $2, expires_at = $3, document = $4, updated_at = $5,
                    version = version + 1
                WHERE reservation_id = $1 AND version = $6
                "#,
            )
            .bind(reservation.reservation_id())
            .bind(reservation.status().as_str())
            .bind(reservation.expires_at())
            .bind(&doc)
            .bind(reservation.updated_at())
            .bind(expected.as_i64())
            .execute(&mut *tx)
            .await
        }
        .map_err(db)?;

        if written.rows_affected() == 0 {
            let stored: Option<i64> =
                sqlx::query_scalar("SELECT version FROM inventory_reservations WHERE reservation_id = $1")
                    .bind(reservation.reservation_id())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db)?;
            return Err(conflict(
                InventoryReservation::aggregate_type(),
                reservation.reservation_id(),
                expected,
                stored,
            ));
        }

        PostgresOutbox::insert_all(&mut tx, &rows).await?;
        tx.commit().await.map_err(db)?;

        reservation.mark_committed();
        Ok(())
    }

    async fn find_by_id(
        &self,
        scope: &QueryScope,
        reservation_id: &str,
    ) -> Result<InventoryReservation> {
        let (tenant, facility) = scope_params(scope);
        let row = sqlx::query(
            r#"
            SELECT version, document FROM inventory_reservations
            WHERE reservation_id = $1
              AND ($2::text IS NULL OR tenant_id = $2)
              AND ($3::text IS NULL OR facility_id = $3)
            "#,
        )
        .bind(reservation_id)
        .bind(tenant)
        .bind(facility)
        .fetch_optional(&self.0)
        .await
        .map_err(db)?
        .ok_or_else(|| InventoryError::not_found("InventoryReservation", reservation_id))?;
        aggregate(&row)
    }

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<InventoryReservation>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_reservations
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND sku = $3
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(sku)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn find_by_order_id(
        &self,
        scope: &QueryScope,
        order_id: &str,
    ) -> Result<Vec<InventoryReservation>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_reservations
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND order_id = $3
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(order_id)
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<InventoryReservation>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_reservations
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND location_id = $3
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(location_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn find_expired(
        &self,
        as_of: DateTime<Utc>,
        limit_rows: usize,
    ) -> Result<Vec<InventoryReservation>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_reservations
            WHERE status = $1 AND expires_at < $2
            ORDER BY expires_at ASC
            LIMIT $3
            "#,
        )
        .bind(ReservationStatus::Active.as_str())
        .bind(as_of)
        .bind(limit(limit_rows))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn get_active_reservation_count_by_sku(
        &self,
        scope: &TenantScope,
        sku: &str,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM inventory_reservations
            WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3
              AND status = $4 AND expires_at >= $5
            "#,
        )
        .bind(&scope.tenant_id)
        .bind(&scope.facility_id)
        .bind(sku)
        .bind(ReservationStatus::Active.as_str())
        .bind(Utc::now())
        .fetch_one(&self.0)
        .await
        .map_err(db)?;
        Ok(count as u64)
    }

    async fn update_status(
        &self,
        scope: &QueryScope,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> Result<()> {
        let (tenant, facility) = scope_params(scope);
        let result = sqlx::query(
            r#"
            UPDATE inventory_reservations
            SET status = $2, updated_at = $3, version = version + 1,
                document = jsonb_set(
                    jsonb_set(document, '{status}', to_jsonb($2::text)),
                    '{updated_at}', to_jsonb($3::timestamptz))
            WHERE reservation_id = $1
              AND ($4::text IS NULL OR tenant_id = $4)
              AND ($5::text IS NULL OR facility_id = $5)
            "#,
        )
        .bind(reservation_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(tenant)
        .bind(facility)
        .execute(&self.0)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(InventoryError::not_found("InventoryReservation", reservation_id));
        }
        Ok(())
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64> {
        let terminal = status_names(&ReservationStatus::ALL, |s| s.is_terminal(), |s| s.as_str());
        let result = sqlx::query(
            "DELETE FROM inventory_reservations WHERE status = ANY($1) AND updated_at < $2",
        )
        .bind(terminal)
        .bind(before)
        .execute(&self.0)
        .await
        .map_err(db)?;
        Ok(result.rows_affected())
    }
}

/// Allocation repository over a [`PostgresStore`] pool.
#[derive(Clone)]
pub struct PgAllocations(PgPool);

#[async_trait]
impl AllocationRepository for PgAllocations {
    #[tracing::instrument(skip(self, allocation), fields(allocation_id = allocation.allocation_id()))]
    async fn save(&self, allocation: &mut InventoryAllocation) -> Result<()> {
        let rows = allocation.outbox_events()?;
        let expected = allocation.version();
        let tenancy = allocation.tenancy();
        let doc = serde_json::to_value(&*allocation)?;

        let mut tx = self.0.begin().await.map_err(db)?;

        let written = if expected.is_initial() {
            sqlx::query(
                r#"
                INSERT INTO inventory_allocations
                    (allocation_id, tenant_id, facility_id, warehouse_id, sku, order_id,
                     reservation_id, source_location_id, staging_location_id, status,
                     version, document, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, $11, $12, $13)
                ON CONFLICT (allocation_id) DO NOTHING
                "#,
            )
            .bind(allocation.allocation_id())
            .bind(&tenancy.tenant_id)
            .bind(&tenancy.facility_id)
            .bind(&tenancy.warehouse_id)
            .bind(allocation.sku())
            .bind(allocation.order_id())
            .bind(allocation.reservation_id())
            .bind(allocation.source_location_id())
            .bind(allocation.staging_location_id())
            .bind(allocation.status().as_str())
            .bind(&doc)
            .bind(allocation.created_at())
            .bind(allocation.updated_at())
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE inventory_allocations
                SET status = $2, document = $3, updated_at = $4, version = version + 1
                WHERE allocation_id = $1 AND version = $5
                "#,
            )
            .bind(allocation.allocation_id())
            .bind(allocation.status().as_str())
            .bind(&doc)
            .bind(allocation.updated_at())
            .bind(expected.as_i64())
            .execute(&mut *tx)
            .await
        }
        .map_err(db)?;

        if written.rows_affected() == 0 {
            let stored: Option<i64> =
                sqlx::query_scalar("SELECT version FROM inventory_allocations WHERE allocation_id = $1")
                    .bind(allocation.allocation_id())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db)?;
            return Err(conflict(
                InventoryAllocation::aggregate_type(),
                allocation.allocation_id(),
                expected,
                stored,
            ));
        }

        PostgresOutbox::insert_all(&mut tx, &rows).await?;
        tx.commit().await.map_err(db)?;

        allocation.mark_committed();
        Ok(())
    }

    async fn find_by_id(
        &self,
        scope: &QueryScope,
        allocation_id: &str,
    ) -> Result<InventoryAllocation> {
        let (tenant, facility) = scope_params(scope);
        let row = sqlx::query(
            r#"
            SELECT version, document FROM inventory_allocations
            WHERE allocation_id = $1
              AND ($2::text IS NULL OR tenant_id = $2)
              AND ($3::text IS NULL OR facility_id = $3)
            "#,
        )
        .bind(allocation_id)
        .bind(tenant)
        .bind(facility)
        .fetch_optional(&self.0)
        .await
        .map_err(db)?
        .ok_or_else(|| InventoryError::not_found("InventoryAllocation", allocation_id))?;
        aggregate(&row)
    }

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        status: Option<AllocationStatus>,
    ) -> Result<Vec<InventoryAllocation>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_allocations
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND sku = $3
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(sku)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn find_by_order_id(
        &self,
        scope: &QueryScope,
        order_id: &str,
    ) -> Result<Vec<InventoryAllocation>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_allocations
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND order_id = $3
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(order_id)
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        kind: LocationKind,
        status: Option<AllocationStatus>,
    ) -> Result<Vec<InventoryAllocation>> {
        let (tenant, facility) = scope_params(scope);
        let location_filter = match kind {
            LocationKind::Source => "source_location_id = $3",
            LocationKind::Staging => "staging_location_id = $3",
            LocationKind::Any => "(source_location_id = $3 OR staging_location_id = $3)",
        };
        let sql = format!(
            r#"
            SELECT version, document FROM inventory_allocations
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND {location_filter}
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant)
            .bind(facility)
            .bind(location_id)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.0)
            .await
            .map_err(db)?;
        aggregates(rows)
    }

    async fn find_by_reservation_id(
        &self,
        scope: &QueryScope,
        reservation_id: &str,
    ) -> Result<Vec<InventoryAllocation>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_allocations
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND reservation_id = $3
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(reservation_id)
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn find_active(
        &self,
        scope: &QueryScope,
        limit_rows: usize,
    ) -> Result<Vec<InventoryAllocation>> {
        let (tenant, facility) = scope_params(scope);
        let active = status_names(&AllocationStatus::ALL, |s| s.is_active(), |s| s.as_str());
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM inventory_allocations
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND status = ANY($3)
            ORDER BY created_at ASC
            LIMIT $4
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(active)
        .bind(limit(limit_rows))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        aggregates(rows)
    }

    async fn get_active_allocation_count_by_sku(
        &self,
        scope: &TenantScope,
        sku: &str,
    ) -> Result<u64> {
        let active = status_names(&AllocationStatus::ALL, |s| s.is_active(), |s| s.as_str());
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM inventory_allocations
            WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3 AND status = ANY($4)
            "#,
        )
        .bind(&scope.tenant_id)
        .bind(&scope.facility_id)
        .bind(sku)
        .bind(active)
        .fetch_one(&self.0)
        .await
        .map_err(db)?;
        Ok(count as u64)
    }

    async fn update_status(
        &self,
        scope: &QueryScope,
        allocation_id: &str,
        status: AllocationStatus,
    ) -> Result<()> {
        let (tenant, facility) = scope_params(scope);
        let result = sqlx::query(
            r#"
            UPDATE inventory_allocations
            SET status = $2, updated_at = $3, version = version + 1,
                document = jsonb_set(
                    jsonb_set(document, '{status}', to_jsonb($2::text)),
                    '{updated_at}', to_jsonb($3::timestamptz))
            WHERE allocation_id = $1
              AND ($4::text IS NULL OR tenant_id = $4)
              AND ($5::text IS NULL OR facility_id = $5)
            "#,
        )
        .bind(allocation_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(tenant)
        .bind(facility)
        .execute(&self.0)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(InventoryError::not_found("InventoryAllocation", allocation_id));
        }
        Ok(())
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64> {
        let closed = status_names(&AllocationStatus::ALL, |s| s.is_closed(), |s| s.as_str());
        let result = sqlx::query(
            "DELETE FROM inventory_allocations WHERE status = ANY($1) AND updated_at < $2",
        )
        .bind(closed)
        .bind(before)
        .execute(&self.0)
        .await
        .map_err(db)?;
        Ok(result.rows_affected())
    }
}

/// Audit log repository over a [`PostgresStore`] pool.
#[derive(Clone)]
pub struct PgTransactions(PgPool);

#[async_trait]
impl TransactionRepository for PgTransactions {
    async fn save(&self, transaction: InventoryTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_transactions
                (transaction_id, tenant_id, facility_id, sku, location_id, reference_id,
                 type, created_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&transaction.transaction_id)
        .bind(&transaction.tenancy.tenant_id)
        .bind(&transaction.tenancy.facility_id)
        .bind(&transaction.sku)
        .bind(&transaction.location_id)
        .bind(&transaction.reference_id)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.created_at)
        .bind(serde_json::to_value(&transaction)?)
        .execute(&self.0)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        limit_rows: usize,
    ) -> Result<Vec<InventoryTransaction>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT document FROM inventory_transactions
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND sku = $3
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(sku)
        .bind(limit(limit_rows))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        limit_rows: usize,
    ) -> Result<Vec<InventoryTransaction>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT document FROM inventory_transactions
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND location_id = $3
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(location_id)
        .bind(limit(limit_rows))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn find_by_reference_id(
        &self,
        scope: &QueryScope,
        reference_id: &str,
    ) -> Result<Vec<InventoryTransaction>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT document FROM inventory_transactions
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND reference_id = $3
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(reference_id)
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn find_by_type(
        &self,
        scope: &QueryScope,
        transaction_type: TransactionType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit_rows: usize,
    ) -> Result<Vec<InventoryTransaction>> {
        let (tenant, facility) = scope_params(scope);
        let rows = sqlx::query(
            r#"
            SELECT document FROM inventory_transactions
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR facility_id = $2)
              AND type = $3
              AND created_at >= $4 AND created_at <= $5
            ORDER BY created_at DESC
            LIMIT $6
            "#,
        )
        .bind(tenant)
        .bind(facility)
        .bind(transaction_type.as_str())
        .bind(start)
        .bind(end)
        .bind(limit(limit_rows))
        .fetch_all(&self.0)
        .await
        .map_err(db)?;
        documents(rows)
    }

    async fn count_by_sku(&self, scope: &TenantScope, sku: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM inventory_transactions
            WHERE tenant_id = $1 AND facility_id = $2 AND sku = $3
            "#,
        )
        .bind(&scope.tenant_id)
        .bind(&scope.facility_id)
        .bind(sku)
        .fetch_one(&self.0)
        .await
        .map_err(db)?;
        Ok(count as u64)
    }

    async fn purge_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM inventory_transactions WHERE created_at < $1")
            .bind(before)
            .execute(&self.0)
            .await
            .map_err(db)?;
        Ok(result.rows_affected())
    }
}
