use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{QueryScope, TenantScope};
use domain::{
    AccountType, AggregateRoot, AllocationRepository, AllocationStatus, Balance,
    InventoryAllocation, InventoryError, InventoryLedger, InventoryReservation,
    InventoryTransaction, LedgerEntry, LedgerEntryRepository, LedgerRepository, LocationKind,
    ReservationRepository, ReservationStatus, Result, TransactionRepository, TransactionType,
};
use outbox::InMemoryOutbox;
use tokio::sync::RwLock;

use crate::check_version;

type LedgerKey = (TenantScope, String);

#[derive(Default)]
struct State {
    ledgers: HashMap<LedgerKey, InventoryLedger>,
    entries: Vec<LedgerEntry>,
    reservations: HashMap<String, InventoryReservation>,
    allocations: HashMap<String, InventoryAllocation>,
    transactions: Vec<InventoryTransaction>,
}

/// In-memory store for tests and single-process runs.
///
/// Aggregate saves take the state lock, then the outbox lock, check the
/// version, and apply the aggregate row, journal entries and outbox rows
/// together without awaiting in between. A cancelled save therefore either
/// commits everything or nothing.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    outbox: InMemoryOutbox,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates an empty store with its own outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store writing to a shared outbox.
    pub fn with_outbox(outbox: InMemoryOutbox) -> Self {
        Self {
            outbox,
            ..Self::default()
        }
    }

    pub fn outbox(&self) -> InMemoryOutbox {
        self.outbox.clone()
    }

    pub fn ledgers(&self) -> InMemoryLedgers {
        InMemoryLedgers(self.clone())
    }

    pub fn ledger_entries(&self) -> InMemoryLedgerEntries {
        InMemoryLedgerEntries(self.clone())
    }

    pub fn reservations(&self) -> InMemoryReservations {
        InMemoryReservations(self.clone())
    }

    pub fn allocations(&self) -> InMemoryAllocations {
        InMemoryAllocations(self.clone())
    }

    pub fn transactions(&self) -> InMemoryTransactions {
        InMemoryTransactions(self.clone())
    }

    /// Makes the next aggregate save fail after its checks pass, leaving
    /// nothing written.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of journal entries across all ledgers.
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = State::default();
        self.outbox.clear().await;
    }

    fn injected_failure(&self) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(InventoryError::storage(std::io::Error::other(
                "injected commit failure",
            )));
        }
        Ok(())
    }
}

/// Ledger repository over an [`InMemoryStore`].
#[derive(Clone)]
pub struct InMemoryLedgers(InMemoryStore);

#[async_trait]
impl LedgerRepository for InMemoryLedgers {
    async fn save(&self, ledger: &mut InventoryLedger) -> Result<()> {
        let rows = ledger.outbox_events()?;
        let entries = ledger.pending_entries().to_vec();
        let key = (ledger.scope(), ledger.sku().to_string());

        let mut state = self.0.state.write().await;
        let mut batch = self.0.outbox.begin().await;

        let stored = state.ledgers.get(&key).map(|l| l.version());
        check_version(
            InventoryLedger::aggregate_type(),
            &ledger.aggregate_id(),
            ledger.version(),
            stored,
        )?;
        self.0.injected_failure()?;

        batch.stage(rows);
        ledger.mark_committed();
        state.ledgers.insert(key, ledger.clone());
        state.entries.extend(entries);
        batch.commit();
        Ok(())
    }

    async fn find_by_sku(&self, scope: &TenantScope, sku: &str) -> Result<InventoryLedger> {
        self.0
            .state
            .read()
            .await
            .ledgers
            .get(&(scope.clone(), sku.to_string()))
            .cloned()
            .ok_or_else(|| InventoryError::not_found("InventoryLedger", sku))
    }

    async fn find_all(
        &self,
        scope: &QueryScope,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InventoryLedger>> {
        let state = self.0.state.read().await;
        let mut ledgers: Vec<_> = state
            .ledgers
            .values()
            .filter(|l| scope.admits(l.tenancy()))
            .cloned()
            .collect();
        ledgers.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        Ok(ledgers.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, scope: &TenantScope, sku: &str) -> Result<()> {
        self.0
            .state
            .write()
            .await
            .ledgers
            .remove(&(scope.clone(), sku.to_string()))
            .map(|_| ())
            .ok_or_else(|| InventoryError::not_found("InventoryLedger", sku))
    }
}

/// Journal repository over an [`InMemoryStore`].
#[derive(Clone)]
pub struct InMemoryLedgerEntries(InMemoryStore);

impl InMemoryLedgerEntries {
    async fn matching(&self, scope: &QueryScope, sku: &str) -> Vec<LedgerEntry> {
        self.0
            .state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.sku == sku && scope.admits_scope(&e.scope))
            .cloned()
            .collect()
    }
}

fn newest_first(entries: &mut [LedgerEntry]) {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then(b.sequence.cmp(&a.sequence))
    });
}

#[async_trait]
impl LedgerEntryRepository for InMemoryLedgerEntries {
    async fn save(&self, entry: LedgerEntry) -> Result<()> {
        self.0.state.write().await.entries.push(entry);
        Ok(())
    }

    async fn save_all(&self, entries: Vec<LedgerEntry>) -> Result<()> {
        self.0.state.write().await.entries.extend(entries);
        Ok(())
    }

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.matching(scope, sku).await;
        newest_first(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn find_by_transaction_id(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.0.state.read().await;
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .filter(|e| e.scope.tenant_id == tenant_id && e.transaction_id.as_str() == transaction_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn find_by_reference(
        &self,
        scope: &TenantScope,
        sku: &str,
        reference_id: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.0.state.read().await;
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .filter(|e| &e.scope == scope && e.sku == sku && e.reference_id == reference_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn find_by_time_range(
        &self,
        scope: &QueryScope,
        sku: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<_> = self
            .matching(scope, sku)
            .await
            .into_iter()
            .filter(|e| e.created_at >= start && e.created_at <= end)
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.sequence.cmp(&b.sequence)));
        Ok(entries)
    }

    async fn find_by_account_type(
        &self,
        scope: &QueryScope,
        sku: &str,
        account: AccountType,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<_> = self
            .matching(scope, sku)
            .await
            .into_iter()
            .filter(|e| e.account_type == account)
            .collect();
        newest_first(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn get_balance_at_time(
        &self,
        scope: &TenantScope,
        sku: &str,
        at: DateTime<Utc>,
    ) -> Result<Balance> {
        let state = self.0.state.read().await;
        let latest = state
            .entries
            .iter()
            .filter(|e| e.sku == sku && &e.scope == scope && e.created_at <= at)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.sequence.cmp(&b.sequence)));

        Ok(latest
            .map(|e| Balance {
                quantity: e.running_balance,
                value: e.running_value,
            })
            .unwrap_or_else(Balance::empty))
    }
}

/// Reservation repository over an [`InMemoryStore`].
#[derive(Clone)]
pub struct InMemoryReservations(InMemoryStore);

impl InMemoryReservations {
    async fn select<F>(&self, filter: F) -> Vec<InventoryReservation>
    where
        F: Fn(&InventoryReservation) -> bool,
    {
        let state = self.0.state.read().await;
        let mut rows: Vec<_> = state
            .reservations
            .values()
            .filter(|r| filter(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        rows
    }
}

#[async_trait]
impl ReservationRepository for InMemoryReservations {
    async fn save(&self, reservation: &mut InventoryReservation) -> Result<()> {
        let rows = reservation.outbox_events()?;

        let mut state = self.0.state.write().await;
        let mut batch = self.0.outbox.begin().await;

        let stored = state
            .reservations
            .get(reservation.reservation_id())
            .map(|r| r.version());
        check_version(
            InventoryReservation::aggregate_type(),
            reservation.reservation_id(),
            reservation.version(),
            stored,
        )?;
        self.0.injected_failure()?;

        batch.stage(rows);
        reservation.mark_committed();
        state
            .reservations
            .insert(reservation.reservation_id().to_string(), reservation.clone());
        batch.commit();
        Ok(())
    }

    async fn find_by_id(
        &self,
        scope: &QueryScope,
        reservation_id: &str,
    ) -> Result<InventoryReservation> {
        self.0
            .state
            .read()
            .await
            .reservations
            .get(reservation_id)
            .filter(|r| scope.admits(r.tenancy()))
            .cloned()
            .ok_or_else(|| InventoryError::not_found("InventoryReservation", reservation_id))
    }

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<InventoryReservation>> {
        Ok(self
            .select(|r| {
                scope.admits(r.tenancy())
                    && r.sku() == sku
                    && status.is_none_or(|s| r.status() == s)
            })
            .await)
    }

    async fn find_by_order_id(
        &self,
        scope: &QueryScope,
        order_id: &str,
    ) -> Result<Vec<InventoryReservation>> {
        Ok(self
            .select(|r| scope.admits(r.tenancy()) && r.order_id() == order_id)
            .await)
    }

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<InventoryReservation>> {
        Ok(self
            .select(|r| {
                scope.admits(r.tenancy())
                    && r.location_id() == location_id
                    && status.is_none_or(|s| r.status() == s)
            })
            .await)
    }

    async fn find_expired(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InventoryReservation>> {
        let mut rows = self.select(|r| r.is_expired_at(as_of)).await;
        rows.sort_by(|a, b| a.expires_at().cmp(&b.expires_at()));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_active_reservation_count_by_sku(
        &self,
        scope: &TenantScope,
        sku: &str,
    ) -> Result<u64> {
        let now = Utc::now();
        let state = self.0.state.read().await;
        Ok(state
            .reservations
            .values()
            .filter(|r| scope.contains(r.tenancy()) && r.sku() == sku && r.is_active_at(now))
            .count() as u64)
    }

    async fn update_status(
        &self,
        scope: &QueryScope,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> Result<()> {
        let mut state = self.0.state.write().await;
        let reservation = state
            .reservations
            .get_mut(reservation_id)
            .filter(|r| scope.admits(r.tenancy()))
            .ok_or_else(|| InventoryError::not_found("InventoryReservation", reservation_id))?;
        reservation.overwrite_status(status, Utc::now());
        let next = reservation.version().next();
        reservation.set_version(next);
        Ok(())
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.0.state.write().await;
        let count = state.reservations.len();
        state
            .reservations
            .retain(|_, r| !(r.is_terminal() && r.updated_at() < before));
        Ok((count - state.reservations.len()) as u64)
    }
}

/// Allocation repository over an [`InMemoryStore`].
#[derive(Clone)]
pub struct InMemoryAllocations(InMemoryStore);

impl InMemoryAllocations {
    async fn select<F>(&self, filter: F) -> Vec<InventoryAllocation>
    where
        F: Fn(&InventoryAllocation) -> bool,
    {
        let state = self.0.state.read().await;
        let mut rows: Vec<_> = state
            .allocations
            .values()
            .filter(|a| filter(a))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        rows
    }
}

#[async_trait]
impl AllocationRepository for InMemoryAllocations {
    async fn save(&self, allocation: &mut InventoryAllocation) -> Result<()> {
        let rows = allocation.outbox_events()?;

        let mut state = self.0.state.write().await;
        let mut batch = self.0.outbox.begin().await;

        let stored = state
            .allocations
            .get(allocation.allocation_id())
            .map(|a| a.version());
        check_version(
            InventoryAllocation::aggregate_type(),
            allocation.allocation_id(),
            allocation.version(),
            stored,
        )?;
        self.0.injected_failure()?;

        batch.stage(rows);
        allocation.mark_committed();
        state
            .allocations
            .insert(allocation.allocation_id().to_string(), allocation.clone());
        batch.commit();
        Ok(())
    }

    async fn find_by_id(
        &self,
        scope: &QueryScope,
        allocation_id: &str,
    ) -> Result<InventoryAllocation> {
        self.0
            .state
            .read()
            .await
            .allocations
            .get(allocation_id)
            .filter(|a| scope.admits(a.tenancy()))
            .cloned()
            .ok_or_else(|| InventoryError::not_found("InventoryAllocation", allocation_id))
    }

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        status: Option<AllocationStatus>,
    ) -> Result<Vec<InventoryAllocation>> {
        Ok(self
            .select(|a| {
                scope.admits(a.tenancy())
                    && a.sku() == sku
                    && status.is_none_or(|s| a.status() == s)
            })
            .await)
    }

    async fn find_by_order_id(
        &self,
        scope: &QueryScope,
        order_id: &str,
    ) -> Result<Vec<InventoryAllocation>> {
        Ok(self
            .select(|a| scope.admits(a.tenancy()) && a.order_id() == order_id)
            .await)
    }

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        kind: LocationKind,
        status: Option<AllocationStatus>,
    ) -> Result<Vec<InventoryAllocation>> {
        Ok(self
            .select(|a| {
                let at_location = match kind {
                    LocationKind::Source => a.source_location_id() == location_id,
                    LocationKind::Staging => a.staging_location_id() == location_id,
                    LocationKind::Any => {
                        a.source_location_id() == location_id
                            || a.staging_location_id() == location_id
                    }
                };
                scope.admits(a.tenancy()) && at_location && status.is_none_or(|s| a.status() == s)
            })
            .await)
    }

    async fn find_by_reservation_id(
        &self,
        scope: &QueryScope,
        reservation_id: &str,
    ) -> Result<Vec<InventoryAllocation>> {
        Ok(self
            .select(|a| scope.admits(a.tenancy()) && a.reservation_id() == reservation_id)
            .await)
    }

    async fn find_active(
        &self,
        scope: &QueryScope,
        limit: usize,
    ) -> Result<Vec<InventoryAllocation>> {
        let mut rows = self
            .select(|a| scope.admits(a.tenancy()) && a.is_active())
            .await;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_active_allocation_count_by_sku(
        &self,
        scope: &TenantScope,
        sku: &str,
    ) -> Result<u64> {
        let state = self.0.state.read().await;
        Ok(state
            .allocations
            .values()
            .filter(|a| scope.contains(a.tenancy()) && a.sku() == sku && a.is_active())
            .count() as u64)
    }

    async fn update_status(
        &self,
        scope: &QueryScope,
        allocation_id: &str,
        status: AllocationStatus,
    ) -> Result<()> {
        let mut state = self.0.state.write().await;
        let allocation = state
            .allocations
            .get_mut(allocation_id)
            .filter(|a| scope.admits(a.tenancy()))
            .ok_or_else(|| InventoryError::not_found("InventoryAllocation", allocation_id))?;
        allocation.overwrite_status(status, Utc::now());
        let next = allocation.version().next();
        allocation.set_version(next);
        Ok(())
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.0.state.write().await;
        let count = state.allocations.len();
        state
            .allocations
            .retain(|_, a| !(a.status().is_closed() && a.updated_at() < before));
        Ok((count - state.allocations.len()) as u64)
    }
}

/// Audit log repository over an [`InMemoryStore`].
#[derive(Clone)]
pub struct InMemoryTransactions(InMemoryStore);

impl InMemoryTransactions {
    async fn select<F>(&self, filter: F, limit: usize) -> Vec<InventoryTransaction>
    where
        F: Fn(&InventoryTransaction) -> bool,
    {
        let state = self.0.state.read().await;
        let mut rows: Vec<_> = state
            .transactions
            .iter()
            .filter(|t| filter(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        rows
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactions {
    async fn save(&self, transaction: InventoryTransaction) -> Result<()> {
        self.0.state.write().await.transactions.push(transaction);
        Ok(())
    }

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>> {
        Ok(self
            .select(|t| scope.admits(&t.tenancy) && t.sku == sku, limit)
            .await)
    }

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>> {
        Ok(self
            .select(
                |t| scope.admits(&t.tenancy) && t.location_id == location_id,
                limit,
            )
            .await)
    }

    async fn find_by_reference_id(
        &self,
        scope: &QueryScope,
        reference_id: &str,
    ) -> Result<Vec<InventoryTransaction>> {
        Ok(self
            .select(
                |t| scope.admits(&t.tenancy) && t.reference_id == reference_id,
                usize::MAX,
            )
            .await)
    }

    async fn find_by_type(
        &self,
        scope: &QueryScope,
        transaction_type: TransactionType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>> {
        Ok(self
            .select(
                |t| {
                    scope.admits(&t.tenancy)
                        && t.transaction_type == transaction_type
                        && t.created_at >= start
                        && t.created_at <= end
                },
                limit,
            )
            .await)
    }

    async fn count_by_sku(&self, scope: &TenantScope, sku: &str) -> Result<u64> {
        let state = self.0.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| scope.contains(&t.tenancy) && t.sku == sku)
            .count() as u64)
    }

    async fn purge_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.0.state.write().await;
        let count = state.transactions.len();
        state.transactions.retain(|t| t.created_at >= before);
        Ok((count - state.transactions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::{Currency, Money, Tenancy, Version};
    use domain::{NewReservation, ReceiveStock, ValuationMethod};

    use super::*;

    fn tenancy() -> Tenancy {
        Tenancy::new("T1", "F1", "W1")
    }

    fn received_ledger() -> InventoryLedger {
        let mut ledger = InventoryLedger::new("SKU-1", tenancy(), Currency::USD, ValuationMethod::Fifo);
        ledger
            .record_receiving(&ReceiveStock::new(
                tenancy(),
                "SKU-1",
                10,
                Money::usd(500),
                "DOCK",
                "PO-1",
                "rx",
            ))
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_ledger_save_writes_entries_and_outbox() {
        let store = InMemoryStore::new();
        let mut ledger = received_ledger();
        let pending = ledger.pending_events().len();

        store.ledgers().save(&mut ledger).await.unwrap();

        assert!(ledger.pending_events().is_empty());
        assert!(ledger.pending_entries().is_empty());
        assert_eq!(ledger.version(), Version::new(1));
        assert_eq!(store.outbox().len().await, pending);
        assert_eq!(store.entry_count().await, 2);
    }

    #[tokio::test]
    async fn test_stale_save_is_rejected() {
        let store = InMemoryStore::new();
        let mut ledger = received_ledger();
        store.ledgers().save(&mut ledger).await.unwrap();

        let mut fresh = received_ledger();
        let err = store.ledgers().save(&mut fresh).await.unwrap_err();

        assert!(matches!(err, InventoryError::ConcurrentModification { .. }));
        assert!(!fresh.pending_events().is_empty());
        assert_eq!(store.entry_count().await, 2);
    }

    #[tokio::test]
    async fn test_injected_failure_writes_nothing() {
        let store = InMemoryStore::new();
        store.fail_next_commit();
        let mut ledger = received_ledger();

        assert!(store.ledgers().save(&mut ledger).await.is_err());
        assert!(store.outbox().is_empty().await);
        assert_eq!(store.entry_count().await, 0);
        assert!(!ledger.pending_events().is_empty());

        store.ledgers().save(&mut ledger).await.unwrap();
        assert!(!store.outbox().is_empty().await);
    }

    #[tokio::test]
    async fn test_update_status_bumps_version() {
        let store = InMemoryStore::new();
        let mut reservation = InventoryReservation::new(
            NewReservation::new(tenancy(), "SKU-1", "O-1", "A-01", 2, "clerk").with_id("RSV-1"),
        )
        .unwrap();
        store.reservations().save(&mut reservation).await.unwrap();

        let scope = QueryScope::from(&tenancy());
        store
            .reservations()
            .update_status(&scope, "RSV-1", ReservationStatus::Cancelled)
            .await
            .unwrap();

        let stored = store.reservations().find_by_id(&scope, "RSV-1").await.unwrap();
        assert_eq!(stored.status(), ReservationStatus::Cancelled);
        assert_eq!(stored.version(), Version::new(2));

        let err = store
            .reservations()
            .update_status(&scope, "RSV-404", ReservationStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_purge_terminal_keeps_live_rows() {
        let store = InMemoryStore::new();
        for (id, cancel) in [("RSV-1", true), ("RSV-2", false)] {
            let mut r = InventoryReservation::new(
                NewReservation::new(tenancy(), "SKU-1", "O-1", "A-01", 1, "clerk").with_id(id),
            )
            .unwrap();
            if cancel {
                r.cancel("clerk", "test").unwrap();
            }
            store.reservations().save(&mut r).await.unwrap();
        }

        let purged = store
            .reservations()
            .purge_terminal(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(store
            .reservations()
            .find_by_id(&QueryScope::Global, "RSV-2")
            .await
            .is_ok());
    }
}
