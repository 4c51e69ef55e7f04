//! Repository contracts for the inventory aggregates.
//!
//! Every `save` persists the aggregate row and one outbox row per pending
//! event in a single storage transaction, then calls
//! [`AggregateRoot::mark_committed`](crate::AggregateRoot::mark_committed).
//! Saves are guarded by the aggregate version: the stored version must equal
//! the version the aggregate was loaded at, otherwise the save fails with
//! `ConcurrentModification` and nothing is written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, QueryScope, TenantScope};
use serde::{Deserialize, Serialize};

use crate::allocation::{AllocationStatus, InventoryAllocation, LocationKind};
use crate::error::Result;
use crate::ledger::{AccountType, InventoryLedger, LedgerEntry};
use crate::reservation::{InventoryReservation, ReservationStatus};
use crate::transaction::{InventoryTransaction, TransactionType};

/// Reconstructed ledger position at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub quantity: u64,
    pub value: Money,
}

impl Balance {
    pub fn empty() -> Self {
        Self {
            quantity: 0,
            value: Money::zero(common::Currency::USD),
        }
    }
}

/// Storage for inventory ledgers.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Upserts the ledger together with its pending journal entries and
    /// outbox rows.
    async fn save(&self, ledger: &mut InventoryLedger) -> Result<()>;

    /// Fails with `NotFound` if the SKU has no ledger in `scope`.
    async fn find_by_sku(&self, scope: &TenantScope, sku: &str) -> Result<InventoryLedger>;

    /// Most recently updated first.
    async fn find_all(
        &self,
        scope: &QueryScope,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InventoryLedger>>;

    /// Administrative removal. Journal entries are kept.
    async fn delete(&self, scope: &TenantScope, sku: &str) -> Result<()>;
}

/// Read and append access to the double-entry journal.
#[async_trait]
pub trait LedgerEntryRepository: Send + Sync {
    async fn save(&self, entry: LedgerEntry) -> Result<()>;

    /// Inserts all entries or none.
    async fn save_all(&self, entries: Vec<LedgerEntry>) -> Result<()>;

    /// Newest first.
    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Both sides of one double-entry transaction, in posting order.
    async fn find_by_transaction_id(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> Result<Vec<LedgerEntry>>;

    /// Entries posted against `reference_id` for one SKU, in posting order.
    async fn find_by_reference(
        &self,
        scope: &TenantScope,
        sku: &str,
        reference_id: &str,
    ) -> Result<Vec<LedgerEntry>>;

    /// Entries with `start <= created_at <= end`, oldest first.
    async fn find_by_time_range(
        &self,
        scope: &QueryScope,
        sku: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>>;

    /// Newest first.
    async fn find_by_account_type(
        &self,
        scope: &QueryScope,
        sku: &str,
        account: AccountType,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Running totals of the latest entry at or before `at`, ties broken by
    /// the highest sequence. Zero quantity and value when there is none.
    async fn get_balance_at_time(
        &self,
        scope: &TenantScope,
        sku: &str,
        at: DateTime<Utc>,
    ) -> Result<Balance>;
}

/// Storage for reservations.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn save(&self, reservation: &mut InventoryReservation) -> Result<()>;

    /// Fails with `NotFound` if no reservation with that id is visible.
    async fn find_by_id(&self, scope: &QueryScope, reservation_id: &str)
    -> Result<InventoryReservation>;

    /// Oldest first.
    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<InventoryReservation>>;

    async fn find_by_order_id(
        &self,
        scope: &QueryScope,
        order_id: &str,
    ) -> Result<Vec<InventoryReservation>>;

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<InventoryReservation>>;

    /// Active reservations whose `expires_at` is before `as_of`, across all
    /// tenants, soonest expiry first.
    async fn find_expired(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InventoryReservation>>;

    /// Active, unexpired reservations for the SKU.
    async fn get_active_reservation_count_by_sku(
        &self,
        scope: &TenantScope,
        sku: &str,
    ) -> Result<u64>;

    /// Direct status write guarded by existence only. Bumps the version and
    /// writes no outbox rows.
    async fn update_status(
        &self,
        scope: &QueryScope,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> Result<()>;

    /// Deletes terminal reservations last updated before `before`.
    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64>;
}

/// Storage for allocations.
#[async_trait]
pub trait AllocationRepository: Send + Sync {
    async fn save(&self, allocation: &mut InventoryAllocation) -> Result<()>;

    async fn find_by_id(&self, scope: &QueryScope, allocation_id: &str)
    -> Result<InventoryAllocation>;

    /// Oldest first.
    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        status: Option<AllocationStatus>,
    ) -> Result<Vec<InventoryAllocation>>;

    async fn find_by_order_id(
        &self,
        scope: &QueryScope,
        order_id: &str,
    ) -> Result<Vec<InventoryAllocation>>;

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        kind: LocationKind,
        status: Option<AllocationStatus>,
    ) -> Result<Vec<InventoryAllocation>>;

    async fn find_by_reservation_id(
        &self,
        scope: &QueryScope,
        reservation_id: &str,
    ) -> Result<Vec<InventoryAllocation>>;

    /// Staged or packed allocations, oldest first.
    async fn find_active(
        &self,
        scope: &QueryScope,
        limit: usize,
    ) -> Result<Vec<InventoryAllocation>>;

    async fn get_active_allocation_count_by_sku(
        &self,
        scope: &TenantScope,
        sku: &str,
    ) -> Result<u64>;

    async fn update_status(
        &self,
        scope: &QueryScope,
        allocation_id: &str,
        status: AllocationStatus,
    ) -> Result<()>;

    /// Deletes shipped and returned allocations last updated before `before`.
    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64>;
}

/// Append-only store for the movement audit log. Every query returns the
/// newest records first.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn save(&self, transaction: InventoryTransaction) -> Result<()>;

    async fn find_by_sku(
        &self,
        scope: &QueryScope,
        sku: &str,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>>;

    async fn find_by_location(
        &self,
        scope: &QueryScope,
        location_id: &str,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>>;

    async fn find_by_reference_id(
        &self,
        scope: &QueryScope,
        reference_id: &str,
    ) -> Result<Vec<InventoryTransaction>>;

    async fn find_by_type(
        &self,
        scope: &QueryScope,
        transaction_type: TransactionType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>>;

    async fn count_by_sku(&self, scope: &TenantScope, sku: &str) -> Result<u64>;

    /// Deletes records created before `before`.
    async fn purge_older_than(&self, before: DateTime<Utc>) -> Result<u64>;
}
