//! Allocation service: drives allocations and the reservation and ledger
//! changes that go with them.

use common::{CallContext, Money, QueryScope, TenantScope};

use crate::aggregate::AggregateRoot;
use crate::error::Result;
use crate::ledger::{AccountType, ConsumeStock, LedgerEntry, LedgerPosting, ReferenceType};
use crate::repository::{
    AllocationRepository, LedgerEntryRepository, LedgerRepository, ReservationRepository,
    TransactionRepository,
};
use crate::reservation::{ReservationError, ReservationStatus};
use crate::transaction::{InventoryTransaction, TransactionType};

use super::{AllocationError, AllocationStatus, InventoryAllocation, NewAllocation};

/// Service for managing allocations.
///
/// Each step saves one aggregate at a time. Shipping touches three
/// aggregates (allocation, ledger, reservation) in that order; each save is
/// atomic on its own. The ledger consumption for an allocation is posted
/// against the allocation id, so a retried shipment finds it in the journal
/// and never posts it twice.
pub struct AllocationService<A, R, L, E, T> {
    allocations: A,
    reservations: R,
    ledgers: L,
    entries: E,
    transactions: T,
}

impl<A, R, L, E, T> AllocationService<A, R, L, E, T>
where
    A: AllocationRepository,
    R: ReservationRepository,
    L: LedgerRepository,
    E: LedgerEntryRepository,
    T: TransactionRepository,
{
    pub fn new(allocations: A, reservations: R, ledgers: L, entries: E, transactions: T) -> Self {
        Self {
            allocations,
            reservations,
            ledgers,
            entries,
            transactions,
        }
    }

    pub fn allocations(&self) -> &A {
        &self.allocations
    }

    /// Picks reserved stock to staging.
    ///
    /// Stages the reservation if it is still active, and refuses to allocate
    /// more than the reservation holds across its live allocations.
    #[tracing::instrument(skip(self, ctx, params), fields(reservation_id = %params.reservation_id))]
    pub async fn allocate(
        &self,
        ctx: &CallContext,
        params: NewAllocation,
    ) -> Result<InventoryAllocation> {
        ctx.run(async {
            if params.reservation_id.trim().is_empty() {
                return Err(AllocationError::ReservationRequired.into());
            }
            let scope = QueryScope::Tenant(params.tenancy.scope());
            let mut reservation = self
                .reservations
                .find_by_id(&scope, &params.reservation_id)
                .await?;

            let allocated: u64 = self
                .allocations
                .find_by_reservation_id(&scope, &params.reservation_id)
                .await?
                .iter()
                .filter(|a| a.status() != AllocationStatus::Returned)
                .map(|a| a.quantity())
                .sum();
            let remaining = reservation.quantity().saturating_sub(allocated);
            if params.quantity > remaining {
                return Err(AllocationError::ExceedsReservation {
                    reservation_id: params.reservation_id.clone(),
                    requested: params.quantity,
                    remaining,
                }
                .into());
            }

            let mut allocation = InventoryAllocation::new(params)?;
            match reservation.status() {
                ReservationStatus::Active => {
                    reservation.mark_staged(allocation.staged_by())?;
                    self.reservations.save(&mut reservation).await?;
                }
                ReservationStatus::Staged => {}
                current => {
                    return Err(ReservationError::InvalidTransition {
                        reservation_id: reservation.reservation_id().to_string(),
                        current,
                        action: "allocate",
                    }
                    .into());
                }
            }

            self.allocations.save(&mut allocation).await?;
            self.audit(
                &allocation,
                TransactionType::Stage,
                allocation.source_location_id(),
                allocation.staged_by(),
                allocation.quantity() as i64,
            )
            .await;

            tracing::info!(
                allocation_id = allocation.allocation_id(),
                quantity = allocation.quantity(),
                "Allocation staged"
            );
            Ok(allocation)
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn pack(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        allocation_id: &str,
        actor: &str,
    ) -> Result<InventoryAllocation> {
        ctx.run(async {
            let mut allocation = self.load(scope, allocation_id).await?;
            allocation.mark_packed(actor)?;
            self.allocations.save(&mut allocation).await?;
            Ok(allocation)
        })
        .await
    }

    /// Ships a packed allocation.
    ///
    /// Closes the allocation, consumes the stock from the SKU's ledger
    /// (recognising cost of goods sold) and fulfills the reservation once
    /// every live allocation against it has shipped.
    ///
    /// Safe to retry after a partial failure: a shipped allocation whose
    /// consumption is already in the journal returns that posting, and one
    /// without it is consumed exactly once.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn ship(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        allocation_id: &str,
        actor: &str,
    ) -> Result<LedgerPosting> {
        ctx.run(async {
            let mut allocation = self.load(scope, allocation_id).await?;
            let closing = allocation.status() != AllocationStatus::Shipped;
            if closing {
                allocation.mark_shipped(actor)?;
            }

            let posted = self
                .entries
                .find_by_reference(scope, allocation.sku(), allocation.allocation_id())
                .await?;
            if !posted.is_empty() {
                if closing {
                    self.allocations.save(&mut allocation).await?;
                }
                self.fulfill_if_shipped(scope, allocation.reservation_id(), actor)
                    .await?;
                tracing::debug!(allocation_id, "Shipment already posted");
                return posting_from_journal(posted);
            }

            // A shortage fails here, before the allocation is closed.
            let mut ledger = self.ledgers.find_by_sku(scope, allocation.sku()).await?;
            let posting = ledger.record_consumption(&ConsumeStock::new(
                scope.clone(),
                allocation.sku(),
                allocation.quantity(),
                allocation.source_location_id(),
                allocation.allocation_id(),
                ReferenceType::Shipment,
                actor,
            ))?;

            if closing {
                self.allocations.save(&mut allocation).await?;
            }
            self.ledgers.save(&mut ledger).await?;
            self.fulfill_if_shipped(scope, allocation.reservation_id(), actor)
                .await?;

            self.audit(
                &allocation,
                TransactionType::Ship,
                allocation.staging_location_id(),
                actor,
                -(allocation.quantity() as i64),
            )
            .await;

            tracing::info!(
                allocation_id,
                cogs = %posting.cost_of_goods_sold,
                "Allocation shipped"
            );
            Ok(posting)
        })
        .await
    }

    /// Records a return. Stock coming back is not re-received here; that is
    /// a separate receipt or adjustment against the ledger.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn return_allocation(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        allocation_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<InventoryAllocation> {
        ctx.run(async {
            let mut allocation = self.load(scope, allocation_id).await?;
            allocation.mark_returned(actor, reason)?;
            self.allocations.save(&mut allocation).await?;
            self.audit(
                &allocation,
                TransactionType::Return,
                allocation.staging_location_id(),
                actor,
                allocation.quantity() as i64,
            )
            .await;
            Ok(allocation)
        })
        .await
    }

    pub async fn get(
        &self,
        ctx: &CallContext,
        scope: &QueryScope,
        allocation_id: &str,
    ) -> Result<InventoryAllocation> {
        ctx.run(self.allocations.find_by_id(scope, allocation_id))
            .await
    }

    async fn fulfill_if_shipped(
        &self,
        scope: &TenantScope,
        reservation_id: &str,
        actor: &str,
    ) -> Result<()> {
        let query = QueryScope::Tenant(scope.clone());
        let mut reservation = self.reservations.find_by_id(&query, reservation_id).await?;
        if reservation.status() != ReservationStatus::Staged {
            return Ok(());
        }

        let siblings = self
            .allocations
            .find_by_reservation_id(&query, reservation_id)
            .await?;
        let shipped: u64 = siblings
            .iter()
            .filter(|a| a.status() == AllocationStatus::Shipped)
            .map(|a| a.quantity())
            .sum();
        let pending = siblings.iter().any(|a| a.status().is_active());
        if pending || shipped < reservation.quantity() {
            return Ok(());
        }

        reservation.mark_fulfilled(actor)?;
        self.reservations.save(&mut reservation).await
    }

    async fn load(&self, scope: &TenantScope, allocation_id: &str) -> Result<InventoryAllocation> {
        self.allocations
            .find_by_id(&QueryScope::Tenant(scope.clone()), allocation_id)
            .await
    }

    async fn audit(
        &self,
        allocation: &InventoryAllocation,
        transaction_type: TransactionType,
        location_id: &str,
        actor: &str,
        quantity_delta: i64,
    ) {
        let transaction = InventoryTransaction::new(
            allocation.tenancy().clone(),
            transaction_type,
            allocation.sku(),
            location_id,
            allocation.allocation_id(),
            quantity_delta,
            actor,
        );
        if let Err(e) = self.transactions.save(transaction).await {
            tracing::warn!(error = %e, "Failed to write inventory transaction");
        }
    }
}

/// Rebuilds the posting of a shipment from its non-empty journal entries.
fn posting_from_journal(entries: Vec<LedgerEntry>) -> Result<LedgerPosting> {
    let transaction_id = entries[0].transaction_id.clone();
    let mut cogs = Money::zero(entries[0].debit_value.currency());
    for entry in entries.iter().filter(|e| e.account_type == AccountType::Cogs) {
        cogs = cogs.try_add(entry.debit_value)?;
    }
    Ok(LedgerPosting {
        transaction_id,
        entries,
        cost_of_goods_sold: cogs,
    })
}
