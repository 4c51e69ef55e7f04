//! Reservation service.

use chrono::{DateTime, Duration, Utc};
use common::{CallContext, QueryScope, TenantScope};

use crate::aggregate::AggregateRoot;
use crate::error::{InventoryError, Result};
use crate::repository::{ReservationRepository, TransactionRepository};
use crate::transaction::{InventoryTransaction, TransactionType};

use super::{InventoryReservation, NewReservation, ReservationStatus};

/// Service for managing reservations.
///
/// Wraps the load/apply/save cycle for each state transition and writes the
/// matching audit record after the reservation commits.
pub struct ReservationService<R, T> {
    reservations: R,
    transactions: T,
}

impl<R: ReservationRepository, T: TransactionRepository> ReservationService<R, T> {
    pub fn new(reservations: R, transactions: T) -> Self {
        Self {
            reservations,
            transactions,
        }
    }

    pub fn reservations(&self) -> &R {
        &self.reservations
    }

    /// Claims stock for an order.
    #[tracing::instrument(skip(self, ctx, params), fields(sku = %params.sku, order_id = %params.order_id))]
    pub async fn reserve(
        &self,
        ctx: &CallContext,
        params: NewReservation,
    ) -> Result<InventoryReservation> {
        ctx.run(async {
            let mut reservation = InventoryReservation::new(params)?;
            self.reservations.save(&mut reservation).await?;
            self.audit(&reservation, TransactionType::Reserve, -(reservation.quantity() as i64))
                .await;

            tracing::info!(
                reservation_id = reservation.reservation_id(),
                expires_at = %reservation.expires_at(),
                "Reservation created"
            );
            Ok(reservation)
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn stage(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        reservation_id: &str,
        actor: &str,
    ) -> Result<InventoryReservation> {
        ctx.run(async {
            let mut reservation = self.load(scope, reservation_id).await?;
            reservation.mark_staged(actor)?;
            self.reservations.save(&mut reservation).await?;
            self.audit(&reservation, TransactionType::Stage, reservation.quantity() as i64)
                .await;
            Ok(reservation)
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn fulfill(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        reservation_id: &str,
        actor: &str,
    ) -> Result<InventoryReservation> {
        ctx.run(async {
            let mut reservation = self.load(scope, reservation_id).await?;
            reservation.mark_fulfilled(actor)?;
            self.reservations.save(&mut reservation).await?;
            Ok(reservation)
        })
        .await
    }

    /// Releases the claim.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn cancel(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        reservation_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<InventoryReservation> {
        ctx.run(async {
            let mut reservation = self.load(scope, reservation_id).await?;
            reservation.cancel(actor, reason)?;
            self.reservations.save(&mut reservation).await?;
            self.audit(&reservation, TransactionType::Release, reservation.quantity() as i64)
                .await;

            tracing::info!(reservation_id, reason, "Reservation cancelled");
            Ok(reservation)
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn extend(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        reservation_id: &str,
        duration: Duration,
    ) -> Result<InventoryReservation> {
        ctx.run(async {
            let mut reservation = self.load(scope, reservation_id).await?;
            reservation.extend_expiration(duration)?;
            self.reservations.save(&mut reservation).await?;
            Ok(reservation)
        })
        .await
    }

    /// Expires up to `limit` overdue reservations across all tenants.
    ///
    /// Rows changed by someone else since they were read are skipped; the
    /// next sweep picks them up again if they are still overdue. Returns the
    /// number of reservations expired.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn expire_overdue(
        &self,
        ctx: &CallContext,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize> {
        ctx.run(async {
            let overdue = self.reservations.find_expired(as_of, limit).await?;
            let mut expired = 0;
            for mut reservation in overdue {
                if !reservation.mark_expired_at(as_of) {
                    continue;
                }
                match self.reservations.save(&mut reservation).await {
                    Ok(()) => {
                        expired += 1;
                        self.audit(
                            &reservation,
                            TransactionType::Release,
                            reservation.quantity() as i64,
                        )
                        .await;
                    }
                    Err(InventoryError::ConcurrentModification { id, .. }) => {
                        tracing::debug!(reservation_id = %id, "Reservation changed during sweep");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(expired)
        })
        .await
    }

    pub async fn get(
        &self,
        ctx: &CallContext,
        scope: &QueryScope,
        reservation_id: &str,
    ) -> Result<InventoryReservation> {
        ctx.run(self.reservations.find_by_id(scope, reservation_id))
            .await
    }

    pub async fn find_by_sku(
        &self,
        ctx: &CallContext,
        scope: &QueryScope,
        sku: &str,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<InventoryReservation>> {
        ctx.run(self.reservations.find_by_sku(scope, sku, status))
            .await
    }

    pub async fn active_count(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        sku: &str,
    ) -> Result<u64> {
        ctx.run(self.reservations.get_active_reservation_count_by_sku(scope, sku))
            .await
    }

    async fn load(&self, scope: &TenantScope, reservation_id: &str) -> Result<InventoryReservation> {
        self.reservations
            .find_by_id(&QueryScope::Tenant(scope.clone()), reservation_id)
            .await
    }

    async fn audit(
        &self,
        reservation: &InventoryReservation,
        transaction_type: TransactionType,
        quantity_delta: i64,
    ) {
        let transaction = InventoryTransaction::new(
            reservation.tenancy().clone(),
            transaction_type,
            reservation.sku(),
            reservation.location_id(),
            reservation.reservation_id(),
            quantity_delta,
            reservation.updated_by(),
        );
        if let Err(e) = self.transactions.save(transaction).await {
            tracing::warn!(error = %e, "Failed to write inventory transaction");
        }
    }
}
