//! Reservation expiry sweeper.

use std::time::Duration;

use chrono::Utc;
use common::CallContext;
use domain::{ReservationRepository, ReservationService, Result, TransactionRepository};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodically expires active reservations whose `expires_at` has passed.
///
/// Each tick expires up to `batch_size` reservations across all tenants,
/// soonest expiry first. A full batch is followed immediately by another
/// one so a backlog drains without waiting for the next tick. Batches hold at
/// least one reservation.
pub struct ExpirySweeper<R, T> {
    service: ReservationService<R, T>,
    interval: Duration,
    batch_size: usize,
}

impl<R: ReservationRepository, T: TransactionRepository> ExpirySweeper<R, T> {
    pub fn new(service: ReservationService<R, T>, interval: Duration, batch_size: usize) -> Self {
        Self {
            service,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    /// Runs one sweep as of now. Returns the number of reservations expired.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn sweep_once(&self, ctx: &CallContext) -> Result<usize> {
        let mut total = 0;
        loop {
            let expired = self
                .service
                .expire_overdue(ctx, Utc::now(), self.batch_size)
                .await?;
            total += expired;
            if expired < self.batch_size {
                break;
            }
        }

        if total > 0 {
            metrics::counter!("reservations_expired_total").increment(total as u64);
            tracing::info!(expired = total, "expired overdue reservations");
        }
        Ok(total)
    }

    /// Runs the sweep loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "expiry sweeper started"
        );

        let ctx = CallContext::with_token(shutdown.clone());
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.sweep_once(&ctx).await {
                tracing::error!(error = %e, "expiry sweep failed");
            }
        }

        tracing::info!("expiry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use common::{QueryScope, Tenancy};
    use domain::{InventoryReservation, NewReservation, ReservationStatus};
    use store::{InMemoryReservations, InMemoryStore, InMemoryTransactions};

    use super::*;

    fn sweeper(
        store: &InMemoryStore,
        batch_size: usize,
    ) -> ExpirySweeper<InMemoryReservations, InMemoryTransactions> {
        ExpirySweeper::new(
            ReservationService::new(store.reservations(), store.transactions()),
            Duration::from_millis(10),
            batch_size,
        )
    }

    async fn seed(store: &InMemoryStore, id: &str, created_minutes_ago: i64) {
        let params = NewReservation::new(Tenancy::new("T1", "F1", "W1"), "SKU-1", "O-1", "A-01", 1, "clerk")
            .with_id(id)
            .expiring_in(ChronoDuration::minutes(15));
        let mut reservation = InventoryReservation::new_at(
            params,
            Utc::now() - ChronoDuration::minutes(created_minutes_ago),
        )
        .unwrap();
        store.reservations().save(&mut reservation).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_drains_backlog_across_batches() {
        let store = InMemoryStore::new();
        for n in 0..5 {
            seed(&store, &format!("RSV-OLD-{n}"), 20).await;
        }
        seed(&store, "RSV-FRESH", 1).await;

        let expired = sweeper(&store, 2).sweep_once(&CallContext::new()).await.unwrap();
        assert_eq!(expired, 5);

        let fresh = store
            .reservations()
            .find_by_id(&QueryScope::Global, "RSV-FRESH")
            .await
            .unwrap();
        assert_eq!(fresh.status(), ReservationStatus::Active);
    }

    #[tokio::test]
    async fn zero_batch_size_still_drains() {
        let store = InMemoryStore::new();
        seed(&store, "RSV-1", 20).await;
        seed(&store, "RSV-2", 20).await;

        let expired = sweeper(&store, 0).sweep_once(&CallContext::new()).await.unwrap();
        assert_eq!(expired, 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = InMemoryStore::new();
        seed(&store, "RSV-1", 20).await;
        let sweeper = sweeper(&store, 10);
        let shutdown = CancellationToken::new();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        sweeper.run(shutdown).await;

        let swept = store
            .reservations()
            .find_by_id(&QueryScope::Global, "RSV-1")
            .await
            .unwrap();
        assert_eq!(swept.status(), ReservationStatus::Expired);
    }
}
