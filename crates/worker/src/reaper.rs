//! Retention reaper for closed reservations, allocations and old audit rows.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::CallContext;
use domain::{AllocationRepository, ReservationRepository, Result, TransactionRepository};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// How long rows are kept after they stop changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Terminal reservations, measured from their last update.
    pub reservations: chrono::Duration,
    /// Shipped and returned allocations, measured from their last update.
    pub allocations: chrono::Duration,
    /// Audit log rows, measured from creation.
    pub transactions: chrono::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            reservations: chrono::Duration::days(30),
            allocations: chrono::Duration::days(30),
            transactions: chrono::Duration::days(90),
        }
    }
}

/// Rows deleted by one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub reservations: u64,
    pub allocations: u64,
    pub transactions: u64,
}

impl ReapStats {
    pub fn total(&self) -> u64 {
        self.reservations + self.allocations + self.transactions
    }
}

pub struct RetentionReaper<R, A, T> {
    reservations: R,
    allocations: A,
    transactions: T,
    policy: RetentionPolicy,
    interval: Duration,
}

impl<R, A, T> RetentionReaper<R, A, T>
where
    R: ReservationRepository,
    A: AllocationRepository,
    T: TransactionRepository,
{
    pub fn new(reservations: R, allocations: A, transactions: T, interval: Duration) -> Self {
        Self {
            reservations,
            allocations,
            transactions,
            policy: RetentionPolicy::default(),
            interval,
        }
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Deletes everything past its retention window as of `now`.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn reap_once(&self, ctx: &CallContext, now: DateTime<Utc>) -> Result<ReapStats> {
        let stats = ReapStats {
            reservations: ctx
                .run(
                    self.reservations
                        .purge_terminal(now - self.policy.reservations),
                )
                .await?,
            allocations: ctx
                .run(self.allocations.purge_terminal(now - self.policy.allocations))
                .await?,
            transactions: ctx
                .run(
                    self.transactions
                        .purge_older_than(now - self.policy.transactions),
                )
                .await?,
        };

        for (table, deleted) in [
            ("inventory_reservations", stats.reservations),
            ("inventory_allocations", stats.allocations),
            ("inventory_transactions", stats.transactions),
        ] {
            if deleted > 0 {
                metrics::counter!("retention_rows_deleted_total", "table" => table)
                    .increment(deleted);
            }
        }
        if stats.total() > 0 {
            tracing::info!(
                reservations = stats.reservations,
                allocations = stats.allocations,
                transactions = stats.transactions,
                "retention reaper deleted rows"
            );
        }
        Ok(stats)
    }

    /// Runs the reaper loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "retention reaper started"
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

            if let Err(e) = self.reap_once(&ctx, Utc::now()).await {
                tracing::error!(error = %e, "retention reaper failed");
            }
        }

        tracing::info!("retention reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use common::{QueryScope, Tenancy};
    use domain::{
        InventoryAllocation, InventoryReservation, InventoryTransaction, NewAllocation,
        NewReservation, TransactionType,
    };
    use store::{InMemoryAllocations, InMemoryReservations, InMemoryStore, InMemoryTransactions};

    use super::*;

    fn tenancy() -> Tenancy {
        Tenancy::new("T1", "F1", "W1")
    }

    fn reaper(
        store: &InMemoryStore,
    ) -> RetentionReaper<InMemoryReservations, InMemoryAllocations, InMemoryTransactions> {
        RetentionReaper::new(
            store.reservations(),
            store.allocations(),
            store.transactions(),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn reaps_only_rows_past_their_window() {
        let store = InMemoryStore::new();

        let mut cancelled = InventoryReservation::new(
            NewReservation::new(tenancy(), "SKU-1", "O-1", "A-01", 1, "clerk").with_id("RSV-1"),
        )
        .unwrap();
        cancelled.cancel("clerk", "customer request").unwrap();
        store.reservations().save(&mut cancelled).await.unwrap();

        let mut live = InventoryReservation::new(
            NewReservation::new(tenancy(), "SKU-1", "O-2", "A-01", 1, "clerk").with_id("RSV-2"),
        )
        .unwrap();
        store.reservations().save(&mut live).await.unwrap();

        let mut returned = InventoryAllocation::new(NewAllocation::new(
            tenancy(),
            "SKU-1",
            "RSV-1",
            "O-1",
            1,
            "A-01",
            "STG-1",
            "picker",
        ))
        .unwrap();
        returned.mark_returned("clerk", "damaged").unwrap();
        store.allocations().save(&mut returned).await.unwrap();

        store
            .transactions()
            .save(
                InventoryTransaction::new(
                    tenancy(),
                    TransactionType::Receive,
                    "SKU-1",
                    "DOCK-1",
                    "PO-1",
                    5,
                    "rx",
                )
                .at(Utc::now() - chrono::Duration::days(40)),
            )
            .await
            .unwrap();

        let ctx = CallContext::new();
        let reaper = reaper(&store);

        // Nothing has aged out yet.
        assert_eq!(reaper.reap_once(&ctx, Utc::now()).await.unwrap().total(), 0);

        let later = Utc::now() + chrono::Duration::days(31);
        let stats = reaper.reap_once(&ctx, later).await.unwrap();
        assert_eq!(
            stats,
            ReapStats {
                reservations: 1,
                allocations: 1,
                transactions: 0,
            }
        );
        assert!(
            store
                .reservations()
                .find_by_id(&QueryScope::Global, "RSV-2")
                .await
                .is_ok()
        );

        let much_later = Utc::now() + chrono::Duration::days(60);
        let stats = reaper.reap_once(&ctx, much_later).await.unwrap();
        assert_eq!(stats.transactions, 1);
    }

    #[tokio::test]
    async fn cancelled_context_stops_reaping() {
        let store = InMemoryStore::new();
        let ctx = CallContext::new();
        ctx.cancel();

        let err = reaper(&store).reap_once(&ctx, Utc::now()).await.unwrap_err();
        assert!(matches!(err, domain::InventoryError::Interrupted(_)));
    }
}
