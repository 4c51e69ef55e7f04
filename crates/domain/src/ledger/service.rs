//! Ledger service: load, mutate and save ledgers, then audit the movement.

use common::{CallContext, TenantScope};

use crate::aggregate::AggregateRoot;
use crate::error::{InventoryError, Result};
use crate::repository::{LedgerRepository, TransactionRepository};
use crate::transaction::{InventoryTransaction, TransactionType};

use super::{
    AdjustStock, ConsumeStock, InventoryLedger, LedgerPosting, ReceiveStock, ReferenceType,
    ValuationMethod,
};

/// Service for posting stock movements to inventory ledgers.
///
/// Each operation loads the ledger, applies the command and saves the ledger
/// with its entries and outbox rows in one storage transaction. The audit
/// record is written after that commit.
pub struct LedgerService<L, T> {
    ledgers: L,
    transactions: T,
    valuation_method: ValuationMethod,
}

impl<L: LedgerRepository, T: TransactionRepository> LedgerService<L, T> {
    pub fn new(ledgers: L, transactions: T) -> Self {
        Self {
            ledgers,
            transactions,
            valuation_method: ValuationMethod::default(),
        }
    }

    /// Valuation method for ledgers created by a first receipt.
    pub fn with_valuation_method(mut self, valuation_method: ValuationMethod) -> Self {
        self.valuation_method = valuation_method;
        self
    }

    pub fn ledgers(&self) -> &L {
        &self.ledgers
    }

    /// Receives stock, creating the ledger on the first receipt for a SKU.
    #[tracing::instrument(skip(self, ctx, cmd), fields(sku = %cmd.sku, quantity = cmd.quantity))]
    pub async fn receive(&self, ctx: &CallContext, cmd: ReceiveStock) -> Result<LedgerPosting> {
        ctx.run(async {
            let scope = cmd.tenancy.scope();
            let mut ledger = match self.ledgers.find_by_sku(&scope, &cmd.sku).await {
                Ok(ledger) => ledger,
                Err(InventoryError::NotFound { .. }) => InventoryLedger::new(
                    cmd.sku.clone(),
                    cmd.tenancy.clone(),
                    cmd.unit_cost.currency(),
                    self.valuation_method,
                ),
                Err(e) => return Err(e),
            };

            let posting = ledger.record_receiving(&cmd)?;
            self.ledgers.save(&mut ledger).await?;
            metrics::counter!("ledger_postings_total", "kind" => "receive").increment(1);

            self.audit(
                InventoryTransaction::new(
                    cmd.tenancy.clone(),
                    TransactionType::Receive,
                    cmd.sku.clone(),
                    cmd.location_id.clone(),
                    cmd.reference_id.clone(),
                    cmd.quantity as i64,
                    cmd.received_by.clone(),
                )
                .at(cmd.occurred_at),
            )
            .await;

            tracing::info!(
                transaction_id = %posting.transaction_id,
                balance = ledger.current_balance(),
                "Stock received"
            );
            Ok(posting)
        })
        .await
    }

    /// Consumes stock and recognises cost of goods sold.
    #[tracing::instrument(skip(self, ctx, cmd), fields(sku = %cmd.sku, quantity = cmd.quantity))]
    pub async fn consume(&self, ctx: &CallContext, cmd: ConsumeStock) -> Result<LedgerPosting> {
        ctx.run(async {
            let mut ledger = self.ledgers.find_by_sku(&cmd.scope, &cmd.sku).await?;
            let posting = ledger.record_consumption(&cmd)?;
            if posting.entries.is_empty() {
                return Ok(posting);
            }
            self.ledgers.save(&mut ledger).await?;
            metrics::counter!("ledger_postings_total", "kind" => "consume").increment(1);

            let transaction_type = match cmd.reference_type {
                ReferenceType::Shipment => TransactionType::Ship,
                _ => TransactionType::Pick,
            };
            self.audit(
                InventoryTransaction::new(
                    ledger.tenancy().clone(),
                    transaction_type,
                    cmd.sku.clone(),
                    cmd.location_id.clone(),
                    cmd.reference_id.clone(),
                    -(cmd.quantity as i64),
                    cmd.consumed_by.clone(),
                )
                .at(cmd.occurred_at),
            )
            .await;

            tracing::info!(
                transaction_id = %posting.transaction_id,
                cogs = %posting.cost_of_goods_sold,
                balance = ledger.current_balance(),
                "Stock consumed"
            );
            Ok(posting)
        })
        .await
    }

    /// Applies a signed stock correction.
    #[tracing::instrument(skip(self, ctx, cmd), fields(sku = %cmd.sku, delta = cmd.quantity_delta))]
    pub async fn adjust(&self, ctx: &CallContext, cmd: AdjustStock) -> Result<LedgerPosting> {
        ctx.run(async {
            let mut ledger = self.ledgers.find_by_sku(&cmd.scope, &cmd.sku).await?;
            let posting = ledger.record_adjustment(&cmd)?;
            self.ledgers.save(&mut ledger).await?;
            metrics::counter!("ledger_postings_total", "kind" => "adjust").increment(1);

            self.audit(
                InventoryTransaction::new(
                    ledger.tenancy().clone(),
                    TransactionType::Adjust,
                    cmd.sku.clone(),
                    cmd.location_id.clone(),
                    cmd.reference_id.clone(),
                    cmd.quantity_delta,
                    cmd.adjusted_by.clone(),
                )
                .at(cmd.occurred_at),
            )
            .await;

            tracing::info!(
                transaction_id = %posting.transaction_id,
                reason = %cmd.reason,
                balance = ledger.current_balance(),
                "Stock adjusted"
            );
            Ok(posting)
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn get_ledger(
        &self,
        ctx: &CallContext,
        scope: &TenantScope,
        sku: &str,
    ) -> Result<InventoryLedger> {
        ctx.run(self.ledgers.find_by_sku(scope, sku)).await
    }

    /// The audit log is best effort: the ledger has already committed, so a
    /// failure here is logged rather than returned.
    async fn audit(&self, transaction: InventoryTransaction) {
        if let Err(e) = self.transactions.save(transaction).await {
            tracing::warn!(error = %e, "Failed to write inventory transaction");
        }
    }
}
