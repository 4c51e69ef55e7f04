//! Inventory ledger aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{Currency, Money, MoneyError, Tenancy, TenantScope, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateRoot;
use crate::events::{
    InventoryAdjustedData, InventoryEvent, InventoryReceivedData, InventoryValuedData,
    LedgerTransactionRecordedData, LowStockAlertData,
};

use super::{
    AccountBalance, AccountType, AdjustStock, ConsumeStock, CostLayer, CostLayers, LayerDraw,
    LedgerEntry, LedgerError, LedgerTransactionId, ReceiveStock, ReferenceType, ValuationMethod,
};

/// Outcome of one ledger mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerPosting {
    pub transaction_id: LedgerTransactionId,
    pub entries: Vec<LedgerEntry>,
    /// Zero for receipts and positive adjustments.
    pub cost_of_goods_sold: Money,
}

/// Costed stock ledger for one SKU within a tenant and facility.
///
/// Owns the cost layer queue and running totals. Every mutation posts a
/// balanced set of journal entries, buffered on the aggregate until the
/// repository saves it together with the raised events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLedger {
    sku: String,
    tenancy: Tenancy,
    valuation_method: ValuationMethod,
    currency: Currency,
    cost_layers: CostLayers,
    current_balance: u64,
    current_value: Money,
    #[serde(default)]
    reorder_point: Option<u64>,
    #[serde(default)]
    account_balances: BTreeMap<AccountType, AccountBalance>,
    next_sequence: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    #[serde(skip)]
    version: Version,
    #[serde(skip)]
    pending_events: Vec<InventoryEvent>,
    #[serde(skip)]
    pending_entries: Vec<LedgerEntry>,
}

impl AggregateRoot for InventoryLedger {
    type Event = InventoryEvent;

    fn aggregate_type() -> &'static str {
        "InventoryLedger"
    }

    fn aggregate_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.tenancy.tenant_id, self.tenancy.facility_id, self.sku
        )
    }

    fn tenancy(&self) -> &Tenancy {
        &self.tenancy
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending_events(&self) -> &[InventoryEvent] {
        &self.pending_events
    }

    fn clear_pending_events(&mut self) {
        self.pending_events.clear();
    }

    fn mark_committed(&mut self) {
        self.pending_events.clear();
        self.pending_entries.clear();
        self.version = self.version.next();
    }
}

// Query methods
impl InventoryLedger {
    pub fn new(
        sku: impl Into<String>,
        tenancy: Tenancy,
        currency: Currency,
        valuation_method: ValuationMethod,
    ) -> Self {
        let now = Utc::now();
        Self {
            sku: sku.into(),
            tenancy,
            valuation_method,
            currency,
            cost_layers: CostLayers::new(),
            current_balance: 0,
            current_value: Money::zero(currency),
            reorder_point: None,
            account_balances: BTreeMap::new(),
            next_sequence: 1,
            created_at: now,
            updated_at: now,
            version: Version::initial(),
            pending_events: Vec::new(),
            pending_entries: Vec::new(),
        }
    }

    /// Raise a low-stock alert whenever a decrease leaves the balance at or
    /// below `reorder_point`.
    pub fn with_reorder_point(mut self, reorder_point: u64) -> Self {
        self.reorder_point = Some(reorder_point);
        self
    }

    pub fn set_reorder_point(&mut self, reorder_point: Option<u64>) {
        self.reorder_point = reorder_point;
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn scope(&self) -> TenantScope {
        self.tenancy.scope()
    }

    pub fn valuation_method(&self) -> ValuationMethod {
        self.valuation_method
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn reorder_point(&self) -> Option<u64> {
        self.reorder_point
    }

    pub fn cost_layers(&self) -> &[CostLayer] {
        self.cost_layers.layers()
    }

    pub fn current_balance(&self) -> u64 {
        self.current_balance
    }

    pub fn current_value(&self) -> Money {
        self.current_value
    }

    /// Units on hand across all layers.
    pub fn total_quantity(&self) -> u64 {
        self.current_balance
    }

    pub fn total_value(&self) -> Money {
        self.current_value
    }

    /// Current value divided by balance, truncated; zero when empty.
    pub fn average_unit_cost(&self) -> Money {
        if self.current_balance == 0 {
            return Money::zero(self.currency);
        }
        self.current_value
            .divide_by(self.current_balance)
            .unwrap_or_else(|_| Money::zero(self.currency))
    }

    /// Net debits minus credits posted to `account` by this ledger.
    pub fn account_balance(&self, account: AccountType) -> AccountBalance {
        self.account_balances
            .get(&account)
            .copied()
            .unwrap_or(AccountBalance {
                quantity: 0,
                value: Money::zero(self.currency),
            })
    }

    /// Journal entries posted since the last save.
    pub fn pending_entries(&self) -> &[LedgerEntry] {
        &self.pending_entries
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Command methods
impl InventoryLedger {
    /// Records received stock as a new cost layer.
    ///
    /// Posts debit Inventory / credit GoodsInTransit for quantity x unit cost.
    pub fn record_receiving(&mut self, cmd: &ReceiveStock) -> Result<LedgerPosting, LedgerError> {
        if cmd.quantity == 0 {
            return Err(LedgerError::InvalidQuantity { quantity: 0 });
        }
        if !cmd.unit_cost.is_positive() {
            return Err(LedgerError::ZeroUnitCost);
        }
        self.ensure_currency(cmd.unit_cost)?;

        let transaction_id = LedgerTransactionId::new();
        let value = cmd.unit_cost.times(cmd.quantity)?;
        let meta = PostingMeta {
            transaction_id: &transaction_id,
            location_id: &cmd.location_id,
            reference_id: &cmd.reference_id,
            reference_type: ReferenceType::PurchaseOrder,
            actor: &cmd.received_by,
            at: cmd.occurred_at,
        };

        let mut draft = self.draft();
        draft.post(
            &meta,
            Movement {
                debit: AccountType::Inventory,
                credit: AccountType::GoodsInTransit,
                quantity: cmd.quantity,
                unit_cost: cmd.unit_cost,
                value,
            },
            format!("Received {} units against {}", cmd.quantity, cmd.reference_id),
        )?;
        let entries = self.commit_draft(draft, cmd.occurred_at);

        if self.valuation_method.uses_layers() {
            self.cost_layers.add_cost_layer(
                cmd.quantity,
                cmd.unit_cost,
                cmd.reference_id.clone(),
                cmd.occurred_at,
            );
        }

        self.raise(InventoryEvent::InventoryReceived(InventoryReceivedData {
            sku: self.sku.clone(),
            scope: self.scope(),
            warehouse_id: self.tenancy.warehouse_id.clone(),
            location_id: cmd.location_id.clone(),
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            total_value: value,
            reference_id: cmd.reference_id.clone(),
            transaction_id: transaction_id.clone(),
            received_by: cmd.received_by.clone(),
            received_at: cmd.occurred_at,
        }));
        self.raise_transaction_recorded(&meta, &entries, None)?;
        self.raise_valued(cmd.occurred_at);

        Ok(LedgerPosting {
            transaction_id,
            entries,
            cost_of_goods_sold: Money::zero(self.currency),
        })
    }

    /// Consumes stock in valuation order and recognises cost of goods sold.
    ///
    /// All or nothing: if fewer than `quantity` units are on hand the ledger
    /// is left untouched. Each layer drawn from yields one debit Cogs /
    /// credit Inventory pair at that layer's unit cost. Zero quantity is a
    /// no-op.
    pub fn record_consumption(&mut self, cmd: &ConsumeStock) -> Result<LedgerPosting, LedgerError> {
        let transaction_id = LedgerTransactionId::new();
        if cmd.quantity == 0 {
            return Ok(LedgerPosting {
                transaction_id,
                entries: Vec::new(),
                cost_of_goods_sold: Money::zero(self.currency),
            });
        }

        let meta = PostingMeta {
            transaction_id: &transaction_id,
            location_id: &cmd.location_id,
            reference_id: &cmd.reference_id,
            reference_type: cmd.reference_type,
            actor: &cmd.consumed_by,
            at: cmd.occurred_at,
        };
        let (entries, cost_of_goods_sold) = self.draw_down(
            &meta,
            cmd.quantity,
            AccountType::Cogs,
            format!("Consumed for {}", cmd.reference_id),
        )?;

        self.raise_transaction_recorded(&meta, &entries, Some(cost_of_goods_sold))?;
        self.raise_valued(cmd.occurred_at);
        self.check_low_stock(&cmd.location_id, cmd.occurred_at);

        Ok(LedgerPosting {
            transaction_id,
            entries,
            cost_of_goods_sold,
        })
    }

    /// Applies a signed correction.
    ///
    /// Positive deltas add a layer at the current average unit cost and post
    /// debit Inventory / credit Adjustments. Negative deltas draw layers like
    /// a consumption but post debit Adjustments / credit Inventory.
    pub fn record_adjustment(&mut self, cmd: &AdjustStock) -> Result<LedgerPosting, LedgerError> {
        if cmd.quantity_delta == 0 {
            return Err(LedgerError::InvalidQuantity { quantity: 0 });
        }

        let transaction_id = LedgerTransactionId::new();
        let meta = PostingMeta {
            transaction_id: &transaction_id,
            location_id: &cmd.location_id,
            reference_id: &cmd.reference_id,
            reference_type: ReferenceType::Adjustment,
            actor: &cmd.adjusted_by,
            at: cmd.occurred_at,
        };
        let description = format!("Adjustment: {}", cmd.reason);
        let quantity = cmd.quantity_delta.unsigned_abs();

        let (entries, value, decreased) = if cmd.quantity_delta > 0 {
            let unit_cost = self.adjustment_unit_cost();
            let value = unit_cost.times(quantity)?;
            let mut draft = self.draft();
            draft.post(
                &meta,
                Movement {
                    debit: AccountType::Inventory,
                    credit: AccountType::Adjustments,
                    quantity,
                    unit_cost,
                    value,
                },
                description,
            )?;
            let entries = self.commit_draft(draft, cmd.occurred_at);
            if self.valuation_method.uses_layers() {
                self.cost_layers.add_cost_layer(
                    quantity,
                    unit_cost,
                    cmd.reference_id.clone(),
                    cmd.occurred_at,
                );
            }
            (entries, value, false)
        } else {
            let (entries, value) =
                self.draw_down(&meta, quantity, AccountType::Adjustments, description)?;
            (entries, value, true)
        };

        self.raise(InventoryEvent::InventoryAdjusted(InventoryAdjustedData {
            sku: self.sku.clone(),
            scope: self.scope(),
            location_id: cmd.location_id.clone(),
            quantity_delta: cmd.quantity_delta,
            value,
            reason: cmd.reason.clone(),
            reference_id: cmd.reference_id.clone(),
            transaction_id: transaction_id.clone(),
            new_balance: self.current_balance,
            adjusted_by: cmd.adjusted_by.clone(),
            adjusted_at: cmd.occurred_at,
        }));
        self.raise_transaction_recorded(&meta, &entries, None)?;
        self.raise_valued(cmd.occurred_at);
        if decreased {
            self.check_low_stock(&cmd.location_id, cmd.occurred_at);
        }

        Ok(LedgerPosting {
            transaction_id,
            entries,
            cost_of_goods_sold: Money::zero(self.currency),
        })
    }
}

// Posting internals
impl InventoryLedger {
    fn ensure_currency(&self, amount: Money) -> Result<(), LedgerError> {
        if amount.currency() != self.currency {
            return Err(common::MoneyError::CurrencyMismatch {
                left: self.currency,
                right: amount.currency(),
            }
            .into());
        }
        Ok(())
    }

    fn adjustment_unit_cost(&self) -> Money {
        if self.current_balance > 0 {
            return self.average_unit_cost();
        }
        self.cost_layers
            .newest()
            .map(|layer| layer.unit_cost)
            .unwrap_or_else(|| Money::zero(self.currency))
    }

    /// Removes `quantity` units, crediting Inventory and debiting `debit`.
    /// Returns the entries and the total value removed.
    fn draw_down(
        &mut self,
        meta: &PostingMeta<'_>,
        quantity: u64,
        debit: AccountType,
        description: String,
    ) -> Result<(Vec<LedgerEntry>, Money), LedgerError> {
        if self.current_balance < quantity {
            return Err(LedgerError::InsufficientStock {
                sku: self.sku.clone(),
                requested: quantity,
                available: self.current_balance,
            });
        }

        let draws: Vec<LayerDraw> = if self.valuation_method.uses_layers() {
            self.cost_layers
                .plan_draw(quantity, self.valuation_method)?
                .ok_or_else(|| LedgerError::InsufficientStock {
                    sku: self.sku.clone(),
                    requested: quantity,
                    available: self.cost_layers.total_quantity(),
                })?
        } else {
            // Taking everything takes the full value so no rounding residue
            // is left behind.
            let value = if quantity == self.current_balance {
                self.current_value
            } else {
                self.current_value.prorate(quantity, self.current_balance)?
            };
            vec![LayerDraw {
                layer_id: String::new(),
                quantity,
                unit_cost: value.divide_by(quantity)?,
                value,
                exhausts_layer: false,
            }]
        };

        let mut draft = self.draft();
        let mut removed = Money::zero(self.currency);
        for draw in &draws {
            draft.post(
                meta,
                Movement {
                    debit,
                    credit: AccountType::Inventory,
                    quantity: draw.quantity,
                    unit_cost: draw.unit_cost,
                    value: draw.value,
                },
                description.clone(),
            )?;
            removed = removed.try_add(draw.value)?;
        }

        let entries = self.commit_draft(draft, meta.at);
        if self.valuation_method.uses_layers() {
            self.cost_layers.apply_draws(&draws);
        }
        Ok((entries, removed))
    }

    fn draft(&self) -> Draft {
        Draft {
            scope: self.scope(),
            sku: self.sku.clone(),
            balance: self.current_balance,
            value: self.current_value,
            sequence: self.next_sequence,
            accounts: self.account_balances.clone(),
            currency: self.currency,
            entries: Vec::new(),
        }
    }

    fn commit_draft(&mut self, draft: Draft, at: DateTime<Utc>) -> Vec<LedgerEntry> {
        self.current_balance = draft.balance;
        self.current_value = draft.value;
        self.next_sequence = draft.sequence;
        self.account_balances = draft.accounts;
        self.updated_at = at;
        self.pending_entries.extend(draft.entries.iter().cloned());
        draft.entries
    }

    fn raise(&mut self, event: InventoryEvent) {
        self.pending_events.push(event);
    }

    fn raise_transaction_recorded(
        &mut self,
        meta: &PostingMeta<'_>,
        entries: &[LedgerEntry],
        cost_of_goods_sold: Option<Money>,
    ) -> Result<(), LedgerError> {
        let zero = Money::zero(self.currency);
        let total_debit = entries
            .iter()
            .try_fold(zero, |acc, e| acc.try_add(e.debit_value))?;
        let total_credit = entries
            .iter()
            .try_fold(zero, |acc, e| acc.try_add(e.credit_value))?;

        self.raise(InventoryEvent::LedgerTransactionRecorded(
            LedgerTransactionRecordedData {
                transaction_id: meta.transaction_id.clone(),
                sku: self.sku.clone(),
                scope: self.scope(),
                reference_id: meta.reference_id.to_string(),
                reference_type: meta.reference_type,
                entry_count: entries.len(),
                total_debit,
                total_credit,
                cost_of_goods_sold,
                running_balance: self.current_balance,
                running_value: self.current_value,
                recorded_at: meta.at,
            },
        ));
        Ok(())
    }

    fn raise_valued(&mut self, at: DateTime<Utc>) {
        self.raise(InventoryEvent::InventoryValued(InventoryValuedData {
            sku: self.sku.clone(),
            scope: self.scope(),
            valuation_method: self.valuation_method,
            total_quantity: self.current_balance,
            total_value: self.current_value,
            average_unit_cost: self.average_unit_cost(),
            cost_layer_count: self.cost_layers.len(),
            valued_at: at,
        }));
    }

    fn check_low_stock(&mut self, location_id: &str, at: DateTime<Utc>) {
        if let Some(reorder_point) = self.reorder_point
            && self.current_balance <= reorder_point
        {
            self.raise(InventoryEvent::LowStockAlert(LowStockAlertData {
                sku: self.sku.clone(),
                scope: self.scope(),
                location_id: location_id.to_string(),
                current_balance: self.current_balance,
                reorder_point,
                detected_at: at,
            }));
        }
    }
}

struct PostingMeta<'a> {
    transaction_id: &'a LedgerTransactionId,
    location_id: &'a str,
    reference_id: &'a str,
    reference_type: ReferenceType,
    actor: &'a str,
    at: DateTime<Utc>,
}

struct Movement {
    debit: AccountType,
    credit: AccountType,
    quantity: u64,
    unit_cost: Money,
    value: Money,
}

/// Scratch totals for a mutation in progress. Nothing reaches the ledger
/// until every pair of the transaction has been posted successfully.
struct Draft {
    scope: TenantScope,
    sku: String,
    balance: u64,
    value: Money,
    sequence: u64,
    accounts: BTreeMap<AccountType, AccountBalance>,
    currency: Currency,
    entries: Vec<LedgerEntry>,
}

impl Draft {
    fn post(
        &mut self,
        meta: &PostingMeta<'_>,
        movement: Movement,
        description: String,
    ) -> Result<(), LedgerError> {
        let signed = i64::try_from(movement.quantity).map_err(|_| MoneyError::Overflow)?;
        if movement.debit == AccountType::Inventory {
            self.balance = self
                .balance
                .checked_add(movement.quantity)
                .ok_or(MoneyError::Overflow)?;
            self.value = self.value.try_add(movement.value)?;
        } else if movement.credit == AccountType::Inventory {
            self.balance = self
                .balance
                .checked_sub(movement.quantity)
                .ok_or(MoneyError::Overflow)?;
            self.value = self.value.try_sub(movement.value)?;
        }

        self.adjust_account(movement.debit, signed, movement.value)?;
        let negated = Money::zero(self.currency).try_sub(movement.value)?;
        self.adjust_account(movement.credit, -signed, negated)?;

        let zero = Money::zero(self.currency);
        for (account, is_debit) in [(movement.debit, true), (movement.credit, false)] {
            self.entries.push(LedgerEntry {
                entry_id: LedgerEntry::new_entry_id(),
                sequence: self.sequence,
                transaction_id: meta.transaction_id.clone(),
                scope: self.scope.clone(),
                sku: self.sku.clone(),
                account_type: account,
                debit_amount: if is_debit { movement.quantity } else { 0 },
                credit_amount: if is_debit { 0 } else { movement.quantity },
                debit_value: if is_debit { movement.value } else { zero },
                credit_value: if is_debit { zero } else { movement.value },
                running_balance: self.balance,
                running_value: self.value,
                location_id: meta.location_id.to_string(),
                unit_cost: movement.unit_cost,
                reference_id: meta.reference_id.to_string(),
                reference_type: meta.reference_type,
                description: description.clone(),
                created_at: meta.at,
                created_by: meta.actor.to_string(),
            });
            self.sequence += 1;
        }
        Ok(())
    }

    fn adjust_account(
        &mut self,
        account: AccountType,
        quantity: i64,
        value: Money,
    ) -> Result<(), LedgerError> {
        let zero = Money::zero(self.currency);
        let balance = self.accounts.entry(account).or_insert(AccountBalance {
            quantity: 0,
            value: zero,
        });
        balance.quantity = balance
            .quantity
            .checked_add(quantity)
            .ok_or(MoneyError::Overflow)?;
        balance.value = balance.value.try_add(value)?;
        Ok(())
    }
}
