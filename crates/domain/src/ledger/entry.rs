//! Double-entry journal records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{Money, TenantScope};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Groups the entries of one double-entry transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerTransactionId(String);

impl LedgerTransactionId {
    pub fn new() -> Self {
        Self(format!("LTXN-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LedgerTransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LedgerTransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LedgerTransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LedgerTransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ledger accounts a SKU's movements are posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Inventory,
    GoodsInTransit,
    Cogs,
    Adjustments,
    Returns,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Inventory => "INVENTORY",
            AccountType::GoodsInTransit => "GOODS_IN_TRANSIT",
            AccountType::Cogs => "COGS",
            AccountType::Adjustments => "ADJUSTMENTS",
            AccountType::Returns => "RETURNS",
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a ledger transaction was posted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    PurchaseOrder,
    SalesOrder,
    Shipment,
    Adjustment,
    CycleCount,
    Return,
}

/// One side of a double-entry transaction. Never mutated after creation.
///
/// Both entries of a debit/credit pair carry the ledger's running balance
/// and value after that pair was posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    /// Per-ledger insertion counter; breaks ties between equal timestamps.
    pub sequence: u64,
    pub transaction_id: LedgerTransactionId,
    #[serde(flatten)]
    pub scope: TenantScope,
    pub sku: String,
    pub account_type: AccountType,
    pub debit_amount: u64,
    pub credit_amount: u64,
    pub debit_value: Money,
    pub credit_value: Money,
    pub running_balance: u64,
    pub running_value: Money,
    pub location_id: String,
    pub unit_cost: Money,
    pub reference_id: String,
    pub reference_type: ReferenceType,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl LedgerEntry {
    pub(crate) fn new_entry_id() -> String {
        format!("LE-{}", Uuid::new_v4().simple())
    }

    pub fn is_debit(&self) -> bool {
        self.debit_amount > 0 || self.debit_value.is_positive()
    }

    pub fn is_credit(&self) -> bool {
        self.credit_amount > 0 || self.credit_value.is_positive()
    }
}

/// Net position of one account: debits minus credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub quantity: i64,
    pub value: Money,
}

/// Checks that every transaction among `entries` has equal debit and
/// credit value.
pub fn is_balanced(entries: &[LedgerEntry]) -> bool {
    let mut sums: HashMap<&LedgerTransactionId, (i128, i128)> = HashMap::new();
    for entry in entries {
        let sum = sums.entry(&entry.transaction_id).or_default();
        sum.0 += i128::from(entry.debit_value.amount_minor_units());
        sum.1 += i128::from(entry.credit_value.amount_minor_units());
    }
    sums.values().all(|(debit, credit)| debit == credit)
}
