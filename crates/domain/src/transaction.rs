//! Append-only audit log of stock movements.

use chrono::{DateTime, Utc};
use common::{Tenancy, TenantScope};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of stock movement being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Receive,
    Pick,
    Adjust,
    Reserve,
    Release,
    Stage,
    Ship,
    Return,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Receive => "receive",
            TransactionType::Pick => "pick",
            TransactionType::Adjust => "adjust",
            TransactionType::Reserve => "reserve",
            TransactionType::Release => "release",
            TransactionType::Stage => "stage",
            TransactionType::Ship => "ship",
            TransactionType::Return => "return",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receive" => Ok(TransactionType::Receive),
            "pick" => Ok(TransactionType::Pick),
            "adjust" => Ok(TransactionType::Adjust),
            "reserve" => Ok(TransactionType::Reserve),
            "release" => Ok(TransactionType::Release),
            "stage" => Ok(TransactionType::Stage),
            "ship" => Ok(TransactionType::Ship),
            "return" => Ok(TransactionType::Return),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// One audited stock movement. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub transaction_id: String,
    pub tenancy: Tenancy,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub sku: String,
    pub location_id: String,
    /// PO, order, reservation or allocation the movement belongs to.
    pub reference_id: String,
    /// Signed: receipts are positive, picks negative.
    pub quantity_delta: i64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl InventoryTransaction {
    pub fn new(
        tenancy: Tenancy,
        transaction_type: TransactionType,
        sku: impl Into<String>,
        location_id: impl Into<String>,
        reference_id: impl Into<String>,
        quantity_delta: i64,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: format!("TXN-{}", Uuid::new_v4().simple()),
            tenancy,
            transaction_type,
            sku: sku.into(),
            location_id: location_id.into(),
            reference_id: reference_id.into(),
            quantity_delta,
            created_at: Utc::now(),
            created_by: created_by.into(),
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn scope(&self) -> TenantScope {
        self.tenancy.scope()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction() {
        let txn = InventoryTransaction::new(
            Tenancy::new("T1", "F1", "W1"),
            TransactionType::Pick,
            "SKU-1",
            "A-01",
            "O-1",
            -4,
            "picker",
        );
        assert!(txn.transaction_id.starts_with("TXN-"));
        assert_eq!(txn.scope(), TenantScope::new("T1", "F1"));

        let json = serde_json::to_value(&txn).unwrap();
        assert_eq!(json["type"], "pick");
        assert_eq!(json["quantity_delta"], -4);
    }

    #[test]
    fn test_type_names_roundtrip() {
        for t in [
            TransactionType::Receive,
            TransactionType::Pick,
            TransactionType::Adjust,
            TransactionType::Reserve,
            TransactionType::Release,
            TransactionType::Stage,
            TransactionType::Ship,
            TransactionType::Return,
        ] {
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
        }
    }
}
