//! Inventory ledger aggregate, cost layers and journal entries.

mod aggregate;
mod commands;
mod cost_layer;
mod entry;
mod service;

pub use aggregate::{InventoryLedger, LedgerPosting};
pub use commands::{AdjustStock, ConsumeStock, ReceiveStock};
pub use cost_layer::{CostLayer, CostLayers, LayerDraw, ValuationMethod};
pub use entry::{
    AccountBalance, AccountType, LedgerEntry, LedgerTransactionId, ReferenceType, is_balanced,
};
pub use service::LedgerService;

use common::MoneyError;
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Quantity must be greater than zero.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i64 },

    /// Receipts must carry a positive unit cost.
    #[error("Unit cost must be greater than 0")]
    ZeroUnitCost,

    /// Not enough stock on hand; nothing was consumed.
    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: u64,
        available: u64,
    },

    #[error(transparent)]
    Money(#[from] MoneyError),
}
