//! Domain layer for the warehouse inventory core.
//!
//! This crate provides:
//! - `AggregateRoot` and `DomainEvent` traits for state-stored aggregates
//!   that buffer events for the transactional outbox
//! - The inventory ledger aggregate with cost layers and a double-entry
//!   journal
//! - Reservation and allocation aggregates with their state machines
//! - The inventory transaction audit record
//! - Repository contracts and the services that drive them

pub mod aggregate;
pub mod allocation;
pub mod error;
pub mod events;
pub mod ledger;
pub mod repository;
pub mod reservation;
pub mod transaction;

pub use aggregate::{AggregateRoot, DomainEvent};
pub use allocation::{
    AllocationError, AllocationService, AllocationStatus, InventoryAllocation, LocationKind,
    NewAllocation,
};
pub use error::{ErrorKind, InventoryError, Result};
pub use events::InventoryEvent;
pub use ledger::{
    AccountBalance, AccountType, AdjustStock, ConsumeStock, CostLayer, CostLayers,
    InventoryLedger, LedgerEntry, LedgerError, LedgerPosting, LedgerService, LedgerTransactionId,
    ReceiveStock, ReferenceType, ValuationMethod,
};
pub use repository::{
    AllocationRepository, Balance, LedgerEntryRepository, LedgerRepository,
    ReservationRepository, TransactionRepository,
};
pub use reservation::{
    DEFAULT_RESERVATION_TTL_MINUTES, InventoryReservation, NewReservation, ReservationError,
    ReservationService, ReservationStatus,
};
pub use transaction::{InventoryTransaction, TransactionType};
