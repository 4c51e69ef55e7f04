//! Domain error types.

use common::{Interrupted, MoneyError, Version};
use outbox::OutboxError;
use thiserror::Error;

use crate::allocation::AllocationError;
use crate::ledger::LedgerError;
use crate::reservation::ReservationError;

/// Coarse classification an outer transport can map to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    /// Business rule or state conflict (insufficient stock, bad transition,
    /// stale version).
    Conflict,
    BadRequest,
    /// Cancelled, timed out, or the store/broker is unreachable.
    Unavailable,
    Internal,
}

/// Errors returned by aggregates, services and repositories.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Reservation error: {0}")]
    Reservation(#[from] ReservationError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The stored row moved on since the aggregate was loaded.
    #[error(
        "Concurrent modification of {entity} {id}: expected version {expected}, found {actual}"
    )]
    ConcurrentModification {
        entity: &'static str,
        id: String,
        expected: Version,
        actual: Version,
    },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InventoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        InventoryError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        InventoryError::Storage(Box::new(err))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::Ledger(LedgerError::InsufficientStock { .. }) => ErrorKind::Conflict,
            InventoryError::Ledger(_) => ErrorKind::BadRequest,
            InventoryError::Reservation(ReservationError::InvalidQuantity { .. })
            | InventoryError::Allocation(AllocationError::InvalidQuantity { .. })
            | InventoryError::Allocation(AllocationError::ReservationRequired) => {
                ErrorKind::BadRequest
            }
            InventoryError::Reservation(_) | InventoryError::Allocation(_) => ErrorKind::Conflict,
            InventoryError::NotFound { .. } => ErrorKind::NotFound,
            InventoryError::ConcurrentModification { .. } => ErrorKind::Conflict,
            InventoryError::Interrupted(_) => ErrorKind::Unavailable,
            InventoryError::Storage(_) => ErrorKind::Unavailable,
            InventoryError::Outbox(OutboxError::MissingField(_))
            | InventoryError::Outbox(OutboxError::Serialization(_)) => ErrorKind::Internal,
            InventoryError::Outbox(_) => ErrorKind::Unavailable,
            InventoryError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// True when reloading and retrying the whole operation may succeed.
    ///
    /// Business rule failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InventoryError::ConcurrentModification { .. }
                | InventoryError::Storage(_)
                | InventoryError::Interrupted(Interrupted::DeadlineExceeded)
                | InventoryError::Outbox(OutboxError::Database(_))
        )
    }
}

impl From<MoneyError> for InventoryError {
    fn from(e: MoneyError) -> Self {
        InventoryError::Ledger(LedgerError::Money(e))
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
