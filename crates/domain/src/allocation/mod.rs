//! Allocation aggregate: tracks claimed stock from source to shipment.

mod aggregate;
mod service;
mod state;

pub use aggregate::{InventoryAllocation, NewAllocation};
pub use service::AllocationService;
pub use state::{AllocationStatus, LocationKind};

use thiserror::Error;

/// Errors that can occur during allocation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("Invalid state transition for allocation {allocation_id}: cannot {action} from {current} state")]
    InvalidTransition {
        allocation_id: String,
        current: AllocationStatus,
        action: &'static str,
    },

    #[error("Allocation {allocation_id} is already {status}")]
    AlreadyTerminal {
        allocation_id: String,
        status: AllocationStatus,
    },

    /// Every allocation is taken against a reservation.
    #[error("Reservation ID is required")]
    ReservationRequired,

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u64 },

    /// Allocations against one reservation cannot exceed its quantity.
    #[error("Reservation {reservation_id} has {remaining} units left to allocate, requested {requested}")]
    ExceedsReservation {
        reservation_id: String,
        requested: u64,
        remaining: u64,
    },
}
