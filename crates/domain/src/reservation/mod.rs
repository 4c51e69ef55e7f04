//! Reservation aggregate: an expiring claim on stock for an order.

mod aggregate;
mod service;
mod state;

pub use aggregate::{DEFAULT_RESERVATION_TTL_MINUTES, InventoryReservation, NewReservation};
pub use service::ReservationService;
pub use state::ReservationStatus;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during reservation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    /// Reservation is not in a state that allows the action.
    #[error("Invalid state transition for reservation {reservation_id}: cannot {action} from {current} state")]
    InvalidTransition {
        reservation_id: String,
        current: ReservationStatus,
        action: &'static str,
    },

    #[error("Reservation {reservation_id} is already {status}")]
    AlreadyTerminal {
        reservation_id: String,
        status: ReservationStatus,
    },

    /// Active but past its expiry; the sweeper has not caught it yet.
    #[error("Reservation {reservation_id} expired at {expires_at}")]
    Expired {
        reservation_id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u64 },
}
