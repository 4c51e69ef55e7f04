//! Reservation state machine.

use serde::{Deserialize, Serialize};

/// The state of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Active ──┬──► Staged ──┬──► Fulfilled
///          │             │
///          ├─────────────┴──► Cancelled
///          │
///          └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Stock is claimed and the claim can still expire.
    #[default]
    Active,

    /// Picked stock has been moved to staging.
    Staged,

    /// Shipped (terminal state).
    Fulfilled,

    /// Released on request (terminal state).
    Cancelled,

    /// Released by the sweeper after `expires_at` (terminal state).
    Expired,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 5] = [
        ReservationStatus::Active,
        ReservationStatus::Staged,
        ReservationStatus::Fulfilled,
        ReservationStatus::Cancelled,
        ReservationStatus::Expired,
    ];

    pub fn can_stage(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn can_fulfill(&self) -> bool {
        matches!(self, ReservationStatus::Staged)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, ReservationStatus::Active | ReservationStatus::Staged)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Fulfilled | ReservationStatus::Cancelled | ReservationStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Staged => "staged",
            ReservationStatus::Fulfilled => "fulfilled",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "staged" => Ok(ReservationStatus::Staged),
            "fulfilled" => Ok(ReservationStatus::Fulfilled),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_active() {
        assert_eq!(ReservationStatus::default(), ReservationStatus::Active);
    }

    #[test]
    fn test_only_active_can_stage() {
        assert!(ReservationStatus::Active.can_stage());
        assert!(!ReservationStatus::Staged.can_stage());
        assert!(!ReservationStatus::Fulfilled.can_stage());
        assert!(!ReservationStatus::Cancelled.can_stage());
        assert!(!ReservationStatus::Expired.can_stage());
    }

    #[test]
    fn test_only_staged_can_fulfill() {
        assert!(!ReservationStatus::Active.can_fulfill());
        assert!(ReservationStatus::Staged.can_fulfill());
        assert!(!ReservationStatus::Fulfilled.can_fulfill());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ReservationStatus::Active.is_terminal());
        assert!(!ReservationStatus::Staged.is_terminal());
        assert!(ReservationStatus::Fulfilled.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn test_wire_names_roundtrip() {
        for status in [
            ReservationStatus::Active,
            ReservationStatus::Staged,
            ReservationStatus::Fulfilled,
            ReservationStatus::Cancelled,
            ReservationStatus::Expired,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
    }
}
