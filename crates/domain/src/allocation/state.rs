//! Allocation state machine.

use serde::{Deserialize, Serialize};

/// The state of an allocation as stock moves through the building.
///
/// State transitions:
/// ```text
/// Staged ──► Packed ──► Shipped
///    │          │          │
///    └──────────┴──────────┴──► Returned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Picked from the source location into staging.
    #[default]
    Staged,

    Packed,

    /// Left the building. Can still come back as a return.
    Shipped,

    /// Terminal state.
    Returned,
}

impl AllocationStatus {
    pub const ALL: [AllocationStatus; 4] = [
        AllocationStatus::Staged,
        AllocationStatus::Packed,
        AllocationStatus::Shipped,
        AllocationStatus::Returned,
    ];

    pub fn can_pack(&self) -> bool {
        matches!(self, AllocationStatus::Staged)
    }

    pub fn can_ship(&self) -> bool {
        matches!(self, AllocationStatus::Packed)
    }

    pub fn can_return(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, AllocationStatus::Returned)
    }

    /// Still holding stock inside the building.
    pub fn is_active(&self) -> bool {
        matches!(self, AllocationStatus::Staged | AllocationStatus::Packed)
    }

    /// Eligible for archival once past the retention window.
    pub fn is_closed(&self) -> bool {
        matches!(self, AllocationStatus::Shipped | AllocationStatus::Returned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Staged => "staged",
            AllocationStatus::Packed => "packed",
            AllocationStatus::Shipped => "shipped",
            AllocationStatus::Returned => "returned",
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staged" => Ok(AllocationStatus::Staged),
            "packed" => Ok(AllocationStatus::Packed),
            "shipped" => Ok(AllocationStatus::Shipped),
            "returned" => Ok(AllocationStatus::Returned),
            other => Err(format!("unknown allocation status: {other}")),
        }
    }
}

/// Which location column an allocation query matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    Source,
    Staging,
    /// Either column.
    Any,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(AllocationStatus::Staged.can_pack());
        assert!(!AllocationStatus::Packed.can_pack());
        assert!(AllocationStatus::Packed.can_ship());
        assert!(!AllocationStatus::Staged.can_ship());
        assert!(!AllocationStatus::Shipped.can_ship());
    }

    #[test]
    fn test_return_reachable_until_terminal() {
        assert!(AllocationStatus::Staged.can_return());
        assert!(AllocationStatus::Packed.can_return());
        assert!(AllocationStatus::Shipped.can_return());
        assert!(!AllocationStatus::Returned.can_return());
    }

    #[test]
    fn test_active_and_closed_partition() {
        for status in [
            AllocationStatus::Staged,
            AllocationStatus::Packed,
            AllocationStatus::Shipped,
            AllocationStatus::Returned,
        ] {
            assert_ne!(status.is_active(), status.is_closed());
            assert_eq!(status.as_str().parse::<AllocationStatus>().unwrap(), status);
        }
    }
}
