use serde::{Deserialize, Serialize};

/// Stored version of an aggregate, used for optimistic concurrency control.
///
/// A freshly constructed aggregate is at version 0. Every successful save
/// moves the stored row to the next version, so a writer holding a stale copy
/// can be detected by comparing versions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of an aggregate that has never been saved.
    pub fn initial() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_version_is_zero() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert!(Version::initial().is_initial());
        assert!(!Version::new(3).is_initial());
    }

    #[test]
    fn next_increments_by_one() {
        let v = Version::new(4);
        assert_eq!(v.next(), Version::new(5));
        assert!(v < v.next());
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&Version::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Version::new(7));
    }
}
