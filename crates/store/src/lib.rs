//! Storage backends for the inventory aggregates.
//!
//! Two implementations of the `domain` repository traits:
//! - [`InMemoryStore`] for tests and single-process runs
//! - [`PostgresStore`] for production, with JSONB documents and the
//!   transactional outbox written in the same database transaction

pub mod memory;
pub mod postgres;

pub use memory::{
    InMemoryAllocations, InMemoryLedgerEntries, InMemoryLedgers, InMemoryReservations,
    InMemoryStore, InMemoryTransactions,
};
pub use postgres::{
    PgAllocations, PgLedgerEntries, PgLedgers, PgReservations, PgTransactions, PostgresStore,
};

use common::Version;
use domain::{InventoryError, Result};

/// Compares the version an aggregate was loaded at with the stored one.
///
/// A missing row counts as version 0, so new aggregates insert and stale
/// copies of deleted rows are rejected.
pub(crate) fn check_version(
    entity: &'static str,
    id: &str,
    expected: Version,
    stored: Option<Version>,
) -> Result<()> {
    let actual = stored.unwrap_or_else(Version::initial);
    if actual != expected {
        return Err(InventoryError::ConcurrentModification {
            entity,
            id: id.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
