//! Shared value types used across the inventory crates.
//!
//! - [`Money`] and [`Currency`]: fixed-point amounts in minor units
//! - [`Tenancy`], [`TenantScope`] and [`QueryScope`]: multi-tenant partitioning
//! - [`Version`]: optimistic concurrency counter for stored aggregates
//! - [`CallContext`]: cancellation and deadlines for async calls

pub mod context;
pub mod money;
pub mod tenancy;
pub mod types;

pub use context::{CallContext, Interrupted};
pub use money::{Currency, Money, MoneyError};
pub use tenancy::{QueryScope, Tenancy, TenantScope};
pub use types::Version;
