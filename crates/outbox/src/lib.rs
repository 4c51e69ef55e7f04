//! Transactional outbox.
//!
//! Aggregate repositories write [`OutboxEvent`] rows in the same storage
//! transaction as the state change they describe. The [`Publisher`] relays
//! unpublished rows to a [`MessageBroker`] with at-least-once delivery and
//! bounded retries.

pub mod broker;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod store;

pub use broker::{InMemoryBroker, MessageBroker};
#[cfg(feature = "redis")]
pub use broker::RedisStreamBroker;
pub use error::{OutboxError, Result};
pub use event::{CloudEvent, OutboxEvent, OutboxEventBuilder, OutboxEventId};
pub use memory::{InMemoryOutbox, OutboxBatch};
pub use postgres::PostgresOutbox;
pub use publisher::{Publisher, PublisherConfig, PublisherStats};
pub use store::OutboxRepository;

/// Topic all inventory events are published to.
pub const INVENTORY_TOPIC: &str = "wms.inventory.events";
