//! Aggregate root and domain event traits.

use chrono::{DateTime, Utc};
use common::{Tenancy, Version};
use outbox::{INVENTORY_TOPIC, OutboxEvent};
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are facts produced by aggregate methods. They are buffered
/// on the aggregate and turned into outbox rows when the aggregate is saved.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Wire event type, e.g. `wms.inventory.received`.
    fn event_type(&self) -> &'static str;

    fn occurred_at(&self) -> DateTime<Utc>;

    /// The event body without the enum tag, used as CloudEvent `data`.
    fn data(&self) -> serde_json::Result<serde_json::Value>;
}

/// A state-stored aggregate that buffers the events it raises.
///
/// Repositories persist the aggregate and its pending events in one storage
/// transaction, then call [`AggregateRoot::mark_committed`]. On failure the
/// pending events stay on the aggregate so the caller can retry.
pub trait AggregateRoot: Send + Sync + Sized {
    type Event: DomainEvent;

    fn aggregate_type() -> &'static str;

    /// Natural key of the aggregate.
    fn aggregate_id(&self) -> String;

    fn tenancy(&self) -> &Tenancy;

    /// Version the aggregate was loaded at (0 if never saved).
    fn version(&self) -> Version;

    /// Restores the stored version after loading.
    fn set_version(&mut self, version: Version);

    fn pending_events(&self) -> &[Self::Event];

    fn clear_pending_events(&mut self);

    /// Clears pending events and advances the version after a commit.
    fn mark_committed(&mut self) {
        self.clear_pending_events();
        let next = self.version().next();
        self.set_version(next);
    }

    /// Translates pending events into outbox rows.
    fn outbox_events(&self) -> outbox::Result<Vec<OutboxEvent>> {
        let tenancy = self.tenancy();
        let aggregate_id = self.aggregate_id();
        self.pending_events()
            .iter()
            .map(|event| {
                OutboxEvent::builder()
                    .aggregate_id(aggregate_id.clone())
                    .aggregate_type(Self::aggregate_type())
                    .event_type(event.event_type())
                    .topic(INVENTORY_TOPIC)
                    .occurred_at(event.occurred_at())
                    .tenant(tenancy.tenant_id.clone(), tenancy.facility_id.clone())
                    .data_raw(event.data()?)
                    .build()
            })
            .collect()
    }
}
