use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OutboxError, Result};

/// Unique identifier for an outbox row.
///
/// Also used as the CloudEvent `id`, so consumers can de-duplicate
/// redeliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEventId(Uuid);

impl OutboxEventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OutboxEventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// CloudEvents 1.0 JSON envelope carried by every outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub subject: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenantid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilityid: Option<String>,
}

/// A pending or delivered event in the transactional outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub topic: String,
    pub payload: CloudEvent,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    pub fn builder() -> OutboxEventBuilder {
        OutboxEventBuilder::default()
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// True once the row has failed `max_retries` times and is no longer polled.
    pub fn is_dead_letter(&self, max_retries: i32) -> bool {
        self.published_at.is_none() && self.retry_count >= max_retries
    }
}

/// Builder for outbox rows. Produces the CloudEvent envelope as part of
/// the row so both always agree on id, type and time.
#[derive(Debug)]
pub struct OutboxEventBuilder {
    id: Option<OutboxEventId>,
    aggregate_id: Option<String>,
    aggregate_type: Option<String>,
    event_type: Option<String>,
    topic: Option<String>,
    source: String,
    occurred_at: Option<DateTime<Utc>>,
    data: Option<serde_json::Value>,
    tenant_id: Option<String>,
    facility_id: Option<String>,
}

impl Default for OutboxEventBuilder {
    fn default() -> Self {
        Self {
            id: None,
            aggregate_id: None,
            aggregate_type: None,
            event_type: None,
            topic: None,
            source: "/wms/inventory".to_string(),
            occurred_at: None,
            data: None,
            tenant_id: None,
            facility_id: None,
        }
    }
}

impl OutboxEventBuilder {
    pub fn id(mut self, id: OutboxEventId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn aggregate_id(mut self, id: impl Into<String>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Wire event type, e.g. `wms.inventory.received`.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// CloudEvent `source`. Defaults to `/wms/inventory`.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// When the domain event happened. Defaults to now.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>, facility_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self.facility_id = Some(facility_id.into());
        self
    }

    pub fn data<T: Serialize>(mut self, data: &T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    pub fn data_raw(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Builds the row, failing with [`OutboxError::MissingField`] if a
    /// required field was not set.
    pub fn build(self) -> Result<OutboxEvent> {
        let id = self.id.unwrap_or_default();
        let aggregate_id = self
            .aggregate_id
            .ok_or(OutboxError::MissingField("aggregate_id"))?;
        let aggregate_type = self
            .aggregate_type
            .ok_or(OutboxError::MissingField("aggregate_type"))?;
        let event_type = self
            .event_type
            .ok_or(OutboxError::MissingField("event_type"))?;
        let topic = self.topic.ok_or(OutboxError::MissingField("topic"))?;
        let data = self.data.ok_or(OutboxError::MissingField("data"))?;
        let time = self.occurred_at.unwrap_or_else(Utc::now);

        let payload = CloudEvent {
            specversion: "1.0".to_string(),
            id: id.to_string(),
            event_type: event_type.clone(),
            source: self.source,
            subject: aggregate_id.clone(),
            time,
            datacontenttype: "application/json".to_string(),
            data,
            tenantid: self.tenant_id,
            facilityid: self.facility_id,
        };

        Ok(OutboxEvent {
            id,
            aggregate_id,
            aggregate_type,
            event_type,
            topic,
            payload,
            created_at: Utc::now(),
            published_at: None,
            retry_count: 0,
            last_error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutboxEventBuilder {
        OutboxEvent::builder()
            .aggregate_id("T1:F1:SKU-1")
            .aggregate_type("InventoryLedger")
            .event_type("wms.inventory.received")
            .topic(crate::INVENTORY_TOPIC)
            .tenant("T1", "F1")
            .data_raw(serde_json::json!({"sku": "SKU-1", "quantity": 10}))
    }

    #[test]
    fn builder_produces_matching_cloud_event() {
        let event = sample().build().unwrap();

        assert_eq!(event.payload.specversion, "1.0");
        assert_eq!(event.payload.id, event.id.to_string());
        assert_eq!(event.payload.event_type, "wms.inventory.received");
        assert_eq!(event.payload.subject, "T1:F1:SKU-1");
        assert_eq!(event.payload.tenantid.as_deref(), Some("T1"));
        assert_eq!(event.payload.datacontenttype, "application/json");
        assert!(!event.is_published());
        assert_eq!(event.retry_count, 0);
    }

    #[test]
    fn cloud_event_serializes_type_field() {
        let event = sample().build().unwrap();
        let json = serde_json::to_value(&event.payload).unwrap();
        assert_eq!(json["type"], "wms.inventory.received");
        assert_eq!(json["source"], "/wms/inventory");
        assert_eq!(json["data"]["quantity"], 10);
    }

    #[test]
    fn missing_field_is_reported() {
        let err = OutboxEvent::builder()
            .aggregate_id("x")
            .aggregate_type("y")
            .event_type("z")
            .data_raw(serde_json::json!({}))
            .build()
            .unwrap_err();
        assert!(matches!(err, OutboxError::MissingField("topic")));
    }

    #[test]
    fn dead_letter_after_max_retries() {
        let mut event = sample().build().unwrap();
        event.retry_count = 10;
        assert!(event.is_dead_letter(10));
        event.published_at = Some(Utc::now());
        assert!(!event.is_dead_letter(10));
    }
}
