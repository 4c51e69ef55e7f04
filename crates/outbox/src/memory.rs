use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::{OutboxError, OutboxEvent, OutboxEventId, Result, store::OutboxRepository};

/// In-memory outbox for tests and single-process runs.
///
/// Rows are kept in insertion order, which is the order the publisher
/// relays them in.
#[derive(Clone, Default)]
pub struct InMemoryOutbox {
    events: Arc<RwLock<Vec<OutboxEvent>>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows, published or not.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Snapshot of every row in insertion order.
    pub async fn all(&self) -> Vec<OutboxEvent> {
        self.events.read().await.clone()
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }

    /// Opens a write batch holding the outbox lock.
    ///
    /// Staged rows become visible only on [`OutboxBatch::commit`]; dropping
    /// the batch discards them. Callers that also mutate other state take
    /// that lock first and commit both without awaiting in between.
    pub async fn begin(&self) -> OutboxBatch<'_> {
        OutboxBatch {
            guard: self.events.write().await,
            staged: Vec::new(),
        }
    }
}

/// Pending rows written under the outbox lock.
pub struct OutboxBatch<'a> {
    guard: RwLockWriteGuard<'a, Vec<OutboxEvent>>,
    staged: Vec<OutboxEvent>,
}

impl OutboxBatch<'_> {
    pub fn stage(&mut self, events: impl IntoIterator<Item = OutboxEvent>) {
        self.staged.extend(events);
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub fn commit(mut self) {
        let staged = std::mem::take(&mut self.staged);
        self.guard.extend(staged);
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutbox {
    async fn save(&self, event: OutboxEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn save_all(&self, events: Vec<OutboxEvent>) -> Result<()> {
        let mut batch = self.begin().await;
        batch.stage(events);
        batch.commit();
        Ok(())
    }

    async fn find_unpublished(&self, limit: usize, max_retries: i32) -> Result<Vec<OutboxEvent>> {
        let store = self.events.read().await;
        Ok(store
            .iter()
            .filter(|e| e.published_at.is_none() && e.retry_count < max_retries)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: OutboxEventId) -> Result<()> {
        let mut store = self.events.write().await;
        let event = store
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        event.published_at = Some(Utc::now());
        Ok(())
    }

    async fn increment_retry(&self, id: OutboxEventId, error: &str) -> Result<()> {
        let mut store = self.events.write().await;
        let event = store
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        event.retry_count += 1;
        event.last_error = Some(error.to_string());
        Ok(())
    }

    async fn delete_published(&self, older_than_secs: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(older_than_secs);
        let mut store = self.events.write().await;
        let before = store.len();
        store.retain(|e| match e.published_at {
            Some(published_at) => published_at >= cutoff,
            None => true,
        });
        Ok((before - store.len()) as u64)
    }

    async fn get_by_id(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>> {
        let store = self.events.read().await;
        Ok(store.iter().find(|e| e.id == id).cloned())
    }

    async fn find_by_aggregate_id(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>> {
        let store = self.events.read().await;
        Ok(store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn find_dead_letters(&self, limit: usize, max_retries: i32) -> Result<Vec<OutboxEvent>> {
        let store = self.events.read().await;
        Ok(store
            .iter()
            .filter(|e| e.is_dead_letter(max_retries))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_unpublished(&self, max_retries: i32) -> Result<u64> {
        let store = self.events.read().await;
        Ok(store
            .iter()
            .filter(|e| e.published_at.is_none() && e.retry_count < max_retries)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(aggregate_id: &str, event_type: &str) -> OutboxEvent {
        OutboxEvent::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("InventoryLedger")
            .event_type(event_type)
            .topic(crate::INVENTORY_TOPIC)
            .data_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn unpublished_rows_come_back_in_insertion_order() {
        let outbox = InMemoryOutbox::new();
        let a = create_test_event("agg-1", "wms.inventory.received");
        let b = create_test_event("agg-2", "wms.inventory.adjusted");
        let c = create_test_event("agg-1", "wms.ledger.transaction-recorded");
        outbox
            .save_all(vec![a.clone(), b.clone(), c.clone()])
            .await
            .unwrap();

        let rows = outbox.find_unpublished(10, 10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);

        let limited = outbox.find_unpublished(2, 10).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn mark_published_removes_row_from_poll() {
        let outbox = InMemoryOutbox::new();
        let event = create_test_event("agg-1", "wms.inventory.received");
        outbox.save(event.clone()).await.unwrap();

        outbox.mark_published(event.id).await.unwrap();

        assert!(outbox.find_unpublished(10, 10).await.unwrap().is_empty());
        let stored = outbox.get_by_id(event.id).await.unwrap().unwrap();
        assert!(stored.is_published());
    }

    #[tokio::test]
    async fn mark_published_unknown_id_is_not_found() {
        let outbox = InMemoryOutbox::new();
        let result = outbox.mark_published(OutboxEventId::new()).await;
        assert!(matches!(result, Err(OutboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn retries_are_counted_until_dead_letter() {
        let outbox = InMemoryOutbox::new();
        let event = create_test_event("agg-1", "wms.inventory.received");
        outbox.save(event.clone()).await.unwrap();

        for attempt in 1..=3 {
            outbox
                .increment_retry(event.id, &format!("broker down #{attempt}"))
                .await
                .unwrap();
        }

        let stored = outbox.get_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.last_error.as_deref(), Some("broker down #3"));

        assert!(outbox.find_unpublished(10, 3).await.unwrap().is_empty());
        assert_eq!(outbox.find_dead_letters(10, 3).await.unwrap().len(), 1);
        assert_eq!(outbox.count_unpublished(3).await.unwrap(), 0);
        assert_eq!(outbox.count_unpublished(4).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_published_honours_retention_window() {
        let outbox = InMemoryOutbox::new();
        let mut old = create_test_event("agg-1", "wms.inventory.received");
        old.published_at = Some(Utc::now() - Duration::days(8));
        let mut recent = create_test_event("agg-1", "wms.inventory.adjusted");
        recent.published_at = Some(Utc::now() - Duration::hours(1));
        let pending = create_test_event("agg-1", "wms.inventory.low-stock-alert");
        outbox
            .save_all(vec![old, recent.clone(), pending.clone()])
            .await
            .unwrap();

        let deleted = outbox.delete_published(7 * 24 * 3600).await.unwrap();

        assert_eq!(deleted, 1);
        let remaining: Vec<_> = outbox.all().await.into_iter().map(|e| e.id).collect();
        assert_eq!(remaining, vec![recent.id, pending.id]);
    }

    #[tokio::test]
    async fn dropped_batch_discards_staged_rows() {
        let outbox = InMemoryOutbox::new();
        {
            let mut batch = outbox.begin().await;
            batch.stage(vec![create_test_event("agg-1", "wms.inventory.received")]);
            assert_eq!(batch.staged_len(), 1);
        }
        assert!(outbox.is_empty().await);

        let mut batch = outbox.begin().await;
        batch.stage(vec![create_test_event("agg-1", "wms.inventory.received")]);
        batch.commit();
        assert_eq!(outbox.len().await, 1);
    }

    #[tokio::test]
    async fn find_by_aggregate_id_filters() {
        let outbox = InMemoryOutbox::new();
        outbox
            .save_all(vec![
                create_test_event("agg-1", "a"),
                create_test_event("agg-2", "b"),
                create_test_event("agg-1", "c"),
            ])
            .await
            .unwrap();

        let rows = outbox.find_by_aggregate_id("agg-1").await.unwrap();
        let types: Vec<_> = rows.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["a", "c"]);
    }
}
