use async_trait::async_trait;

use crate::{OutboxEvent, OutboxEventId, Result};

/// Storage for outbox rows.
///
/// Aggregate repositories insert rows inside their own storage transaction;
/// the methods here are used by the publisher and by tooling. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Inserts a single row outside any aggregate transaction.
    async fn save(&self, event: OutboxEvent) -> Result<()>;

    /// Inserts rows atomically: all of them or none.
    async fn save_all(&self, events: Vec<OutboxEvent>) -> Result<()>;

    /// Returns up to `limit` rows that are unpublished and below
    /// `max_retries`, oldest first.
    async fn find_unpublished(&self, limit: usize, max_retries: i32) -> Result<Vec<OutboxEvent>>;

    /// Stamps `published_at`. Fails with `NotFound` for an unknown id.
    async fn mark_published(&self, id: OutboxEventId) -> Result<()>;

    /// Bumps `retry_count` and records the failure message.
    async fn increment_retry(&self, id: OutboxEventId, error: &str) -> Result<()>;

    /// Deletes published rows whose `published_at` is older than
    /// `older_than_secs`. Returns the number of rows removed.
    async fn delete_published(&self, older_than_secs: i64) -> Result<u64>;

    async fn get_by_id(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>>;

    /// All rows for one aggregate, oldest first.
    async fn find_by_aggregate_id(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>>;

    /// Unpublished rows that exhausted their retries, oldest first.
    async fn find_dead_letters(&self, limit: usize, max_retries: i32) -> Result<Vec<OutboxEvent>>;

    /// Number of unpublished rows still eligible for delivery.
    async fn count_unpublished(&self, max_retries: i32) -> Result<u64>;
}
