use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{OutboxError, OutboxEvent, OutboxEventId, Result, store::OutboxRepository};

const SELECT_COLUMNS: &str = "id, aggregate_id, aggregate_type, event_type, topic, payload, \
     created_at, published_at, retry_count, last_error";

/// PostgreSQL-backed outbox.
///
/// Rows are ordered by the `seq` identity column, which reflects commit
/// insertion order.
#[derive(Clone)]
pub struct PostgresOutbox {
    pool: PgPool,
}

impl PostgresOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts rows on an open connection or transaction.
    ///
    /// Aggregate repositories call this between `begin` and `commit` so the
    /// rows share the aggregate's transaction.
    pub async fn insert_all(conn: &mut PgConnection, events: &[OutboxEvent]) -> Result<()> {
        for event in events {
            let payload = serde_json::to_value(&event.payload)?;
            sqlx::query(
                r#"
                INSERT INTO outbox_events
                    (id, aggregate_id, aggregate_type, event_type, topic, payload,
                     created_at, published_at, retry_count, last_error)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(event.id.as_uuid())
            .bind(&event.aggregate_id)
            .bind(&event.aggregate_type)
            .bind(&event.event_type)
            .bind(&event.topic)
            .bind(payload)
            .bind(event.created_at)
            .bind(event.published_at)
            .bind(event.retry_count)
            .bind(&event.last_error)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        let payload: serde_json::Value = row.try_get("payload")?;

        Ok(OutboxEvent {
            id: OutboxEventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            topic: row.try_get("topic")?,
            payload: serde_json::from_value(payload)?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutbox {
    async fn save(&self, event: OutboxEvent) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_all(&mut conn, std::slice::from_ref(&event)).await
    }

    async fn save_all(&self, events: Vec<OutboxEvent>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_all(&mut tx, &events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_unpublished(&self, limit: usize, max_retries: i32) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events \
             WHERE published_at IS NULL AND retry_count < $1 \
             ORDER BY seq ASC LIMIT $2"
        ))
        .bind(max_retries)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn mark_published(&self, id: OutboxEventId) -> Result<()> {
        let result = sqlx::query("UPDATE outbox_events SET published_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn increment_retry(&self, id: OutboxEventId, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_published(&self, older_than_secs: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(older_than_secs);
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE published_at IS NOT NULL AND published_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_by_id(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn find_by_aggregate_id(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events WHERE aggregate_id = $1 ORDER BY seq ASC"
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn find_dead_letters(&self, limit: usize, max_retries: i32) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events \
             WHERE published_at IS NULL AND retry_count >= $1 \
             ORDER BY seq ASC LIMIT $2"
        ))
        .bind(max_retries)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn count_unpublished(&self, max_retries: i32) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_events WHERE published_at IS NULL AND retry_count < $1",
        )
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }
}
