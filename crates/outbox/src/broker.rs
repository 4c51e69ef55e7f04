//! Message broker boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{CloudEvent, OutboxError, Result};

/// Destination for relayed outbox events.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes one event to `topic`. Delivery is at-least-once; consumers
    /// de-duplicate on the CloudEvent id.
    async fn publish(&self, topic: &str, event: &CloudEvent) -> Result<()>;
}

#[async_trait]
impl<T: MessageBroker + ?Sized> MessageBroker for Arc<T> {
    async fn publish(&self, topic: &str, event: &CloudEvent) -> Result<()> {
        (**self).publish(topic, event).await
    }
}

/// Broker that records messages in memory. Can be told to fail the next
/// N publishes.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    published: Arc<RwLock<Vec<(String, CloudEvent)>>>,
    failures_remaining: Arc<AtomicUsize>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<(String, CloudEvent)> {
        self.published.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn clear(&self) {
        self.published.write().await.clear();
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, event: &CloudEvent) -> Result<()> {
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(OutboxError::publish(topic, "broker unavailable"));
        }

        self.published
            .write()
            .await
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use redis_stream::RedisStreamBroker;

#[cfg(feature = "redis")]
mod redis_stream {
    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;

    use super::MessageBroker;
    use crate::{CloudEvent, OutboxError, Result};

    /// Publishes each event as a Redis Streams entry (`XADD`) on a stream
    /// named after the topic.
    #[derive(Clone)]
    pub struct RedisStreamBroker {
        conn: MultiplexedConnection,
        max_len: Option<usize>,
    }

    impl RedisStreamBroker {
        pub async fn connect(redis_url: &str) -> Result<Self> {
            let client = redis::Client::open(redis_url)
                .map_err(|e| OutboxError::publish("redis", e))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| OutboxError::publish("redis", e))?;
            Ok(Self {
                conn,
                max_len: None,
            })
        }

        /// Caps each stream at roughly `max_len` entries (`MAXLEN ~`).
        pub fn with_max_len(mut self, max_len: usize) -> Self {
            self.max_len = Some(max_len);
            self
        }
    }

    #[async_trait]
    impl MessageBroker for RedisStreamBroker {
        async fn publish(&self, topic: &str, event: &CloudEvent) -> Result<()> {
            let body = serde_json::to_string(event)?;
            let mut conn = self.conn.clone();

            let mut cmd = redis::cmd("XADD");
            cmd.arg(topic);
            if let Some(max_len) = self.max_len {
                cmd.arg("MAXLEN").arg("~").arg(max_len);
            }
            cmd.arg("*")
                .arg("id")
                .arg(&event.id)
                .arg("type")
                .arg(&event.event_type)
                .arg("event")
                .arg(body);

            let _entry_id: String = cmd
                .query_async(&mut conn)
                .await
                .map_err(|e| OutboxError::publish(topic, e))?;
            Ok(())
        }
    }
}
