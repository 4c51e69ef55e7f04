//! Outbox publisher: relays unpublished rows to the broker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{MessageBroker, Result, store::OutboxRepository};

/// Publisher tuning.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Maximum rows fetched per poll.
    pub batch_size: usize,
    /// Rows that failed this many times are left as dead letters.
    pub max_retries: i32,
    /// Published rows older than this are deleted.
    pub retention: Duration,
    /// Run retention cleanup every N polls.
    pub cleanup_every: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            max_retries: 10,
            retention: Duration::from_secs(7 * 24 * 3600),
            cleanup_every: 60,
        }
    }
}

/// Counters since the publisher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub polls: u64,
    pub published: u64,
    pub failed: u64,
    pub deleted: u64,
}

/// Polls the outbox and publishes rows in insertion order.
///
/// Delivery is at-least-once: a row is marked published only after the
/// broker accepted it, so a crash in between causes a redelivery.
pub struct Publisher<R: OutboxRepository, B: MessageBroker> {
    repository: R,
    broker: B,
    config: PublisherConfig,
    polls: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    deleted: AtomicU64,
}

impl<R: OutboxRepository, B: MessageBroker> Publisher<R, B> {
    pub fn new(repository: R, broker: B, config: PublisherConfig) -> Self {
        Self {
            repository,
            broker,
            config,
            polls: AtomicU64::new(0),
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            polls: self.polls.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
        }
    }

    /// Publishes one batch. Returns the number of rows delivered.
    ///
    /// A failed row stays in the outbox with its retry count bumped; the
    /// rest of the batch is still attempted.
    #[tracing::instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<usize> {
        self.polls.fetch_add(1, Ordering::Relaxed);

        let batch = self
            .repository
            .find_unpublished(self.config.batch_size, self.config.max_retries)
            .await?;

        let mut delivered = 0;
        for event in batch {
            match self.broker.publish(&event.topic, &event.payload).await {
                Ok(()) => {
                    // Redelivery is acceptable; losing the row is not.
                    if let Err(e) = self.repository.mark_published(event.id).await {
                        tracing::warn!(event_id = %event.id, error = %e, "failed to mark outbox event published");
                        continue;
                    }
                    delivered += 1;
                    self.published.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("outbox_events_published_total").increment(1);
                    tracing::debug!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        topic = %event.topic,
                        "outbox event published"
                    );
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    let message = e.to_string();
                    self.repository.increment_retry(event.id, &message).await?;

                    if event.retry_count + 1 >= self.config.max_retries {
                        metrics::counter!("outbox_dead_letters_total").increment(1);
                        tracing::warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            retries = event.retry_count + 1,
                            error = %message,
                            "outbox event exhausted retries"
                        );
                    } else {
                        tracing::error!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            retry_count = event.retry_count + 1,
                            error = %message,
                            "failed to publish outbox event"
                        );
                    }
                }
            }
        }

        let pending = self
            .repository
            .count_unpublished(self.config.max_retries)
            .await?;
        metrics::gauge!("outbox_pending_events").set(pending as f64);

        Ok(delivered)
    }

    /// Deletes published rows older than the retention window.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<u64> {
        let deleted = self
            .repository
            .delete_published(self.config.retention.as_secs() as i64)
            .await?;
        if deleted > 0 {
            self.deleted.fetch_add(deleted, Ordering::Relaxed);
            metrics::counter!("outbox_events_deleted_total").increment(deleted);
            tracing::info!(deleted, "deleted published outbox events");
        }
        Ok(deleted)
    }

    /// Runs the poll loop until `shutdown` is cancelled.
    ///
    /// A batch in progress is finished before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox publisher started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut iterations: u64 = 0;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_once().await {
                tracing::error!(error = %e, "outbox poll failed");
            }

            iterations += 1;
            if self.config.cleanup_every > 0
                && iterations % self.config.cleanup_every == 0
                && let Err(e) = self.cleanup().await
            {
                tracing::error!(error = %e, "outbox cleanup failed");
            }
        }

        tracing::info!(stats = ?self.stats(), "outbox publisher stopped");
    }
}
