use common::Interrupted;
use thiserror::Error;

use crate::OutboxEventId;

/// Errors that can occur when writing, reading or relaying outbox rows.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Outbox event not found: {0}")]
    NotFound(OutboxEventId),

    #[error("Outbox event is missing required field `{0}`")]
    MissingField(&'static str),

    /// The broker rejected or failed to accept a message.
    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    pub fn publish(topic: impl Into<String>, message: impl std::fmt::Display) -> Self {
        OutboxError::Publish {
            topic: topic.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
