//! Queue error hierarchy.

use thiserror::Error;

/// Convenient alias for queue results.
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Transport or command failure from the Redis client.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stream entry was missing required fields or carried bad values.
    #[error("invalid queue record: {0}")]
    InvalidRecord(String),

    /// JSON (de)serialization of a result payload failed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl QueueError {
    /// Queue failures are transient from the pipeline's point of view unless
    /// the record itself is unusable.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidRecord(_))
    }
}
