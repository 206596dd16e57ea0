//! Store error hierarchy.

use thiserror::Error;
use uuid::Uuid;

use crate::model::ReviewState;

/// Convenient alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Database transport/query failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON (de)serialization of persisted payloads failed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A state change that the review lifecycle does not permit.
    #[error("illegal state transition: {from:?} -> {to:?}")]
    IllegalTransition { from: ReviewState, to: ReviewState },

    /// The review id does not exist.
    #[error("review not found: {0}")]
    NotFound(Uuid),
}
