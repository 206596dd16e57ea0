//! Shared handler state.

use std::sync::Arc;

use llm_service::LlmStreamClient;
use review_pipeline::ReviewPipeline;
use review_queue::{IdempotencyStore, RequestQueue};

/// Shared state for all handlers; constructed once at boot.
pub struct AppState {
    /// Fully wired pipeline (SCM + LLM + store + config).
    pub pipeline: Arc<ReviewPipeline>,
    /// Durable request queue for the async shape.
    pub queue: RequestQueue,
    /// Result/idempotency records for the status endpoint.
    pub idempotency: IdempotencyStore,
    /// Shared LLM client, probed by the health endpoint.
    pub llm: Arc<LlmStreamClient>,
}
