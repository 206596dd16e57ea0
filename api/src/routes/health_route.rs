//! GET /api/v1/health: process liveness plus an LLM endpoint probe.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use llm_service::health_service::HealthStatus;
use review_pipeline::MetricsSnapshot;
use serde::Serialize;

use crate::core::app_state::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub llm: Option<HealthStatus>,
    pub metrics: MetricsSnapshot,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let llm = tokio::time::timeout(PROBE_TIMEOUT, state.llm.health())
        .await
        .ok();
    let ok = llm.as_ref().map(|h| h.ok).unwrap_or(false);
    Json(HealthResponse {
        ok,
        llm,
        metrics: state.pipeline.metrics(),
    })
}
