//! POST /api/v1/async-reviews/{provider}/{repository_id}/change-requests/{n}
//!
//! Durably enqueues the request and returns 202 with the request id and a
//! status URL. The correlation id rides along on the queue record.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use review_queue::QueuedRequest;
use serde::Serialize;
use tracing::info;

use crate::core::app_state::AppState;
use crate::error_handler::AppError;
use crate::middleware_layer::correlation::{echo_header, request_context};
use crate::routes::parse_change_request;

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub request_id: String,
    pub status_url: String,
}

pub async fn enqueue_review(
    State(state): State<Arc<AppState>>,
    Path((provider, repository_id, n)): Path<(String, String, u64)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let cr = parse_change_request(&provider, &repository_id, n)?;
    let ctx = request_context(&headers);

    let request = QueuedRequest::new(
        cr.provider.as_str(),
        &cr.repository_id,
        cr.number,
        ctx.correlation_id.as_str(),
    );
    state.idempotency.mark_pending(request.request_id).await?;
    let entry_id = state.queue.enqueue(&request).await?;
    info!(
        request_id = %request.request_id,
        %entry_id,
        correlation_id = %ctx.correlation_id,
        "review request enqueued"
    );

    let response = EnqueueResponse {
        request_id: request.request_id.to_string(),
        status_url: format!("/api/v1/async-reviews/{}/status", request.request_id),
    };
    Ok((
        StatusCode::ACCEPTED,
        echo_header(&ctx),
        Json(response),
    ))
}
