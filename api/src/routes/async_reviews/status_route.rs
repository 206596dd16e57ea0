//! GET /api/v1/async-reviews/{request_id}/status
//!
//! Returns the latest known status from the idempotency record; never
//! partial findings.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde::Serialize;
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::error_handler::AppError;
use crate::middleware_layer::correlation::{echo_header, request_context};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

pub async fn review_status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&headers);
    let id = Uuid::parse_str(&request_id)
        .map_err(|_| AppError::BadRequest(format!("invalid request id `{request_id}`")))?;

    let record = state
        .idempotency
        .get(id)
        .await?
        .ok_or(AppError::NotFound)?;

    let result = record
        .result
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());

    let response = StatusResponse {
        status: record.status.as_str().to_string(),
        result,
        error: record.error,
        processing_time_ms: record.processing_time_ms,
    };
    Ok((echo_header(&ctx), Json(response)))
}
