//! POST …/review: publish caller-provided findings, nothing else.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use review_pipeline::findings::ReviewFindings;
use serde::Serialize;
use tracing::debug;

use crate::core::app_state::AppState;
use crate::error_handler::AppError;
use crate::middleware_layer::correlation::{echo_header, request_context};
use crate::routes::parse_change_request;

/// Receipt returned after a publish run.
#[derive(Debug, Serialize)]
pub struct PublishReceipt {
    pub summary_comment_id: Option<String>,
    pub inline_posted: u32,
    pub fallbacks: u32,
    pub failures: u32,
}

/// Publishes the findings in the request body to the change request.
///
/// Returns 200 with a receipt, or 502 with `scm_error` when the SCM rejects
/// the publication.
pub async fn publish_review(
    State(state): State<Arc<AppState>>,
    Path((provider, repository_id, n)): Path<(String, String, u64)>,
    headers: HeaderMap,
    Json(findings): Json<ReviewFindings>,
) -> Result<impl IntoResponse, AppError> {
    let cr = parse_change_request(&provider, &repository_id, n)?;
    let ctx = request_context(&headers);
    debug!(
        %cr,
        correlation_id = %ctx.correlation_id,
        issues = findings.issues.len(),
        "publish-only requested"
    );

    let report = state.pipeline.publish_only(&cr, findings).await?;
    let receipt = PublishReceipt {
        summary_comment_id: report.summary_comment_id,
        inline_posted: report.inline_posted,
        fallbacks: report.fallbacks,
        failures: report.failures,
    };
    Ok((echo_header(&ctx), Json(receipt)))
}
