//! Public application error type and its HTTP mapping.
//!
//! Taxonomy (stable surface names):
//! - validation problems → 400,
//! - SCM auth → 401/403, unknown resources → 404, rate limits → 429 with a
//!   reset hint,
//! - transient upstream (SCM 5xx, LLM transport) → 502,
//! - internal classification (`DIFF_MALFORMED`, `STATE_ILLEGAL`, storage) →
//!   500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use review_pipeline::errors::ScmError;

/// Public application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // --- Boot / server ---
    #[error("failed to bind listener")]
    Bind(#[source] std::io::Error),

    #[error("server error")]
    Server(#[source] std::io::Error),

    // --- Request / routing ---
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    // --- Lower layers ---
    #[error(transparent)]
    Pipeline(#[from] review_pipeline::Error),

    #[error(transparent)]
    Queue(#[from] review_queue::QueueError),
}

/// JSON error body; `error` carries the stable code.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl AppError {
    fn status_code_and_body(&self) -> (StatusCode, ErrorBody) {
        match self {
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                body("validation", msg.clone(), None),
            ),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                body("not_found", "resource not found".to_string(), None),
            ),
            Self::Pipeline(e) => map_pipeline_error(e),
            Self::Queue(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                body("queue_error", e.to_string(), None),
            ),
            Self::Bind(e) | Self::Server(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                body("internal", e.to_string(), None),
            ),
        }
    }
}

fn body(error: &str, message: String, retry_after_secs: Option<u64>) -> ErrorBody {
    ErrorBody {
        error: error.to_string(),
        message,
        retry_after_secs,
    }
}

fn map_pipeline_error(e: &review_pipeline::Error) -> (StatusCode, ErrorBody) {
    use review_pipeline::Error as P;
    match e {
        P::Validation(msg) => (
            StatusCode::BAD_REQUEST,
            body("validation", msg.clone(), None),
        ),
        P::Scm(ScmError::Unauthorized) => (
            StatusCode::UNAUTHORIZED,
            body("scm_unauthorized", "SCM authentication failed".to_string(), None),
        ),
        P::Scm(ScmError::Forbidden) => (
            StatusCode::FORBIDDEN,
            body("scm_forbidden", "SCM access denied".to_string(), None),
        ),
        P::Scm(ScmError::NotFound) => (
            StatusCode::NOT_FOUND,
            body("not_found", "change request not found".to_string(), None),
        ),
        P::Scm(ScmError::RateLimited { retry_after_secs }) => (
            StatusCode::TOO_MANY_REQUESTS,
            body(
                "scm_rate_limited",
                "SCM rate limit reached".to_string(),
                *retry_after_secs,
            ),
        ),
        P::Scm(_) => (
            StatusCode::BAD_GATEWAY,
            body("scm_error", e.to_string(), None),
        ),
        P::Llm(_) | P::LlmTimeout | P::LlmSchemaInvalid(_) => (
            StatusCode::BAD_GATEWAY,
            body("llm_error", e.surface_code().to_string(), None),
        ),
        // DIFF_MALFORMED, STATE_ILLEGAL, storage, timeouts: internal.
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            body("internal", e.surface_code().to_string(), None),
        ),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = self.status_code_and_body();
        (status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scm_statuses_map_per_taxonomy() {
        let unauthorized = AppError::Pipeline(ScmError::Unauthorized.into());
        assert_eq!(
            unauthorized.status_code_and_body().0,
            StatusCode::UNAUTHORIZED
        );

        let rate_limited = AppError::Pipeline(
            ScmError::RateLimited {
                retry_after_secs: Some(30),
            }
            .into(),
        );
        let (status, payload) = rate_limited.status_code_and_body();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(payload.retry_after_secs, Some(30));

        let server = AppError::Pipeline(ScmError::Server(503).into());
        assert_eq!(server.status_code_and_body().0, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn validation_is_400_and_malformed_diff_is_500() {
        let bad = AppError::BadRequest("unknown provider".to_string());
        assert_eq!(bad.status_code_and_body().0, StatusCode::BAD_REQUEST);

        let malformed = AppError::Pipeline(review_pipeline::Error::Parse(
            review_pipeline::errors::ParseError::Empty,
        ));
        assert_eq!(
            malformed.status_code_and_body().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
