//! Crate-wide error hierarchy for the review pipeline.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - Provider-aware mapping (401→Unauthorized, 429→RateLimited, 5xx→Server).
//! - Stable surface codes for the API layer and persisted failure reasons.
//! - Transient/terminal classification consumed by the queue worker.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type PipelineResult<T> = Result<T, Error>;

/// Root error type for the review pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// SCM (GitHub/GitLab) related failure.
    #[error(transparent)]
    Scm(#[from] ScmError),

    /// Unified diff parsing failure.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The model's final output failed schema validation after the retry.
    #[error("llm output failed schema validation: {0}")]
    LlmSchemaInvalid(String),

    /// The streamed completion overran its hard deadline.
    #[error("llm deadline exceeded")]
    LlmTimeout,

    /// Transport/provider failure talking to the LLM.
    #[error("llm error: {0}")]
    Llm(#[from] llm_service::error_handler::AiLlmError),

    /// The whole pipeline overran its per-request deadline.
    #[error("pipeline deadline exceeded")]
    PipelineTimeout,

    /// The subscriber went away; work was abandoned, nothing persisted.
    #[error("cancelled by subscriber")]
    Cancelled,

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] review_store::StoreError),

    /// Queue transport failure.
    #[error(transparent)]
    Queue(#[from] review_queue::QueueError),

    /// Input validation errors (bad refs, unknown provider, bad bodies).
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Stable machine-readable code, used in API payloads and persisted
    /// failure reasons.
    pub fn surface_code(&self) -> &'static str {
        match self {
            Self::Scm(ScmError::Timeout) => "SCM_TIMEOUT",
            Self::Scm(_) => "SCM_ERROR",
            Self::Parse(_) => "DIFF_MALFORMED",
            Self::LlmSchemaInvalid(_) => "LLM_SCHEMA_INVALID",
            Self::LlmTimeout => "LLM_TIMEOUT",
            Self::Llm(_) => "LLM_TRANSIENT",
            Self::PipelineTimeout => "PIPELINE_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Store(review_store::StoreError::IllegalTransition { .. }) => "STATE_ILLEGAL",
            Self::Store(_) => "STORE_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Validation(_) => "VALIDATION",
        }
    }

    /// True when queue redelivery has a realistic chance of succeeding.
    ///
    /// Timeouts are terminal for the review that hit them; network-shaped
    /// failures are worth one more delivery.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Scm(e) => e.is_transient(),
            Self::Llm(e) => e.is_transient(),
            Self::Queue(e) => e.is_transient(),
            Self::Store(review_store::StoreError::Database(_)) => true,
            _ => false,
        }
    }
}

/// Detailed SCM error used inside the provider layer.
#[derive(Debug, Error)]
pub enum ScmError {
    /// Unauthorized (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden (HTTP 403).
    #[error("forbidden")]
    Forbidden,

    /// Not found (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Rate limited (HTTP 429).
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Gateway/Server error (HTTP 5xx).
    #[error("server error: status {0}")]
    Server(u16),

    /// Other HTTP status (4xx/3xx) not covered above.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    /// Timeout at transport level.
    #[error("timeout")]
    Timeout,

    /// Network/transport failure without status (DNS/connect/reset).
    #[error("network error: {0}")]
    Network(String),

    /// JSON deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Unexpected/invalid shape of provider response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ScmError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server(_) | Self::Timeout | Self::Network(_)
        )
    }
}

impl From<reqwest::Error> for ScmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ScmError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => ScmError::Unauthorized,
                403 => ScmError::Forbidden,
                404 => ScmError::NotFound,
                429 => ScmError::RateLimited {
                    retry_after_secs: None,
                },
                500..=599 => ScmError::Server(code),
                _ => ScmError::HttpStatus(code),
            };
        }
        ScmError::Network(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Scm(ScmError::from(e))
    }
}

/// Unified diff parser errors. The line number is 1-based into the raw text.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid hunk header at line {line}: {text}")]
    InvalidHunkHeader { line: usize, text: String },

    #[error("empty diff")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn surface_codes_are_stable() {
        assert_eq!(Error::Scm(ScmError::Timeout).surface_code(), "SCM_TIMEOUT");
        assert_eq!(Error::Scm(ScmError::NotFound).surface_code(), "SCM_ERROR");
        assert_eq!(
            Error::Parse(ParseError::Empty).surface_code(),
            "DIFF_MALFORMED"
        );
        assert_eq!(Error::LlmTimeout.surface_code(), "LLM_TIMEOUT");
        assert_eq!(Error::PipelineTimeout.surface_code(), "PIPELINE_TIMEOUT");
    }

    #[test]
    fn timeouts_are_terminal_but_network_is_transient() {
        assert!(!Error::LlmTimeout.is_transient());
        assert!(!Error::PipelineTimeout.is_transient());
        assert!(Error::Scm(ScmError::Server(502)).is_transient());
        assert!(Error::Scm(ScmError::Network("reset".into())).is_transient());
        assert!(!Error::Scm(ScmError::Unauthorized).is_transient());
    }
}
