//! Unified error types and env/validation helpers for `llm-service`.
//!
//! One root [`AiLlmError`] for all public functions, with focused sub-enums:
//! - [`ConfigError`] for environment/config-driven setup,
//! - [`ProviderError`] for HTTP/provider-shaped failures,
//! - transport failures carried through from `reqwest`.

use reqwest::StatusCode;
use thiserror::Error;

/// Root error type for the crate.
#[derive(Debug, Error)]
pub enum AiLlmError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Client/network failure without a usable provider response.
    #[error("[LLM Service] http transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),
}

impl AiLlmError {
    /// True when a retry has a realistic chance of succeeding
    /// (network-level failures, timeouts, provider 5xx/429).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpTransport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Provider(p) => matches!(
                &p.kind,
                ProviderErrorKind::HttpStatus(HttpError { status, .. })
                    if status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            ),
            Self::Config(_) => false,
        }
    }
}

/// Error enum for environment/config-driven setup.
///
/// All variants include `[LLM Service]` in their messages so bubbled-up
/// errors can be attributed to this library.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing or empty.
    #[error("[LLM Service] missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A number failed to parse (ports, limits, timeouts).
    #[error("[LLM Service] invalid number in {var}: {reason}")]
    InvalidNumber {
        var: &'static str,
        reason: &'static str,
    },

    /// Unsupported provider in `LLM_KIND`.
    #[error("[LLM Service] unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Value had the wrong format (e.g., invalid URL).
    #[error("[LLM Service] invalid format in {var}: {reason}")]
    InvalidFormat {
        var: &'static str,
        reason: &'static str,
    },
}

/// Provider identifiers used in error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Ollama,
    Stub,
}

/// Provider-attributed failure.
#[derive(Debug, Error)]
#[error("[LLM Service] {provider:?}: {kind}")]
pub struct ProviderError {
    pub provider: Provider,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn new(provider: Provider, kind: ProviderErrorKind) -> Self {
        Self { provider, kind }
    }
}

/// Classified provider failure kinds.
#[derive(Debug, Error)]
pub enum ProviderErrorKind {
    #[error("config provider does not match this service")]
    InvalidProvider,

    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("http status error: {0}")]
    HttpStatus(HttpError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("empty choices in response")]
    EmptyChoices,

    /// Stream ended mid-flight with unparseable payloads and no terminator.
    #[error("stream truncated: {0}")]
    StreamTruncated(String),
}

/// Non-2xx response details with a short body snippet for logs.
#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub url: String,
    pub snippet: String,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}: {}", self.status, self.url, self.snippet)
    }
}

/// Truncates a response body to a log-safe snippet.
pub fn make_snippet(body: &str) -> String {
    const MAX: usize = 240;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    trimmed.chars().take(MAX).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        let s = make_snippet(&long);
        assert_eq!(s.chars().count(), 241); // 240 + ellipsis
    }

    #[test]
    fn transient_classification() {
        let err = AiLlmError::Provider(ProviderError::new(
            Provider::OpenAi,
            ProviderErrorKind::HttpStatus(HttpError {
                status: StatusCode::BAD_GATEWAY,
                url: "http://x".into(),
                snippet: String::new(),
            }),
        ));
        assert!(err.is_transient());

        let err = AiLlmError::Config(ConfigError::MissingVar("LLM_MODEL"));
        assert!(!err.is_transient());
    }
}
