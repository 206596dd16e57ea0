//! Correlation-id plumbing for handlers.
//!
//! The inbound `X-Correlation-ID` is honored when plausible, generated
//! otherwise, and echoed on every response so callers can stitch logs,
//! queue records and audit rows together.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use review_pipeline::{CorrelationId, RequestContext};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Builds the request context from inbound headers.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let inbound = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok());
    RequestContext::new(CorrelationId::from_header(inbound))
}

/// Echo header pair for responses.
pub fn echo_header(ctx: &RequestContext) -> [(HeaderName, HeaderValue); 1] {
    let value = HeaderValue::from_str(ctx.correlation_id.as_str())
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    [(HeaderName::from_static(CORRELATION_HEADER), value)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn inbound_header_is_echoed() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, HeaderValue::from_static("abc-123"));
        let ctx = request_context(&headers);
        assert_eq!(ctx.correlation_id.as_str(), "abc-123");
        let [(name, value)] = echo_header(&ctx);
        assert_eq!(name.as_str(), CORRELATION_HEADER);
        assert_eq!(value.to_str().unwrap(), "abc-123");
    }

    #[test]
    fn missing_header_generates_one() {
        let ctx = request_context(&HeaderMap::new());
        assert!(!ctx.correlation_id.as_str().is_empty());
    }
}
