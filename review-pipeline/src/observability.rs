//! Observability core: correlation-id propagation and process counters.
//!
//! Instead of thread-locals or task-locals, the id travels as an explicit
//! value inside [`RequestContext`], is stamped onto queue records and audit
//! rows, and is attached to tracing spans at the pipeline entry points.
//! [`PipelineMetrics`] is a small set of lock-free counters surfaced through
//! the health endpoint.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id for one logical request, inbound or generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts an inbound header value, falling back to a fresh id when the
    /// value is empty or implausibly long.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.trim().is_empty() && v.len() <= 128 => Self(v.trim().to_string()),
            _ => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit per-request context carried through every pipeline stage.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
}

impl RequestContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    pub fn generated() -> Self {
        Self::new(CorrelationId::generate())
    }
}

/// Process-wide review counters, incremented by the pipeline driver.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    reviews_completed: AtomicU64,
    reviews_failed: AtomicU64,
    reviews_cancelled: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of the counters, JSON-serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub reviews_completed: u64,
    pub reviews_failed: u64,
    pub reviews_cancelled: u64,
    pub publish_failures: u64,
}

impl PipelineMetrics {
    pub fn record_completed(&self) {
        self.reviews_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.reviews_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.reviews_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reviews_completed: self.reviews_completed.load(Ordering::Relaxed),
            reviews_failed: self.reviews_failed.load(Ordering::Relaxed),
            reviews_cancelled: self.reviews_cancelled.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counters_accumulate_into_snapshots() {
        let metrics = PipelineMetrics::default();
        metrics.record_completed();
        metrics.record_completed();
        metrics.record_failed();
        metrics.record_cancelled();
        let snap = metrics.snapshot();
        assert_eq!(snap.reviews_completed, 2);
        assert_eq!(snap.reviews_failed, 1);
        assert_eq!(snap.reviews_cancelled, 1);
        assert_eq!(snap.publish_failures, 0);
    }

    #[test]
    fn header_value_is_honored() {
        let id = CorrelationId::from_header(Some("req-123"));
        assert_eq!(id.as_str(), "req-123");
    }

    #[test]
    fn blank_or_oversized_header_generates() {
        let blank = CorrelationId::from_header(Some("   "));
        assert!(!blank.as_str().is_empty());

        let long = "x".repeat(300);
        let generated = CorrelationId::from_header(Some(&long));
        assert_ne!(generated.as_str(), long);
    }
}
