//! Finding model shared by the LLM adapter, aggregator, store mapping and
//! publisher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Closed severity set. Unknown inputs survive as raw strings on the issue
/// and are bucketed as `unknown` in histograms.
pub const KNOWN_SEVERITIES: [&str; 4] = ["critical", "major", "minor", "info"];

/// Normalizes a severity label; returns `None` for values outside the set.
pub fn normalize_severity(raw: &str) -> Option<&'static str> {
    let lower = raw.trim().to_ascii_lowercase();
    KNOWN_SEVERITIES.iter().find(|s| **s == lower).copied()
}

/// Origin of a finding, for per-source counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSource {
    Ai,
    Tests,
}

impl FindingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Tests => "tests",
        }
    }
}

/// A blocking issue anchored to a file/line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub file: String,
    /// 1-based line in the new file.
    pub start_line: u32,
    /// Raw label as produced; normalize via [`normalize_severity`].
    pub severity: String,
    pub title: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f32>,
    #[serde(default)]
    pub inline_comment_posted: bool,
    #[serde(default)]
    pub scm_comment_id: Option<String>,
    #[serde(default)]
    pub fallback_reason: Option<String>,
    #[serde(default)]
    pub position_metadata: Option<String>,
    #[serde(default = "default_source")]
    pub source: FindingSource,
}

fn default_source() -> FindingSource {
    FindingSource::Ai
}

/// A non-blocking note; excluded from the per-file cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub file: String,
    pub line: u32,
    pub note: String,
}

/// Validated payload of one model analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewFindings {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

/// Final product of the aggregator, persisted and published.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedFindings {
    pub issues: Vec<Issue>,
    pub notes: Vec<Note>,
    pub counts_by_source: BTreeMap<String, u32>,
    pub counts_by_severity: BTreeMap<String, u32>,
    pub total_before_dedup: u32,
    pub total_after_dedup: u32,
    pub total_filtered: u32,
    pub overall_confidence: f32,
    pub summary: String,
}

/// Dedup key normalization: lowercase, alphanumerics only.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn severity_normalization() {
        assert_eq!(normalize_severity("Critical"), Some("critical"));
        assert_eq!(normalize_severity(" MAJOR "), Some("major"));
        assert_eq!(normalize_severity("blocker"), None);
    }

    #[test]
    fn title_normalization_strips_noise() {
        assert_eq!(
            normalize_title("SQL Injection risk!"),
            "sqlinjectionrisk"
        );
        assert_eq!(normalize_title("SQL-injection RISK"), normalize_title("sql injection risk"));
    }
}
