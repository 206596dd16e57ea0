//! Context-enrichment data model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diff::DiffDocument;

/// Why a file was nominated as related context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchReason {
    DirectImport,
    TypeReference,
    SamePackage,
    RelatedLayer,
    TestCounterpart,
    ParentPackage,
    CoChange,
    SiblingFile,
}

impl MatchReason {
    /// Baseline confidence attached when the producing strategy has no
    /// stronger signal.
    pub fn baseline_confidence(&self) -> f32 {
        match self {
            Self::TestCounterpart => 0.90,
            Self::DirectImport => 0.85,
            Self::SamePackage => 0.80,
            Self::TypeReference => 0.75,
            Self::RelatedLayer => 0.70,
            Self::SiblingFile => 0.60,
            Self::ParentPackage => 0.50,
            // Computed from co-occurrence counts by the strategy.
            Self::CoChange => 0.40,
        }
    }

    /// Tie-break rank when two matches share a confidence. Higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            Self::TestCounterpart => 8,
            Self::DirectImport => 7,
            Self::SamePackage => 6,
            Self::TypeReference => 5,
            Self::RelatedLayer => 4,
            Self::SiblingFile => 3,
            Self::CoChange => 2,
            Self::ParentPackage => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectImport => "DIRECT_IMPORT",
            Self::TypeReference => "TYPE_REFERENCE",
            Self::SamePackage => "SAME_PACKAGE",
            Self::RelatedLayer => "RELATED_LAYER",
            Self::TestCounterpart => "TEST_COUNTERPART",
            Self::ParentPackage => "PARENT_PACKAGE",
            Self::CoChange => "CO_CHANGE",
            Self::SiblingFile => "SIBLING_FILE",
        }
    }
}

/// One nominated file with the strongest reason and its evidence trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMatch {
    pub path: String,
    pub reason: MatchReason,
    /// Producer certainty in [0, 1].
    pub confidence: f32,
    /// Human-readable trail; after merging, all contributing reasons.
    pub evidence: String,
}

/// Terminal status of one strategy execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyStatus {
    Success,
    Timeout,
    Error,
    Skipped,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
            Self::Skipped => "SKIPPED",
        }
    }
}

/// Per-strategy outcome recorded into the enriched diff and the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyReport {
    pub status: StrategyStatus,
    pub duration_ms: u64,
    /// Matches produced per reason, before merging.
    pub reason_histogram: BTreeMap<String, u32>,
    /// Cause for TIMEOUT/ERROR outcomes.
    pub detail: Option<String>,
}

/// The diff plus everything the strategies and fetchers found.
#[derive(Debug, Clone, Default)]
pub struct EnrichedDiff {
    pub diff: DiffDocument,
    /// Merged, capped, confidence-ranked matches.
    pub matches: Vec<ContextMatch>,
    /// Keyed by strategy name; populated even when every strategy failed.
    pub per_strategy: BTreeMap<String, StrategyReport>,
}
