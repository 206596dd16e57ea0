//! Finding aggregator: fixed-order, observable post-processing.
//!
//! Steps, in order:
//! 1. confidence filter (scored issues below the floor are dropped),
//! 2. deduplication by `(file, start_line, normalized title)`: first wins,
//! 3. per-file cap by insertion order,
//! 4. severity histogram (unknown labels bucketed as `unknown`),
//! 5. overall confidence (mean of present scores; 1.0 when no issues,
//!    0.7 when none are scored),
//! 6. summary composition.
//!
//! `total_before_dedup`, `total_after_dedup` and `total_filtered` are
//! recorded exactly, for auditability. Notes bypass the filter and the cap.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::findings::{
    AggregatedFindings, Issue, Note, ReviewFindings, normalize_severity, normalize_title,
};

/// Aggregation knobs; see the configuration surface for defaults.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Scored issues below this floor are dropped. Absent scores pass.
    pub min_confidence: f32,
    /// First N issues per file survive, by insertion order.
    pub max_issues_per_file: usize,
    pub dedup_enabled: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_issues_per_file: 10,
            dedup_enabled: true,
        }
    }
}

/// Optional test-execution input merged into the aggregate.
#[derive(Debug, Clone, Default)]
pub struct TestExecutionFindings {
    pub issues: Vec<Issue>,
    /// One-line outcome appended to the summary.
    pub outcome_line: Option<String>,
}

/// Runs the fixed aggregation sequence. Deterministic for a given input.
pub fn aggregate(
    ai: ReviewFindings,
    tests: Option<TestExecutionFindings>,
    cfg: &AggregationConfig,
) -> AggregatedFindings {
    let tests = tests.unwrap_or_default();

    let mut counts_by_source: BTreeMap<String, u32> = BTreeMap::new();
    counts_by_source.insert("ai".to_string(), ai.issues.len() as u32);
    counts_by_source.insert("tests".to_string(), tests.issues.len() as u32);

    let mut issues: Vec<Issue> = ai.issues;
    issues.extend(tests.issues);
    let notes: Vec<Note> = ai.notes;

    let total_before_dedup = issues.len() as u32;

    // 1. Confidence filter.
    let before_filter = issues.len();
    issues.retain(|i| match i.confidence_score {
        Some(score) => score >= cfg.min_confidence,
        None => true,
    });
    let total_filtered = (before_filter - issues.len()) as u32;

    // 2. Deduplicate; first occurrence wins, order preserved.
    if cfg.dedup_enabled {
        let mut seen: HashSet<(String, u32, String)> = HashSet::new();
        issues.retain(|i| {
            seen.insert((i.file.clone(), i.start_line, normalize_title(&i.title)))
        });
    }
    let total_after_dedup = issues.len() as u32;

    // 3. Per-file cap by insertion order.
    let mut per_file: HashMap<String, usize> = HashMap::new();
    issues.retain(|i| {
        let n = per_file.entry(i.file.clone()).or_insert(0);
        *n += 1;
        *n <= cfg.max_issues_per_file
    });

    // 4. Severity histogram over the final set.
    let mut counts_by_severity: BTreeMap<String, u32> = BTreeMap::new();
    for issue in &issues {
        let key = normalize_severity(&issue.severity).unwrap_or("unknown");
        *counts_by_severity.entry(key.to_string()).or_insert(0) += 1;
    }

    // 5. Overall confidence.
    let overall_confidence = overall_confidence(&issues);

    // 6. Summary.
    let mut summary = format!("Analysis complete. Found {} issues.", issues.len());
    if !ai.summary.trim().is_empty() {
        summary.push(' ');
        summary.push_str(ai.summary.trim());
    }
    if let Some(outcome) = tests.outcome_line.as_deref() {
        summary.push('\n');
        summary.push_str(outcome);
    }

    debug!(
        total_before_dedup,
        total_after_dedup,
        total_filtered,
        final_count = issues.len(),
        "aggregation done"
    );

    AggregatedFindings {
        issues,
        notes,
        counts_by_source,
        counts_by_severity,
        total_before_dedup,
        total_after_dedup,
        total_filtered,
        overall_confidence,
        summary,
    }
}

/// Mean of present scores; 1.0 when no issues; 0.7 when none are scored.
fn overall_confidence(issues: &[Issue]) -> f32 {
    if issues.is_empty() {
        return 1.0;
    }
    let scored: Vec<f32> = issues.iter().filter_map(|i| i.confidence_score).collect();
    if scored.is_empty() {
        return 0.7;
    }
    scored.iter().sum::<f32>() / scored.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::FindingSource;
    use pretty_assertions::assert_eq;

    fn issue(file: &str, line: u32, title: &str, score: Option<f32>) -> Issue {
        Issue {
            file: file.to_string(),
            start_line: line,
            severity: "major".to_string(),
            title: title.to_string(),
            suggestion: None,
            confidence_score: score,
            inline_comment_posted: false,
            scm_comment_id: None,
            fallback_reason: None,
            position_metadata: None,
            source: FindingSource::Ai,
        }
    }

    fn ai(issues: Vec<Issue>) -> ReviewFindings {
        ReviewFindings {
            summary: String::new(),
            issues,
            notes: Vec::new(),
        }
    }

    #[test]
    fn single_critical_issue_with_score() {
        let mut one = issue("UserDAO.java", 11, "SQL injection", Some(0.9));
        one.severity = "critical".to_string();
        let out = aggregate(ai(vec![one]), None, &AggregationConfig::default());
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.counts_by_severity.get("critical"), Some(&1));
        assert!((out.overall_confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn dedup_counters_are_exact() {
        let input = vec![
            issue("a.rs", 5, "Null check missing", None),
            issue("a.rs", 5, "null-check MISSING!", None),
            issue("b.rs", 9, "Off by one", None),
        ];
        let out = aggregate(ai(input), None, &AggregationConfig::default());
        assert_eq!(out.total_before_dedup, 3);
        assert_eq!(out.total_after_dedup, 2);
        assert_eq!(out.total_filtered, 0);
        assert_eq!(out.counts_by_severity.values().sum::<u32>(), 2);
        // First occurrence wins.
        assert_eq!(out.issues[0].title, "Null check missing");
    }

    #[test]
    fn confidence_filter_before_dedup_counts() {
        let input = vec![
            issue("f.rs", 1, "one", Some(0.9)),
            issue("f.rs", 2, "two", Some(0.5)),
            issue("f.rs", 3, "three", Some(0.5)),
            issue("f.rs", 4, "four", None),
            issue("f.rs", 5, "five", Some(0.85)),
            issue("f.rs", 6, "six", Some(0.95)),
        ];
        let cfg = AggregationConfig {
            min_confidence: 0.8,
            ..Default::default()
        };
        let out = aggregate(ai(input), None, &cfg);
        assert_eq!(out.total_before_dedup, 6);
        assert_eq!(out.total_filtered, 2);
        assert_eq!(out.total_after_dedup, 4);
        // Mean over the remaining scored issues: (0.9 + 0.85 + 0.95) / 3.
        assert!((out.overall_confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn per_file_cap_keeps_insertion_order() {
        let input: Vec<Issue> = (1..=5)
            .map(|i| issue("f.rs", i, &format!("t{i}"), None))
            .collect();
        let cfg = AggregationConfig {
            max_issues_per_file: 3,
            ..Default::default()
        };
        let out = aggregate(ai(input), None, &cfg);
        assert_eq!(out.issues.len(), 3);
        assert_eq!(out.issues[0].start_line, 1);
        assert_eq!(out.issues[2].start_line, 3);
    }

    #[test]
    fn zero_cap_empties_issues_and_histogram() {
        let input = vec![issue("f.rs", 1, "t", None)];
        let cfg = AggregationConfig {
            max_issues_per_file: 0,
            ..Default::default()
        };
        let out = aggregate(ai(input), None, &cfg);
        assert!(out.issues.is_empty());
        assert!(out.counts_by_severity.is_empty());
    }

    #[test]
    fn empty_input_summary_and_confidence() {
        let out = aggregate(ai(Vec::new()), None, &AggregationConfig::default());
        assert_eq!(out.summary, "Analysis complete. Found 0 issues.");
        assert_eq!(out.overall_confidence, 1.0);
    }

    #[test]
    fn unscored_issues_yield_070() {
        let out = aggregate(
            ai(vec![issue("f.rs", 1, "t", None)]),
            None,
            &AggregationConfig::default(),
        );
        assert!((out.overall_confidence - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_severity_is_bucketed() {
        let mut odd = issue("f.rs", 1, "t", None);
        odd.severity = "blocker".to_string();
        let out = aggregate(ai(vec![odd]), None, &AggregationConfig::default());
        assert_eq!(out.counts_by_severity.get("unknown"), Some(&1));
    }

    #[test]
    fn test_findings_counted_and_outcome_appended() {
        let tests = TestExecutionFindings {
            issues: vec![issue("f.rs", 2, "flaky", None)],
            outcome_line: Some("Tests: 10 passed, 1 failed.".to_string()),
        };
        let out = aggregate(
            ai(vec![issue("f.rs", 1, "t", None)]),
            Some(tests),
            &AggregationConfig::default(),
        );
        assert_eq!(out.counts_by_source.get("ai"), Some(&1));
        assert_eq!(out.counts_by_source.get("tests"), Some(&1));
        assert!(out.summary.ends_with("Tests: 10 passed, 1 failed."));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let input = vec![
            issue("a.rs", 5, "Same Title", Some(0.8)),
            issue("a.rs", 5, "same title", Some(0.8)),
        ];
        let a = aggregate(ai(input.clone()), None, &AggregationConfig::default());
        let b = aggregate(ai(input), None, &AggregationConfig::default());
        assert_eq!(a.total_after_dedup, b.total_after_dedup);
        assert_eq!(a.issues.len(), b.issues.len());
        assert_eq!(a.summary, b.summary);
    }

    #[test]
    fn lowering_min_confidence_never_removes_issues() {
        let input = vec![
            issue("f.rs", 1, "one", Some(0.6)),
            issue("f.rs", 2, "two", Some(0.9)),
        ];
        let strict = AggregationConfig {
            min_confidence: 0.8,
            ..Default::default()
        };
        let lax = AggregationConfig {
            min_confidence: 0.5,
            ..Default::default()
        };
        let strict_out = aggregate(ai(input.clone()), None, &strict);
        let lax_out = aggregate(ai(input), None, &lax);
        assert!(lax_out.issues.len() >= strict_out.issues.len());
    }
}
