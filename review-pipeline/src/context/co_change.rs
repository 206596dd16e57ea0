//! Co-change strategy: files that historically change together.
//!
//! Queries the SCM commit history for the lookback window (capped at a
//! maximum commit count) and nominates files that co-occurred with any
//! modified file in at least two commits. Confidence is
//! `min(1, co_occurrences / 5)`.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use tracing::debug;

use super::types::{ContextMatch, MatchReason};
use crate::diff::DiffDocument;
use crate::errors::PipelineResult;
use crate::scm::{ChangeRequestRef, CommitInfo, ScmClient};

/// Minimum shared commits before a file counts as co-changing.
const MIN_CO_OCCURRENCES: u32 = 2;

#[derive(Debug, Clone)]
pub struct CoChangeStrategy {
    pub lookback_days: i64,
    pub max_commits: usize,
}

impl Default for CoChangeStrategy {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            max_commits: 200,
        }
    }
}

impl CoChangeStrategy {
    /// Fetches the history window and derives co-change matches.
    pub async fn run(
        &self,
        diff: &DiffDocument,
        scm: &ScmClient,
        cr: &ChangeRequestRef,
    ) -> PipelineResult<Vec<ContextMatch>> {
        let modified: HashSet<&str> = diff.modified_paths().into_iter().collect();
        if modified.is_empty() {
            return Ok(Vec::new());
        }

        let since = Utc::now() - Duration::days(self.lookback_days);
        let history = scm.fetch_commit_history(cr, since, self.max_commits).await?;
        debug!(
            commits = history.len(),
            lookback_days = self.lookback_days,
            "co-change history fetched"
        );
        Ok(co_change_matches(&history, &modified))
    }
}

/// Pure co-occurrence counting over a commit window.
pub fn co_change_matches(
    history: &[CommitInfo],
    modified: &HashSet<&str>,
) -> Vec<ContextMatch> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for commit in history {
        let touches_modified = commit.files.iter().any(|f| modified.contains(f.as_str()));
        if !touches_modified {
            continue;
        }
        for file in &commit.files {
            if modified.contains(file.as_str()) {
                continue;
            }
            *counts.entry(file.as_str()).or_insert(0) += 1;
        }
    }

    let mut out: Vec<ContextMatch> = counts
        .into_iter()
        .filter(|(_, n)| *n >= MIN_CO_OCCURRENCES)
        .map(|(path, n)| ContextMatch {
            path: path.to_string(),
            reason: MatchReason::CoChange,
            confidence: (n as f32 / 5.0).min(1.0),
            evidence: format!("co-changed in {n} commits"),
        })
        .collect();

    // Deterministic output: strongest first, then lexicographic.
    out.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.path.cmp(&b.path))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn commit(files: &[&str]) -> CommitInfo {
        CommitInfo {
            sha: "deadbeef".to_string(),
            authored_at: Some(Utc::now()),
            files: files.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn requires_two_shared_commits() {
        let modified: HashSet<&str> = ["src/a.rs"].into();
        let history = vec![
            commit(&["src/a.rs", "src/b.rs"]),
            commit(&["src/a.rs", "src/b.rs", "src/c.rs"]),
            commit(&["src/unrelated.rs", "src/c.rs"]),
        ];
        let matches = co_change_matches(&history, &modified);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/b.rs");
        assert_eq!(matches[0].reason, MatchReason::CoChange);
    }

    #[test]
    fn confidence_scales_and_caps_at_one() {
        let modified: HashSet<&str> = ["src/a.rs"].into();
        let history: Vec<CommitInfo> =
            (0..7).map(|_| commit(&["src/a.rs", "src/b.rs"])).collect();
        let matches = co_change_matches(&history, &modified);
        assert_eq!(matches[0].confidence, 1.0);

        let short: Vec<CommitInfo> =
            (0..3).map(|_| commit(&["src/a.rs", "src/b.rs"])).collect();
        let matches = co_change_matches(&short, &modified);
        assert!((matches[0].confidence - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn modified_files_are_excluded() {
        let modified: HashSet<&str> = ["src/a.rs", "src/b.rs"].into();
        let history = vec![
            commit(&["src/a.rs", "src/b.rs"]),
            commit(&["src/a.rs", "src/b.rs"]),
        ];
        assert!(co_change_matches(&history, &modified).is_empty());
    }
}
