//! Publisher: posts aggregated findings back to the change request.
//!
//! One summary comment (title + finding count + top severities), then one
//! inline comment per issue anchored via the position mapper. Issues whose
//! line has no diff position are kept in the summary with
//! `fallback_reason = INVALID_LINE` and never posted inline. Per-issue
//! failures are surfaced in the report without aborting the batch.
//! Publication is idempotent per issue: an already recorded `scm_comment_id`
//! skips the repost. Dry-run computes and logs actions without calling the
//! SCM.

use serde_json::json;
use tracing::{debug, info, warn};

use crate::diff::DiffDocument;
use crate::diff::position::position_for;
use crate::errors::PipelineResult;
use crate::findings::{AggregatedFindings, normalize_severity};
use crate::scm::{ChangeRequestMeta, ChangeRequestRef, ScmClient};

/// Fallback marker for issues that cannot be anchored inline.
pub const FALLBACK_INVALID_LINE: &str = "INVALID_LINE";

/// Configuration for the publishing step.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// If true, compute and log actions without calling the SCM.
    pub dry_run: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            dry_run: env_bool("PUBLISH_DRY_RUN", false),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Per-issue publication outcome.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub file: String,
    pub start_line: u32,
    pub posted: bool,
    pub scm_comment_id: Option<String>,
    pub fallback_reason: Option<String>,
    pub error: Option<String>,
}

/// Result of one publish run.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub summary_comment_id: Option<String>,
    pub inline_posted: u32,
    pub fallbacks: u32,
    pub failures: u32,
    pub outcomes: Vec<IssueOutcome>,
}

/// Publishes the findings; mutates the issues with posted comment ids and
/// fallback reasons so the caller can persist the publication state.
pub async fn publish(
    scm: &ScmClient,
    cr: &ChangeRequestRef,
    meta: &ChangeRequestMeta,
    findings: &mut AggregatedFindings,
    diff: &DiffDocument,
    cfg: &PublishConfig,
) -> PipelineResult<PublishReport> {
    let mut report = PublishReport::default();

    // Resolve positions first so the summary can list unanchorable issues.
    let positions: Vec<i64> = findings
        .issues
        .iter()
        .map(|i| position_for(diff, &i.file, i.start_line))
        .collect();

    for (issue, pos) in findings.issues.iter_mut().zip(&positions) {
        issue.position_metadata = Some(json!({ "position": pos }).to_string());
        if *pos <= 0 && issue.scm_comment_id.is_none() {
            issue.fallback_reason = Some(FALLBACK_INVALID_LINE.to_string());
        }
    }

    let summary_body = render_summary(meta, findings, &positions);

    if cfg.dry_run {
        info!(
            issues = findings.issues.len(),
            "dry-run: would post summary and inline comments"
        );
        debug!(summary = %summary_body, "dry-run summary body");
        for issue in &findings.issues {
            report.outcomes.push(IssueOutcome {
                file: issue.file.clone(),
                start_line: issue.start_line,
                posted: false,
                scm_comment_id: issue.scm_comment_id.clone(),
                fallback_reason: issue.fallback_reason.clone(),
                error: None,
            });
        }
        return Ok(report);
    }

    let summary = scm.post_summary_comment(cr, &summary_body).await?;
    debug!(comment_id = %summary.id, "summary comment posted");
    report.summary_comment_id = Some(summary.id);

    for (issue, pos) in findings.issues.iter_mut().zip(&positions) {
        // Idempotency: the stored comment id wins over reposting.
        if issue.scm_comment_id.is_some() {
            debug!(file = %issue.file, line = issue.start_line, "inline already posted, skipping");
            report.outcomes.push(IssueOutcome {
                file: issue.file.clone(),
                start_line: issue.start_line,
                posted: false,
                scm_comment_id: issue.scm_comment_id.clone(),
                fallback_reason: None,
                error: None,
            });
            continue;
        }

        if *pos <= 0 {
            report.fallbacks += 1;
            report.outcomes.push(IssueOutcome {
                file: issue.file.clone(),
                start_line: issue.start_line,
                posted: false,
                scm_comment_id: None,
                fallback_reason: Some(FALLBACK_INVALID_LINE.to_string()),
                error: None,
            });
            continue;
        }

        let body = render_inline(issue);
        match scm
            .post_inline_comment(cr, meta, &issue.file, issue.start_line, *pos, &body)
            .await
        {
            Ok(posted) => {
                issue.inline_comment_posted = true;
                issue.scm_comment_id = Some(posted.id.clone());
                report.inline_posted += 1;
                report.outcomes.push(IssueOutcome {
                    file: issue.file.clone(),
                    start_line: issue.start_line,
                    posted: true,
                    scm_comment_id: Some(posted.id),
                    fallback_reason: None,
                    error: None,
                });
            }
            Err(e) => {
                warn!(file = %issue.file, line = issue.start_line, error = %e, "inline comment failed");
                report.failures += 1;
                report.outcomes.push(IssueOutcome {
                    file: issue.file.clone(),
                    start_line: issue.start_line,
                    posted: false,
                    scm_comment_id: None,
                    fallback_reason: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    info!(
        inline = report.inline_posted,
        fallbacks = report.fallbacks,
        failures = report.failures,
        "publish done"
    );
    Ok(report)
}

fn render_summary(
    meta: &ChangeRequestMeta,
    findings: &AggregatedFindings,
    positions: &[i64],
) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "## Automated review: {}\n\n{}\n",
        meta.title, findings.summary
    ));

    if !findings.counts_by_severity.is_empty() {
        let severities: Vec<String> = findings
            .counts_by_severity
            .iter()
            .map(|(sev, n)| format!("{n} {sev}"))
            .collect();
        body.push_str(&format!("\nSeverities: {}\n", severities.join(", ")));
    }

    let unanchored: Vec<String> = findings
        .issues
        .iter()
        .zip(positions)
        .filter(|(i, pos)| **pos <= 0 && i.scm_comment_id.is_none())
        .map(|(i, _)| {
            format!(
                "- `{}:{}` [{}] {}",
                i.file,
                i.start_line,
                normalize_severity(&i.severity).unwrap_or("unknown"),
                i.title
            )
        })
        .collect();
    if !unanchored.is_empty() {
        body.push_str("\nNot anchored to the diff:\n");
        for line in unanchored {
            body.push_str(&line);
            body.push('\n');
        }
    }
    body
}

fn render_inline(issue: &crate::findings::Issue) -> String {
    let severity = normalize_severity(&issue.severity).unwrap_or("unknown");
    let mut body = format!("**[{}] {}**\n", severity, issue.title);
    if let Some(suggestion) = &issue.suggestion {
        body.push('\n');
        body.push_str(suggestion);
        body.push('\n');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregationConfig, aggregate};
    use crate::diff::parse;
    use crate::findings::{FindingSource, Issue, ReviewFindings};
    use crate::scm::stub::StubScm;
    use crate::scm::ProviderKind;
    use pretty_assertions::assert_eq;

    const DIFF: &str = "\
--- a/UserDAO.java
+++ b/UserDAO.java
@@ -10,2 +10,3 @@
     public User find(String id) {
+        String q = concat(id);
     }
";

    fn cr() -> ChangeRequestRef {
        ChangeRequestRef::new(ProviderKind::GitHub, "acme/app", 9).unwrap()
    }

    fn issue(file: &str, line: u32) -> Issue {
        Issue {
            file: file.to_string(),
            start_line: line,
            severity: "critical".to_string(),
            title: "SQL injection".to_string(),
            suggestion: Some("Use a bound parameter.".to_string()),
            confidence_score: Some(0.9),
            inline_comment_posted: false,
            scm_comment_id: None,
            fallback_reason: None,
            position_metadata: None,
            source: FindingSource::Ai,
        }
    }

    fn findings(issues: Vec<Issue>) -> AggregatedFindings {
        aggregate(
            ReviewFindings {
                summary: "Something to fix.".to_string(),
                issues,
                notes: Vec::new(),
            },
            None,
            &AggregationConfig::default(),
        )
    }

    #[tokio::test]
    async fn posts_summary_and_inline_with_recorded_id() {
        let stub = StubScm::new();
        let scm = ScmClient::Stub(stub.clone());
        let diff = parse(DIFF).unwrap();
        // Added line is new line 11.
        let mut agg = findings(vec![issue("UserDAO.java", 11)]);

        let report = publish(
            &scm,
            &cr(),
            &ChangeRequestMeta::default(),
            &mut agg,
            &diff,
            &PublishConfig { dry_run: false },
        )
        .await
        .unwrap();

        assert!(report.summary_comment_id.is_some());
        assert_eq!(report.inline_posted, 1);
        assert_eq!(stub.posted_summaries().len(), 1);
        assert_eq!(stub.posted_inline().len(), 1);
        assert!(stub.posted_inline()[0].position.unwrap() > 0);

        let published = &agg.issues[0];
        assert!(published.inline_comment_posted);
        assert!(published.scm_comment_id.is_some());
    }

    #[tokio::test]
    async fn invalid_line_falls_back_to_summary() {
        let stub = StubScm::new();
        let scm = ScmClient::Stub(stub.clone());
        let diff = parse(DIFF).unwrap();
        let mut agg = findings(vec![issue("UserDAO.java", 999)]);

        let report = publish(
            &scm,
            &cr(),
            &ChangeRequestMeta::default(),
            &mut agg,
            &diff,
            &PublishConfig { dry_run: false },
        )
        .await
        .unwrap();

        assert_eq!(report.inline_posted, 0);
        assert_eq!(report.fallbacks, 1);
        assert!(stub.posted_inline().is_empty());
        assert_eq!(
            agg.issues[0].fallback_reason.as_deref(),
            Some(FALLBACK_INVALID_LINE)
        );
        assert!(!agg.issues[0].inline_comment_posted);
        // The summary keeps the unanchored issue.
        assert!(stub.posted_summaries()[0].body.contains("UserDAO.java:999"));
    }

    #[tokio::test]
    async fn per_issue_failure_does_not_abort_batch() {
        let stub = StubScm::new().failing_inline_for("Broken.java");
        let scm = ScmClient::Stub(stub.clone());
        let diff = parse(&format!(
            "{}--- a/Broken.java\n+++ b/Broken.java\n@@ -1,1 +1,2 @@\n x\n+boom\n",
            DIFF
        ))
        .unwrap();
        let mut agg = findings(vec![issue("Broken.java", 2), issue("UserDAO.java", 11)]);

        let report = publish(
            &scm,
            &cr(),
            &ChangeRequestMeta::default(),
            &mut agg,
            &diff,
            &PublishConfig { dry_run: false },
        )
        .await
        .unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.inline_posted, 1);
        let good = agg
            .issues
            .iter()
            .find(|i| i.file == "UserDAO.java")
            .unwrap();
        assert!(good.inline_comment_posted);
    }

    #[tokio::test]
    async fn existing_comment_id_skips_repost() {
        let stub = StubScm::new();
        let scm = ScmClient::Stub(stub.clone());
        let diff = parse(DIFF).unwrap();
        let mut one = issue("UserDAO.java", 11);
        one.scm_comment_id = Some("prior-1".to_string());
        let mut agg = findings(vec![one]);

        let report = publish(
            &scm,
            &cr(),
            &ChangeRequestMeta::default(),
            &mut agg,
            &diff,
            &PublishConfig { dry_run: false },
        )
        .await
        .unwrap();

        assert_eq!(report.inline_posted, 0);
        assert!(stub.posted_inline().is_empty());
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let stub = StubScm::new();
        let scm = ScmClient::Stub(stub.clone());
        let diff = parse(DIFF).unwrap();
        let mut agg = findings(vec![issue("UserDAO.java", 11)]);

        let report = publish(
            &scm,
            &cr(),
            &ChangeRequestMeta::default(),
            &mut agg,
            &diff,
            &PublishConfig { dry_run: true },
        )
        .await
        .unwrap();

        assert!(report.summary_comment_id.is_none());
        assert!(stub.posted_comments().is_empty());
    }
}
