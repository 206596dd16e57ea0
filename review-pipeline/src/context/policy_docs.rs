//! Repository policy provider.
//!
//! Fetches a small, enumerated set of governance documents. Each kind probes
//! a fixed path order; the first available file wins. Content is truncated to
//! a character budget. Absent policies are silently skipped.

use tracing::debug;

use crate::scm::{ChangeRequestRef, ScmClient};

/// Which governance document a policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Contributing,
    CodeOfConduct,
    PullRequestTemplate,
    SecurityPolicy,
}

impl PolicyKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Contributing => "contributing guide",
            Self::CodeOfConduct => "code of conduct",
            Self::PullRequestTemplate => "pull request template",
            Self::SecurityPolicy => "security policy",
        }
    }

    /// Probe order per kind; first hit wins.
    fn candidate_paths(&self) -> &'static [&'static str] {
        match self {
            Self::Contributing => &[
                "CONTRIBUTING.md",
                ".github/CONTRIBUTING.md",
                "docs/CONTRIBUTING.md",
            ],
            Self::CodeOfConduct => &["CODE_OF_CONDUCT.md", ".github/CODE_OF_CONDUCT.md"],
            Self::PullRequestTemplate => &[
                ".github/PULL_REQUEST_TEMPLATE.md",
                "PULL_REQUEST_TEMPLATE.md",
                "docs/pull_request_template.md",
            ],
            Self::SecurityPolicy => &["SECURITY.md", ".github/SECURITY.md", "docs/SECURITY.md"],
        }
    }

    fn all() -> [PolicyKind; 4] {
        [
            Self::Contributing,
            Self::CodeOfConduct,
            Self::PullRequestTemplate,
            Self::SecurityPolicy,
        ]
    }
}

/// One fetched policy document.
#[derive(Debug, Clone)]
pub struct RepoPolicy {
    pub kind: PolicyKind,
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

/// Fetches every present policy, truncated to `max_chars` each.
pub async fn fetch_policies(
    scm: &ScmClient,
    cr: &ChangeRequestRef,
    head_sha: &str,
    max_chars: usize,
) -> Vec<RepoPolicy> {
    let mut out = Vec::new();
    for kind in PolicyKind::all() {
        for path in kind.candidate_paths() {
            match scm.fetch_file_raw(cr, path, head_sha).await {
                Ok(Some(content)) => {
                    let (content, truncated) = truncate_chars(&content, max_chars);
                    out.push(RepoPolicy {
                        kind,
                        path: path.to_string(),
                        content,
                        truncated,
                    });
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    // Best-effort: a failing probe behaves like an absent file.
                    debug!(path, error = %e, "policy probe degraded");
                    continue;
                }
            }
        }
    }
    out
}

fn truncate_chars(content: &str, max_chars: usize) -> (String, bool) {
    if content.chars().count() <= max_chars {
        return (content.to_string(), false);
    }
    (content.chars().take(max_chars).collect(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::stub::StubScm;
    use crate::scm::ProviderKind;
    use pretty_assertions::assert_eq;

    fn cr() -> ChangeRequestRef {
        ChangeRequestRef::new(ProviderKind::GitHub, "acme/app", 3).unwrap()
    }

    #[tokio::test]
    async fn first_candidate_path_wins() {
        let scm = ScmClient::Stub(
            StubScm::new()
                .with_file("CONTRIBUTING.md", "root guide")
                .with_file(".github/CONTRIBUTING.md", "nested guide"),
        );
        let policies = fetch_policies(&scm, &cr(), "head", 1000).await;
        let contributing = policies
            .iter()
            .find(|p| p.kind == PolicyKind::Contributing)
            .unwrap();
        assert_eq!(contributing.path, "CONTRIBUTING.md");
        assert_eq!(contributing.content, "root guide");
    }

    #[tokio::test]
    async fn absent_policies_are_skipped() {
        let scm = ScmClient::Stub(StubScm::new().with_file("SECURITY.md", "report privately"));
        let policies = fetch_policies(&scm, &cr(), "head", 1000).await;
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].kind, PolicyKind::SecurityPolicy);
    }

    #[tokio::test]
    async fn content_is_truncated_to_budget() {
        let scm = ScmClient::Stub(StubScm::new().with_file("CONTRIBUTING.md", "0123456789abc"));
        let policies = fetch_policies(&scm, &cr(), "head", 10).await;
        assert!(policies[0].truncated);
        assert_eq!(policies[0].content, "0123456789");
    }
}
