//! Provider-agnostic data model for change requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Supported providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    GitHub,
    GitLab,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }

    /// Parses a path segment / persisted label (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Some(Self::GitHub),
            "gitlab" => Some(Self::GitLab),
            _ => None,
        }
    }
}

/// A unique reference to a change request inside a provider.
///
/// * `repository_id`: GitHub: "owner/repo"; GitLab: numeric ID or
///   "group/project".
/// * `number`: PR number or MR IID, strictly positive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChangeRequestRef {
    pub provider: ProviderKind,
    pub repository_id: String,
    pub number: u64,
}

impl ChangeRequestRef {
    /// Validated constructor; used by the API layer on inbound path params.
    pub fn new(provider: ProviderKind, repository_id: &str, number: u64) -> Result<Self, Error> {
        if repository_id.trim().is_empty() {
            return Err(Error::Validation("repository id must not be empty".into()));
        }
        if number == 0 {
            return Err(Error::Validation(
                "change request number must be positive".into(),
            ));
        }
        Ok(Self {
            provider,
            repository_id: repository_id.trim().to_string(),
            number,
        })
    }
}

impl std::fmt::Display for ChangeRequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}!{}",
            self.provider.as_str(),
            self.repository_id,
            self.number
        )
    }
}

/// Triple of SHAs used to bind inline comments reliably.
///
/// GitLab exposes base/start/head; GitHub exposes base/head. `start_sha`
/// stays optional to cover both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub start_sha: Option<String>,
    pub head_sha: String,
}

/// High-level metadata for a change request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeRequestMeta {
    pub title: String,
    pub description: Option<String>,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub web_url: Option<String>,
    pub diff_refs: DiffRefs,
}

/// One commit of the co-change history window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub authored_at: Option<DateTime<Utc>>,
    /// Paths touched by the commit.
    pub files: Vec<String>,
}

/// Provider acknowledgment of a posted comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedComment {
    /// Provider-scoped comment/discussion id.
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn provider_round_trip() {
        assert_eq!(ProviderKind::parse("github"), Some(ProviderKind::GitHub));
        assert_eq!(ProviderKind::parse("GitLab"), Some(ProviderKind::GitLab));
        assert_eq!(ProviderKind::parse("svn"), None);
    }

    #[test]
    fn ref_validation() {
        assert!(ChangeRequestRef::new(ProviderKind::GitHub, "acme/app", 1).is_ok());
        assert!(ChangeRequestRef::new(ProviderKind::GitHub, "  ", 1).is_err());
        assert!(ChangeRequestRef::new(ProviderKind::GitHub, "acme/app", 0).is_err());
    }
}
