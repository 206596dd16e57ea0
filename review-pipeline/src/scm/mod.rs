//! SCM facade without async-trait or dynamic trait objects.
//!
//! One enum `ScmClient` with concrete implementations per provider plus an
//! in-memory stub for tests and dry runs. Plain async fns, enum dispatch.

pub mod types;
pub use types::*;

pub mod github;
pub mod gitlab;
pub mod stub;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::errors::{Error, PipelineResult};

/// Runtime configuration for any SCM client.
#[derive(Debug, Clone)]
pub struct ScmConfig {
    pub kind: ProviderKind,
    /// API base, e.g. "https://api.github.com" or
    /// "https://gitlab.com/api/v4".
    pub base_api: String,
    /// Access token (PAT or app token).
    pub token: String,
    /// Per-call timeout, default 30s.
    pub timeout: Duration,
}

/// Per-provider client resolution for a process that serves both providers.
///
/// A provider without configured credentials resolves to a validation error
/// rather than a half-authenticated client.
#[derive(Debug, Clone, Default)]
pub struct ScmRouter {
    github: Option<ScmClient>,
    gitlab: Option<ScmClient>,
}

impl ScmRouter {
    pub fn new(github: Option<ScmClient>, gitlab: Option<ScmClient>) -> Self {
        Self { github, gitlab }
    }

    /// Routes every provider to one stub (tests, dry runs).
    pub fn stub(stub: stub::StubScm) -> Self {
        Self {
            github: Some(ScmClient::Stub(stub.clone())),
            gitlab: Some(ScmClient::Stub(stub)),
        }
    }

    pub fn client_for(&self, kind: ProviderKind) -> PipelineResult<&ScmClient> {
        let slot = match kind {
            ProviderKind::GitHub => self.github.as_ref(),
            ProviderKind::GitLab => self.gitlab.as_ref(),
        };
        slot.ok_or_else(|| {
            Error::Validation(format!("provider `{}` is not configured", kind.as_str()))
        })
    }
}

/// Concrete SCM client (enum dispatch).
#[derive(Debug, Clone)]
pub enum ScmClient {
    GitHub(github::GitHubClient),
    GitLab(gitlab::GitLabClient),
    Stub(stub::StubScm),
}

impl ScmClient {
    /// Constructs a concrete client from generic config.
    pub fn from_config(cfg: ScmConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("cr-agent/0.1")
            .timeout(cfg.timeout)
            .build()?;
        Ok(match cfg.kind {
            ProviderKind::GitHub => {
                Self::GitHub(github::GitHubClient::new(client, cfg.base_api, cfg.token))
            }
            ProviderKind::GitLab => {
                Self::GitLab(gitlab::GitLabClient::new(client, cfg.base_api, cfg.token))
            }
        })
    }

    /// Fetch change-request metadata (title/description/SHAs).
    pub async fn fetch_meta(&self, cr: &ChangeRequestRef) -> PipelineResult<ChangeRequestMeta> {
        match self {
            Self::GitHub(c) => c.get_meta(cr).await,
            Self::GitLab(c) => c.get_meta(cr).await,
            Self::Stub(c) => c.get_meta(cr),
        }
    }

    /// Fetch the raw unified diff text for the change request.
    pub async fn fetch_diff_text(&self, cr: &ChangeRequestRef) -> PipelineResult<String> {
        match self {
            Self::GitHub(c) => c.get_diff_text(cr).await,
            Self::GitLab(c) => c.get_diff_text(cr).await,
            Self::Stub(c) => c.get_diff_text(cr),
        }
    }

    /// Fetch file contents at a git ref. `Ok(None)` on 404.
    pub async fn fetch_file_raw(
        &self,
        cr: &ChangeRequestRef,
        path: &str,
        git_ref: &str,
    ) -> PipelineResult<Option<String>> {
        match self {
            Self::GitHub(c) => c.get_file_raw(cr, path, git_ref).await,
            Self::GitLab(c) => c.get_file_raw(cr, path, git_ref).await,
            Self::Stub(c) => c.get_file_raw(path),
        }
    }

    /// List repository file paths at a git ref, capped at `max`.
    pub async fn list_repository_files(
        &self,
        cr: &ChangeRequestRef,
        git_ref: &str,
        max: usize,
    ) -> PipelineResult<Vec<String>> {
        match self {
            Self::GitHub(c) => c.list_files(cr, git_ref, max).await,
            Self::GitLab(c) => c.list_files(cr, git_ref, max).await,
            Self::Stub(c) => c.list_files(max),
        }
    }

    /// Fetch commits (with touched files) since `since`, capped at `max`.
    pub async fn fetch_commit_history(
        &self,
        cr: &ChangeRequestRef,
        since: DateTime<Utc>,
        max: usize,
    ) -> PipelineResult<Vec<CommitInfo>> {
        match self {
            Self::GitHub(c) => c.get_commit_history(cr, since, max).await,
            Self::GitLab(c) => c.get_commit_history(cr, since, max).await,
            Self::Stub(c) => c.get_commit_history(since, max),
        }
    }

    /// Post the review summary comment on the change request.
    pub async fn post_summary_comment(
        &self,
        cr: &ChangeRequestRef,
        body: &str,
    ) -> PipelineResult<PostedComment> {
        match self {
            Self::GitHub(c) => c.post_summary_comment(cr, body).await,
            Self::GitLab(c) => c.post_summary_comment(cr, body).await,
            Self::Stub(c) => c.post_summary_comment(body),
        }
    }

    /// Post an inline comment anchored at a diff position.
    #[allow(clippy::too_many_arguments)]
    pub async fn post_inline_comment(
        &self,
        cr: &ChangeRequestRef,
        meta: &ChangeRequestMeta,
        path: &str,
        new_line: u32,
        position: i64,
        body: &str,
    ) -> PipelineResult<PostedComment> {
        match self {
            Self::GitHub(c) => c.post_inline_comment(cr, meta, path, position, body).await,
            Self::GitLab(c) => c.post_inline_comment(cr, meta, path, new_line, body).await,
            Self::Stub(c) => c.post_inline_comment(path, new_line, position, body),
        }
    }
}
