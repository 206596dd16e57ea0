//! GitHub provider (REST v3) for PR metadata, diffs, files and comments.
//!
//! Endpoints used:
//! - GET  /repos/:repo/pulls/:n                    (meta; diff via media type)
//! - GET  /repos/:repo/contents/:path?ref=         (raw file)
//! - GET  /repos/:repo/git/trees/:sha?recursive=1  (inventory)
//! - GET  /repos/:repo/commits?since=              (history, then per-commit)
//! - POST /repos/:repo/issues/:n/comments          (summary)
//! - POST /repos/:repo/pulls/:n/comments           (inline, diff position)

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::errors::{PipelineResult, ScmError};
use crate::scm::types::*;

/// How many commits we are willing to expand into file lists per window.
const HISTORY_DETAIL_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    base_api: String, // e.g. "https://api.github.com"
    token: String,
}

impl GitHubClient {
    pub fn new(http: Client, base_api: String, token: String) -> Self {
        Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }

    pub async fn get_meta(&self, cr: &ChangeRequestRef) -> PipelineResult<ChangeRequestMeta> {
        let url = format!(
            "{}/repos/{}/pulls/{}",
            self.base_api, cr.repository_id, cr.number
        );
        let resp: GitHubPull = self
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ChangeRequestMeta {
            title: resp.title,
            description: resp.body,
            source_branch: Some(resp.head.r#ref),
            target_branch: Some(resp.base.r#ref),
            web_url: resp.html_url,
            diff_refs: DiffRefs {
                base_sha: resp.base.sha,
                start_sha: None,
                head_sha: resp.head.sha,
            },
        })
    }

    /// Fetches the PR as raw unified diff via the diff media type.
    pub async fn get_diff_text(&self, cr: &ChangeRequestRef) -> PipelineResult<String> {
        let url = format!(
            "{}/repos/{}/pulls/{}",
            self.base_api, cr.repository_id, cr.number
        );
        let text = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github.v3.diff")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }

    /// Raw file at a ref; `Ok(None)` when the path is absent there.
    pub async fn get_file_raw(
        &self,
        cr: &ChangeRequestRef,
        path: &str,
        git_ref: &str,
    ) -> PipelineResult<Option<String>> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.base_api,
            cr.repository_id,
            urlencoding::encode(path).replace("%2F", "/"),
            urlencoding::encode(git_ref)
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let text = resp.error_for_status()?.text().await?;
        Ok(Some(text))
    }

    /// Blob paths of the repository tree at a ref.
    pub async fn list_files(
        &self,
        cr: &ChangeRequestRef,
        git_ref: &str,
        max: usize,
    ) -> PipelineResult<Vec<String>> {
        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.base_api,
            cr.repository_id,
            urlencoding::encode(git_ref)
        );
        let resp: GitHubTree = self
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp
            .tree
            .into_iter()
            .filter(|e| e.r#type == "blob")
            .map(|e| e.path)
            .take(max)
            .collect())
    }

    /// Commits since `since`, expanded to their touched files.
    pub async fn get_commit_history(
        &self,
        cr: &ChangeRequestRef,
        since: DateTime<Utc>,
        max: usize,
    ) -> PipelineResult<Vec<CommitInfo>> {
        let limit = max.min(HISTORY_DETAIL_CAP);
        let url = format!(
            "{}/repos/{}/commits?since={}&per_page={}",
            self.base_api,
            cr.repository_id,
            urlencoding::encode(&since.to_rfc3339()),
            limit
        );
        let listed: Vec<GitHubCommitListItem> = self
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(commits = listed.len(), "github history listed");

        let mut out = Vec::with_capacity(listed.len());
        for item in listed.into_iter().take(limit) {
            let detail_url = format!(
                "{}/repos/{}/commits/{}",
                self.base_api, cr.repository_id, item.sha
            );
            let detail: GitHubCommitDetail = self
                .get(&detail_url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            out.push(CommitInfo {
                sha: item.sha,
                authored_at: item.commit.author.and_then(|a| a.date),
                files: detail
                    .files
                    .unwrap_or_default()
                    .into_iter()
                    .map(|f| f.filename)
                    .collect(),
            });
        }
        Ok(out)
    }

    pub async fn post_summary_comment(
        &self,
        cr: &ChangeRequestRef,
        body: &str,
    ) -> PipelineResult<PostedComment> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_api, cr.repository_id, cr.number
        );
        let resp: GitHubComment = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "body": body }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(PostedComment {
            id: resp.id.to_string(),
        })
    }

    /// Inline review comment anchored by diff position.
    pub async fn post_inline_comment(
        &self,
        cr: &ChangeRequestRef,
        meta: &ChangeRequestMeta,
        path: &str,
        position: i64,
        body: &str,
    ) -> PipelineResult<PostedComment> {
        if position <= 0 {
            return Err(ScmError::InvalidResponse(format!(
                "non-positive diff position {position} for {path}"
            ))
            .into());
        }
        let url = format!(
            "{}/repos/{}/pulls/{}/comments",
            self.base_api, cr.repository_id, cr.number
        );
        let resp: GitHubComment = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({
                "body": body,
                "commit_id": meta.diff_refs.head_sha,
                "path": path,
                "position": position,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(PostedComment {
            id: resp.id.to_string(),
        })
    }
}

/* ------------------------- wire DTOs ------------------------- */

#[derive(Deserialize)]
struct GitHubPull {
    title: String,
    body: Option<String>,
    html_url: Option<String>,
    head: GitHubBranchRef,
    base: GitHubBranchRef,
}

#[derive(Deserialize)]
struct GitHubBranchRef {
    r#ref: String,
    sha: String,
}

#[derive(Deserialize)]
struct GitHubTree {
    tree: Vec<GitHubTreeEntry>,
}

#[derive(Deserialize)]
struct GitHubTreeEntry {
    path: String,
    r#type: String,
}

#[derive(Deserialize)]
struct GitHubCommitListItem {
    sha: String,
    commit: GitHubCommitMeta,
}

#[derive(Deserialize)]
struct GitHubCommitMeta {
    author: Option<GitHubCommitAuthor>,
}

#[derive(Deserialize)]
struct GitHubCommitAuthor {
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct GitHubCommitDetail {
    files: Option<Vec<GitHubCommitFile>>,
}

#[derive(Deserialize)]
struct GitHubCommitFile {
    filename: String,
}

#[derive(Deserialize)]
struct GitHubComment {
    id: u64,
}
