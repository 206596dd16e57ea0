//! GitLab provider (REST v4) for MR metadata, diffs, files and comments.
//!
//! Endpoints used:
//! - GET  /projects/:id/merge_requests/:iid            (meta with diff_refs)
//! - GET  /projects/:id/merge_requests/:iid/raw_diffs  (unified diff text)
//! - GET  /projects/:id/repository/files/:path/raw     (raw file)
//! - GET  /projects/:id/repository/tree?recursive=true (inventory)
//! - GET  /projects/:id/repository/commits?since=      (history, then diffs)
//! - POST /projects/:id/merge_requests/:iid/notes      (summary)
//! - POST /projects/:id/merge_requests/:iid/discussions (inline with position)

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::errors::PipelineResult;
use crate::scm::types::*;

const HISTORY_DETAIL_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    base_api: String, // e.g. "https://gitlab.com/api/v4"
    token: String,    // "PRIVATE-TOKEN"
}

impl GitLabClient {
    pub fn new(http: Client, base_api: String, token: String) -> Self {
        Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn project(&self, cr: &ChangeRequestRef) -> String {
        urlencoding::encode(&cr.repository_id).into_owned()
    }

    pub async fn get_meta(&self, cr: &ChangeRequestRef) -> PipelineResult<ChangeRequestMeta> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}",
            self.base_api,
            self.project(cr),
            cr.number
        );
        let resp: GitLabMr = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ChangeRequestMeta {
            title: resp.title,
            description: resp.description,
            source_branch: Some(resp.source_branch),
            target_branch: Some(resp.target_branch),
            web_url: resp.web_url,
            diff_refs: DiffRefs {
                base_sha: resp.diff_refs.base_sha,
                start_sha: Some(resp.diff_refs.start_sha),
                head_sha: resp.diff_refs.head_sha,
            },
        })
    }

    pub async fn get_diff_text(&self, cr: &ChangeRequestRef) -> PipelineResult<String> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/raw_diffs",
            self.base_api,
            self.project(cr),
            cr.number
        );
        let text = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }

    pub async fn get_file_raw(
        &self,
        cr: &ChangeRequestRef,
        path: &str,
        git_ref: &str,
    ) -> PipelineResult<Option<String>> {
        let url = format!(
            "{}/projects/{}/repository/files/{}/raw?ref={}",
            self.base_api,
            self.project(cr),
            urlencoding::encode(path),
            urlencoding::encode(git_ref)
        );
        let resp = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let text = resp.error_for_status()?.text().await?;
        Ok(Some(text))
    }

    pub async fn list_files(
        &self,
        cr: &ChangeRequestRef,
        git_ref: &str,
        max: usize,
    ) -> PipelineResult<Vec<String>> {
        let url = format!(
            "{}/projects/{}/repository/tree?recursive=true&per_page={}&ref={}",
            self.base_api,
            self.project(cr),
            max.min(100),
            urlencoding::encode(git_ref)
        );
        let entries: Vec<GitLabTreeEntry> = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.r#type == "blob")
            .map(|e| e.path)
            .take(max)
            .collect())
    }

    pub async fn get_commit_history(
        &self,
        cr: &ChangeRequestRef,
        since: DateTime<Utc>,
        max: usize,
    ) -> PipelineResult<Vec<CommitInfo>> {
        let limit = max.min(HISTORY_DETAIL_CAP);
        let url = format!(
            "{}/projects/{}/repository/commits?since={}&per_page={}",
            self.base_api,
            self.project(cr),
            urlencoding::encode(&since.to_rfc3339()),
            limit
        );
        let listed: Vec<GitLabCommit> = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(commits = listed.len(), "gitlab history listed");

        let mut out = Vec::with_capacity(listed.len());
        for item in listed.into_iter().take(limit) {
            let diff_url = format!(
                "{}/projects/{}/repository/commits/{}/diff",
                self.base_api,
                self.project(cr),
                item.id
            );
            let diffs: Vec<GitLabCommitDiff> = self
                .http
                .get(&diff_url)
                .header("PRIVATE-TOKEN", &self.token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            out.push(CommitInfo {
                sha: item.id,
                authored_at: item.created_at,
                files: diffs.into_iter().map(|d| d.new_path).collect(),
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
            "{}/projects/{}/merge_requests/{}/notes",
            self.base_api,
            self.project(cr),
            cr.number
        );
        let resp: GitLabNote = self
            .http
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
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

    /// Inline discussion bound to the new file line via MR diff refs.
    pub async fn post_inline_comment(
        &self,
        cr: &ChangeRequestRef,
        meta: &ChangeRequestMeta,
        path: &str,
        new_line: u32,
        body: &str,
    ) -> PipelineResult<PostedComment> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/discussions",
            self.base_api,
            self.project(cr),
            cr.number
        );
        let position = json!({
            "position_type": "text",
            "base_sha": meta.diff_refs.base_sha,
            "start_sha": meta.diff_refs.start_sha.clone().unwrap_or_default(),
            "head_sha": meta.diff_refs.head_sha,
            "new_path": path,
            "new_line": new_line,
        });
        let resp: GitLabDiscussion = self
            .http
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&json!({ "body": body, "position": position }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(PostedComment { id: resp.id })
    }
}

/* ------------------------- wire DTOs ------------------------- */

#[derive(Deserialize)]
struct GitLabMr {
    title: String,
    description: Option<String>,
    source_branch: String,
    target_branch: String,
    web_url: Option<String>,
    diff_refs: GitLabDiffRefs,
}

#[derive(Deserialize)]
struct GitLabDiffRefs {
    base_sha: String,
    start_sha: String,
    head_sha: String,
}

#[derive(Deserialize)]
struct GitLabTreeEntry {
    path: String,
    r#type: String,
}

#[derive(Deserialize)]
struct GitLabCommit {
    id: String,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct GitLabCommitDiff {
    new_path: String,
}

#[derive(Deserialize)]
struct GitLabNote {
    id: u64,
}

#[derive(Deserialize)]
struct GitLabDiscussion {
    id: String,
}
