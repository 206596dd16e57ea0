//! In-memory SCM stub for tests and dry runs.
//!
//! Preloaded with metadata, diff text, file contents, an inventory and a
//! commit history; records every posted comment so tests can assert on the
//! publication side effects. Individual operations can be scripted to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::errors::{PipelineResult, ScmError};
use crate::scm::types::*;

/// One recorded publication, inline or summary.
#[derive(Debug, Clone)]
pub struct RecordedComment {
    pub id: String,
    /// `None` for summary comments.
    pub path: Option<String>,
    pub new_line: Option<u32>,
    pub position: Option<i64>,
    pub body: String,
}

#[derive(Debug, Default)]
struct StubState {
    meta: ChangeRequestMeta,
    diff_text: String,
    files: HashMap<String, String>,
    inventory: Vec<String>,
    history: Vec<CommitInfo>,
    posted: Vec<RecordedComment>,
    fail_inline_paths: Vec<String>,
    fail_diff_fetch: bool,
}

/// Shared-state stub; clones observe the same recordings.
#[derive(Debug, Clone, Default)]
pub struct StubScm {
    state: Arc<Mutex<StubState>>,
    next_id: Arc<AtomicU64>,
}

impl StubScm {
    pub fn new() -> Self {
        Self::default()
    }

    /* ---------- builders ---------- */

    pub fn with_meta(self, meta: ChangeRequestMeta) -> Self {
        self.lock().meta = meta;
        self
    }

    pub fn with_diff(self, diff_text: &str) -> Self {
        self.lock().diff_text = diff_text.to_string();
        self
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        {
            let mut s = self.lock();
            s.files.insert(path.to_string(), content.to_string());
            s.inventory.push(path.to_string());
        }
        self
    }

    pub fn with_inventory<I: IntoIterator<Item = String>>(self, paths: I) -> Self {
        self.lock().inventory.extend(paths);
        self
    }

    pub fn with_history(self, history: Vec<CommitInfo>) -> Self {
        self.lock().history = history;
        self
    }

    /// Makes inline posting fail for the given path.
    pub fn failing_inline_for(self, path: &str) -> Self {
        self.lock().fail_inline_paths.push(path.to_string());
        self
    }

    /// Makes the diff fetch fail with a server error.
    pub fn failing_diff_fetch(self) -> Self {
        self.lock().fail_diff_fetch = true;
        self
    }

    /* ---------- assertions ---------- */

    pub fn posted_comments(&self) -> Vec<RecordedComment> {
        self.lock().posted.clone()
    }

    pub fn posted_summaries(&self) -> Vec<RecordedComment> {
        self.lock()
            .posted
            .iter()
            .filter(|c| c.path.is_none())
            .cloned()
            .collect()
    }

    pub fn posted_inline(&self) -> Vec<RecordedComment> {
        self.lock()
            .posted
            .iter()
            .filter(|c| c.path.is_some())
            .cloned()
            .collect()
    }

    /* ---------- client surface ---------- */

    pub fn get_meta(&self, _cr: &ChangeRequestRef) -> PipelineResult<ChangeRequestMeta> {
        Ok(self.lock().meta.clone())
    }

    pub fn get_diff_text(&self, _cr: &ChangeRequestRef) -> PipelineResult<String> {
        let s = self.lock();
        if s.fail_diff_fetch {
            return Err(ScmError::Server(502).into());
        }
        Ok(s.diff_text.clone())
    }

    pub fn get_file_raw(&self, path: &str) -> PipelineResult<Option<String>> {
        Ok(self.lock().files.get(path).cloned())
    }

    pub fn list_files(&self, max: usize) -> PipelineResult<Vec<String>> {
        Ok(self.lock().inventory.iter().take(max).cloned().collect())
    }

    pub fn get_commit_history(
        &self,
        since: DateTime<Utc>,
        max: usize,
    ) -> PipelineResult<Vec<CommitInfo>> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|c| c.authored_at.map(|t| t >= since).unwrap_or(true))
            .take(max)
            .cloned()
            .collect())
    }

    pub fn post_summary_comment(&self, body: &str) -> PipelineResult<PostedComment> {
        let id = self.make_id();
        self.lock().posted.push(RecordedComment {
            id: id.clone(),
            path: None,
            new_line: None,
            position: None,
            body: body.to_string(),
        });
        Ok(PostedComment { id })
    }

    pub fn post_inline_comment(
        &self,
        path: &str,
        new_line: u32,
        position: i64,
        body: &str,
    ) -> PipelineResult<PostedComment> {
        if self.lock().fail_inline_paths.iter().any(|p| p == path) {
            return Err(ScmError::Server(500).into());
        }
        let id = self.make_id();
        self.lock().posted.push(RecordedComment {
            id: id.clone(),
            path: Some(path.to_string()),
            new_line: Some(new_line),
            position: Some(position),
            body: body.to_string(),
        });
        Ok(PostedComment { id })
    }

    fn make_id(&self) -> String {
        format!("stub-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().expect("stub state poisoned")
    }
}
