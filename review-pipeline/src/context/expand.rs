//! Diff expander: fetches current bodies of modified files.
//!
//! Created, deleted and binary files are skipped, extensions are filtered by
//! allow/deny lists, the expanded set is capped, and fetches run concurrently
//! with a bounded degree equal to the cap. Oversized files are truncated to a
//! line budget with an explicit marker.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::diff::DiffDocument;
use crate::scm::{ChangeRequestRef, ScmClient};

/// Marker appended to truncated expansions.
pub const TRUNCATION_MARKER: &str = "… [truncated]";

#[derive(Debug, Clone)]
pub struct ExpandConfig {
    /// Cap on expanded files; doubles as the fetch concurrency bound.
    pub max_files: usize,
    /// Line budget per file.
    pub max_lines: usize,
    /// When non-empty, only these extensions are expanded.
    pub allow_extensions: Vec<String>,
    /// Always skipped extensions.
    pub deny_extensions: Vec<String>,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            max_files: 8,
            max_lines: 400,
            allow_extensions: Vec::new(),
            deny_extensions: vec![
                "png".into(),
                "jpg".into(),
                "gif".into(),
                "pdf".into(),
                "lock".into(),
                "min.js".into(),
            ],
        }
    }
}

/// One expanded file body.
#[derive(Debug, Clone)]
pub struct ExpandedFile {
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

/// Fetches bodies for the eligible modified files, preserving diff order.
pub async fn expand_files(
    scm: &ScmClient,
    cr: &ChangeRequestRef,
    head_sha: &str,
    diff: &DiffDocument,
    cfg: &ExpandConfig,
) -> Vec<ExpandedFile> {
    let eligible: Vec<String> = diff
        .files
        .iter()
        .filter(|f| !f.is_created() && !f.is_deleted() && !f.is_binary)
        .filter_map(|f| f.effective_path())
        .filter(|p| extension_allowed(p, cfg))
        .take(cfg.max_files)
        .map(str::to_string)
        .collect();

    if eligible.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(cfg.max_files.max(1)));
    let mut set: JoinSet<(usize, Option<ExpandedFile>)> = JoinSet::new();

    for (idx, path) in eligible.iter().enumerate() {
        let scm = scm.clone();
        let cr = cr.clone();
        let head = head_sha.to_string();
        let path = path.clone();
        let max_lines = cfg.max_lines;
        let semaphore = semaphore.clone();

        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (idx, None);
            };
            match scm.fetch_file_raw(&cr, &path, &head).await {
                Ok(Some(content)) => {
                    let (content, truncated) = truncate_lines(&content, max_lines);
                    (
                        idx,
                        Some(ExpandedFile {
                            path,
                            content,
                            truncated,
                        }),
                    )
                }
                Ok(None) => {
                    debug!(%path, "file absent at head, skipping expansion");
                    (idx, None)
                }
                Err(e) => {
                    warn!(%path, error = %e, "file expansion degraded");
                    (idx, None)
                }
            }
        });
    }

    let mut slots: Vec<Option<ExpandedFile>> = vec![None; eligible.len()];
    while let Some(joined) = set.join_next().await {
        if let Ok((idx, file)) = joined {
            slots[idx] = file;
        }
    }
    slots.into_iter().flatten().collect()
}

fn extension_allowed(path: &str, cfg: &ExpandConfig) -> bool {
    let lower = path.to_ascii_lowercase();
    if cfg.deny_extensions.iter().any(|e| lower.ends_with(&format!(".{e}"))) {
        return false;
    }
    if cfg.allow_extensions.is_empty() {
        return true;
    }
    cfg.allow_extensions
        .iter()
        .any(|e| lower.ends_with(&format!(".{e}")))
}

/// Cuts `content` to `max_lines`, appending the truncation marker.
fn truncate_lines(content: &str, max_lines: usize) -> (String, bool) {
    let total = content.lines().count();
    if total <= max_lines {
        return (content.to_string(), false);
    }
    let mut out: String = content
        .lines()
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out.push_str(TRUNCATION_MARKER);
    (out, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parse;
    use crate::scm::stub::StubScm;
    use crate::scm::ProviderKind;
    use pretty_assertions::assert_eq;

    fn cr() -> ChangeRequestRef {
        ChangeRequestRef::new(ProviderKind::GitLab, "acme/app", 2).unwrap()
    }

    fn modify_diff(paths: &[&str]) -> DiffDocument {
        let mut text = String::new();
        for p in paths {
            text.push_str(&format!(
                "--- a/{p}\n+++ b/{p}\n@@ -1,1 +1,1 @@\n-x\n+y\n"
            ));
        }
        parse(&text).unwrap()
    }

    #[tokio::test]
    async fn expands_modified_files_in_diff_order() {
        let scm = ScmClient::Stub(
            StubScm::new()
                .with_file("src/a.rs", "fn a() {}")
                .with_file("src/b.rs", "fn b() {}"),
        );
        let diff = modify_diff(&["src/a.rs", "src/b.rs"]);
        let out = expand_files(&scm, &cr(), "head", &diff, &ExpandConfig::default()).await;
        let paths: Vec<&str> = out.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.rs", "src/b.rs"]);
    }

    #[tokio::test]
    async fn caps_file_count() {
        let scm = ScmClient::Stub(
            StubScm::new()
                .with_file("a.rs", "1")
                .with_file("b.rs", "2")
                .with_file("c.rs", "3"),
        );
        let diff = modify_diff(&["a.rs", "b.rs", "c.rs"]);
        let cfg = ExpandConfig {
            max_files: 2,
            ..Default::default()
        };
        let out = expand_files(&scm, &cr(), "head", &diff, &cfg).await;
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn truncates_long_files_with_marker() {
        let body = (0..100).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let scm = ScmClient::Stub(StubScm::new().with_file("big.rs", &body));
        let diff = modify_diff(&["big.rs"]);
        let cfg = ExpandConfig {
            max_lines: 10,
            ..Default::default()
        };
        let out = expand_files(&scm, &cr(), "head", &diff, &cfg).await;
        assert!(out[0].truncated);
        assert!(out[0].content.ends_with(TRUNCATION_MARKER));
        assert_eq!(out[0].content.lines().count(), 11);
    }

    #[tokio::test]
    async fn denied_extensions_are_skipped() {
        let scm = ScmClient::Stub(StubScm::new().with_file("logo.png", "binary-ish"));
        let diff = modify_diff(&["logo.png"]);
        let out = expand_files(&scm, &cr(), "head", &diff, &ExpandConfig::default()).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn created_files_are_not_expanded() {
        let diff = parse("--- /dev/null\n+++ b/new.rs\n@@ -0,0 +1,1 @@\n+fn n() {}\n").unwrap();
        let scm = ScmClient::Stub(StubScm::new().with_file("new.rs", "fn n() {}"));
        let out = expand_files(&scm, &cr(), "head", &diff, &ExpandConfig::default()).await;
        assert!(out.is_empty());
    }
}
