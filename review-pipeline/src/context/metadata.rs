//! Metadata strategy: import and type references found in the diff text.
//!
//! Language-agnostic by design: permissive regexes pull module paths out of
//! import-like lines and capitalized type tokens out of added code, then both
//! are resolved against the repository inventory.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use super::types::{ContextMatch, MatchReason};
use crate::diff::{DiffDocument, LineMarker};

lazy_static! {
    /// Import-like constructs across ecosystems: `import x.y.Z`,
    /// `use a::b::C`, `from m import n`, `#include "p/q.h"`, `require('x')`.
    static ref IMPORT_RE: Regex = Regex::new(
        r#"(?m)^\s*(?:import\s+([\w./:-]+)|use\s+([\w:]+)|from\s+([\w./]+)\s+import|#include\s+[<"]([\w./-]+)[>"]|require\(['"]([\w./@-]+)['"]\))"#
    )
    .expect("static import regex");

    /// Capitalized identifiers that look like type names.
    static ref TYPE_RE: Regex =
        Regex::new(r"\b([A-Z][A-Za-z0-9]{2,})\b").expect("static type regex");
}

#[derive(Debug, Clone, Default)]
pub struct MetadataStrategy;

impl MetadataStrategy {
    /// Resolves import/type references from added and context lines against
    /// the repository inventory.
    pub fn run(&self, diff: &DiffDocument, inventory: &[String]) -> Vec<ContextMatch> {
        let modified: HashSet<&str> = diff.modified_paths().into_iter().collect();

        let mut import_refs: HashSet<String> = HashSet::new();
        let mut type_refs: HashSet<String> = HashSet::new();

        for file in &diff.files {
            for hunk in &file.hunks {
                for line in &hunk.lines {
                    if !matches!(line.marker, LineMarker::Addition | LineMarker::Context) {
                        continue;
                    }
                    for cap in IMPORT_RE.captures_iter(&line.text) {
                        for group in 1..=5 {
                            if let Some(m) = cap.get(group) {
                                import_refs.insert(m.as_str().to_string());
                            }
                        }
                    }
                    if matches!(line.marker, LineMarker::Addition) {
                        for cap in TYPE_RE.captures_iter(&line.text) {
                            type_refs.insert(cap[1].to_string());
                        }
                    }
                }
            }
        }

        let mut out = Vec::new();
        let mut nominated: HashSet<&str> = HashSet::new();

        for candidate in inventory {
            if modified.contains(candidate.as_str()) {
                continue;
            }
            if let Some(reference) = import_refs
                .iter()
                .find(|r| path_matches_reference(candidate, r))
            {
                if nominated.insert(candidate.as_str()) {
                    out.push(ContextMatch {
                        path: candidate.clone(),
                        reason: MatchReason::DirectImport,
                        confidence: MatchReason::DirectImport.baseline_confidence(),
                        evidence: format!("imported as {reference}"),
                    });
                }
                continue;
            }
            if let Some(type_name) = type_refs.iter().find(|t| stem_matches_type(candidate, t)) {
                if nominated.insert(candidate.as_str()) {
                    out.push(ContextMatch {
                        path: candidate.clone(),
                        reason: MatchReason::TypeReference,
                        confidence: MatchReason::TypeReference.baseline_confidence(),
                        evidence: format!("referenced type {type_name}"),
                    });
                }
            }
        }

        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

/// Does `reference` (dot/colon/slash separated) resolve to `path`?
fn path_matches_reference(path: &str, reference: &str) -> bool {
    let normalized = reference
        .replace("::", "/")
        .replace('.', "/")
        .to_ascii_lowercase();
    let last = match normalized.rsplit('/').next() {
        Some(l) if !l.is_empty() => l.to_string(),
        _ => return false,
    };
    let stem = file_stem(path).to_ascii_lowercase();
    if stem != last {
        return false;
    }
    // Require some overlap beyond the stem for multi-segment references.
    let path_lower = path.to_ascii_lowercase();
    normalized
        .rsplit('/')
        .nth(1)
        .map(|parent| path_lower.contains(parent))
        .unwrap_or(true)
}

/// `UserService` matches `UserService.java` and `user_service.rs`.
fn stem_matches_type(path: &str, type_name: &str) -> bool {
    let stem = file_stem(path);
    if stem == type_name {
        return true;
    }
    let snake = to_snake_case(type_name);
    stem == snake
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name)
}

fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parse;
    use pretty_assertions::assert_eq;

    fn diff_with_added(path: &str, added: &[&str]) -> DiffDocument {
        let mut body = String::new();
        body.push_str(&format!(
            "--- a/{path}\n+++ b/{path}\n@@ -1,0 +1,{} @@\n",
            added.len()
        ));
        for line in added {
            body.push_str(&format!("+{line}\n"));
        }
        parse(&body).unwrap()
    }

    #[test]
    fn resolves_java_import() {
        let diff = diff_with_added(
            "src/main/java/acme/UserService.java",
            &["import acme.dao.UserRepository;"],
        );
        let inv = vec![
            "src/main/java/acme/dao/UserRepository.java".to_string(),
            "src/main/java/acme/dao/OrderRepository.java".to_string(),
        ];
        let matches = MetadataStrategy.run(&diff, &inv);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/main/java/acme/dao/UserRepository.java");
        assert_eq!(matches[0].reason, MatchReason::DirectImport);
    }

    #[test]
    fn resolves_rust_use() {
        let diff = diff_with_added("src/pipeline.rs", &["use crate::scm::client;"]);
        let inv = vec!["src/scm/client.rs".to_string()];
        let matches = MetadataStrategy.run(&diff, &inv);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].reason, MatchReason::DirectImport);
    }

    #[test]
    fn resolves_type_reference_to_snake_case_file() {
        let diff = diff_with_added("src/handler.rs", &["let store = ReviewStore::new();"]);
        let inv = vec!["src/review_store.rs".to_string()];
        let matches = MetadataStrategy.run(&diff, &inv);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].reason, MatchReason::TypeReference);
    }

    #[test]
    fn ignores_deleted_lines() {
        let diff = parse(
            "--- a/src/x.rs\n+++ b/src/x.rs\n@@ -1,1 +1,1 @@\n-use crate::old_module;\n+let y = 1;\n",
        )
        .unwrap();
        let inv = vec!["src/old_module.rs".to_string()];
        assert!(MetadataStrategy.run(&diff, &inv).is_empty());
    }
}
