//! Path-pattern strategy: nominates related files from path structure alone.
//!
//! Rules, in order of specificity:
//! 1. TEST_COUNTERPART: swap `test` ⇔ `main` path segments and the
//!    `…Test` / `…_test` stem suffix.
//! 2. SIBLING_FILE: same directory, same stem, different extension.
//! 3. SAME_PACKAGE: same parent directory.
//! 4. RELATED_LAYER: shared core stem with a different layer keyword.
//! 5. PARENT_PACKAGE: one directory is a prefix of the other.
//!
//! The modified file itself is never a match, nor is any other file already
//! present in the diff.

use std::collections::HashSet;

use super::types::{ContextMatch, MatchReason};
use crate::diff::DiffDocument;

/// Layer keywords recognized in file stems (closed set).
const LAYER_KEYWORDS: [&str; 10] = [
    "controller",
    "service",
    "repository",
    "dao",
    "model",
    "entity",
    "dto",
    "mapper",
    "adapter",
    "port",
];

#[derive(Debug, Clone, Default)]
pub struct PathPatternStrategy;

impl PathPatternStrategy {
    /// Scans the repository inventory for files related to the modified set.
    pub fn run(&self, diff: &DiffDocument, inventory: &[String]) -> Vec<ContextMatch> {
        let modified: Vec<&str> = diff.modified_paths();
        let modified_set: HashSet<&str> = modified.iter().copied().collect();
        let inventory_set: HashSet<&str> = inventory.iter().map(String::as_str).collect();

        let mut out: Vec<ContextMatch> = Vec::new();
        let mut nominated: HashSet<String> = HashSet::new();

        // Rule 1: explicit test-counterpart candidates, checked for existence.
        for m in &modified {
            for candidate in test_counterpart_candidates(m) {
                if candidate.as_str() != *m
                    && !modified_set.contains(candidate.as_str())
                    && inventory_set.contains(candidate.as_str())
                    && nominated.insert(candidate.clone())
                {
                    out.push(ContextMatch {
                        path: candidate,
                        reason: MatchReason::TestCounterpart,
                        confidence: MatchReason::TestCounterpart.baseline_confidence(),
                        evidence: format!("test counterpart of {m}"),
                    });
                }
            }
        }

        // Rules 2–5: one inventory scan, most specific relation wins.
        for candidate in inventory {
            if modified_set.contains(candidate.as_str()) || nominated.contains(candidate) {
                continue;
            }
            let mut best: Option<(MatchReason, String)> = None;
            for m in &modified {
                if let Some((reason, evidence)) = relate(candidate, m) {
                    let better = match &best {
                        Some((current, _)) => reason.priority() > current.priority(),
                        None => true,
                    };
                    if better {
                        best = Some((reason, evidence));
                    }
                }
            }
            if let Some((reason, evidence)) = best {
                nominated.insert(candidate.clone());
                out.push(ContextMatch {
                    path: candidate.clone(),
                    reason,
                    confidence: reason.baseline_confidence(),
                    evidence,
                });
            }
        }

        out
    }
}

/// Relation of one candidate file to one modified path, rules 2–5.
fn relate(candidate: &str, modified: &str) -> Option<(MatchReason, String)> {
    let cand_dir = parent_dir(candidate);
    let mod_dir = parent_dir(modified);

    if cand_dir == mod_dir {
        if stem(candidate) == stem(modified) {
            return Some((
                MatchReason::SiblingFile,
                format!("sibling of {modified}"),
            ));
        }
        return Some((
            MatchReason::SamePackage,
            format!("same package as {modified}"),
        ));
    }

    if let (Some(cand_core), Some(mod_core)) = (layer_core(candidate), layer_core(modified)) {
        if cand_core == mod_core {
            return Some((
                MatchReason::RelatedLayer,
                format!("layer counterpart of {modified}"),
            ));
        }
    }

    if dir_is_prefix(cand_dir, mod_dir) || dir_is_prefix(mod_dir, cand_dir) {
        return Some((
            MatchReason::ParentPackage,
            format!("parent/child package of {modified}"),
        ));
    }

    None
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
}

fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, f)| f).unwrap_or(path)
}

fn stem(path: &str) -> &str {
    let name = file_name(path);
    name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name)
}

fn dir_is_prefix(shorter: &str, longer: &str) -> bool {
    !shorter.is_empty()
        && shorter != longer
        && longer.starts_with(shorter)
        && longer.as_bytes().get(shorter.len()) == Some(&b'/')
}

/// Core stem with a trailing layer keyword removed, lowercased.
/// `UserController` and `user_service` both reduce to `user`.
fn layer_core(path: &str) -> Option<String> {
    let s = stem(path).to_ascii_lowercase();
    for kw in LAYER_KEYWORDS {
        if let Some(core) = s.strip_suffix(kw) {
            let core = core.trim_end_matches(['_', '-']);
            if !core.is_empty() {
                return Some(core.to_string());
            }
        }
    }
    None
}

/// Candidate paths that would be this file's test counterpart (or, for a
/// test file, its subject).
fn test_counterpart_candidates(path: &str) -> Vec<String> {
    let mut paths = HashSet::new();
    paths.insert(path.to_string());

    // Swap test ⇔ main directory segments.
    let mut swapped: HashSet<String> = HashSet::new();
    for p in &paths {
        let segments: Vec<&str> = p.split('/').collect();
        for (i, seg) in segments.iter().enumerate() {
            let replacement = match *seg {
                "test" => Some("main"),
                "main" => Some("test"),
                _ => None,
            };
            if let Some(r) = replacement {
                let mut s = segments.clone();
                s[i] = r;
                swapped.insert(s.join("/"));
            }
        }
    }
    paths.extend(swapped);

    // Swap the Test / _test stem suffix.
    let mut stem_swapped: HashSet<String> = HashSet::new();
    for p in &paths {
        let name = file_name(p);
        let (stem_part, ext) = match name.rsplit_once('.') {
            Some((s, e)) => (s, Some(e)),
            None => (name, None),
        };
        let new_stem = if let Some(base) = stem_part.strip_suffix("Test") {
            base.to_string()
        } else if let Some(base) = stem_part.strip_suffix("_test") {
            base.to_string()
        } else if stem_part.chars().next().is_some_and(|c| c.is_uppercase()) {
            format!("{stem_part}Test")
        } else {
            format!("{stem_part}_test")
        };
        if new_stem.is_empty() || new_stem == stem_part {
            continue;
        }
        let new_name = match ext {
            Some(e) => format!("{new_stem}.{e}"),
            None => new_stem,
        };
        let dir = parent_dir(p);
        let candidate = if dir.is_empty() {
            new_name
        } else {
            format!("{dir}/{new_name}")
        };
        stem_swapped.insert(candidate);
    }
    paths.extend(stem_swapped);

    paths.remove(path);
    paths.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parse;
    use pretty_assertions::assert_eq;

    fn doc_for(path: &str) -> DiffDocument {
        parse(&format!(
            "--- a/{path}\n+++ b/{path}\n@@ -1,1 +1,1 @@\n-a\n+b\n"
        ))
        .unwrap()
    }

    fn reasons_for(diff: &DiffDocument, inventory: &[&str]) -> Vec<(String, MatchReason)> {
        let inv: Vec<String> = inventory.iter().map(|s| s.to_string()).collect();
        PathPatternStrategy
            .run(diff, &inv)
            .into_iter()
            .map(|m| (m.path, m.reason))
            .collect()
    }

    #[test]
    fn finds_java_test_counterpart() {
        let diff = doc_for("src/main/java/acme/UserService.java");
        let matches = reasons_for(
            &diff,
            &[
                "src/main/java/acme/UserService.java",
                "src/test/java/acme/UserServiceTest.java",
            ],
        );
        assert_eq!(
            matches,
            vec![(
                "src/test/java/acme/UserServiceTest.java".to_string(),
                MatchReason::TestCounterpart
            )]
        );
    }

    #[test]
    fn finds_rust_test_counterpart() {
        let diff = doc_for("src/parser.rs");
        let matches = reasons_for(&diff, &["src/parser.rs", "src/parser_test.rs"]);
        assert!(matches.contains(&(
            "src/parser_test.rs".to_string(),
            MatchReason::TestCounterpart
        )));
    }

    #[test]
    fn same_package_and_sibling() {
        let diff = doc_for("src/auth/login.rs");
        let matches = reasons_for(
            &diff,
            &["src/auth/login.rs", "src/auth/token.rs", "src/auth/login.md"],
        );
        assert!(matches.contains(&("src/auth/token.rs".to_string(), MatchReason::SamePackage)));
        assert!(matches.contains(&("src/auth/login.md".to_string(), MatchReason::SiblingFile)));
    }

    #[test]
    fn related_layer_across_packages() {
        let diff = doc_for("src/web/UserController.java");
        let matches = reasons_for(
            &diff,
            &["src/web/UserController.java", "src/core/UserService.java"],
        );
        assert!(matches.contains(&(
            "src/core/UserService.java".to_string(),
            MatchReason::RelatedLayer
        )));
    }

    #[test]
    fn parent_package_is_least_specific() {
        let diff = doc_for("src/auth/oauth/flow.rs");
        let matches = reasons_for(
            &diff,
            &["src/auth/oauth/flow.rs", "src/auth/session.rs"],
        );
        assert!(matches.contains(&(
            "src/auth/session.rs".to_string(),
            MatchReason::ParentPackage
        )));
    }

    #[test]
    fn modified_files_are_never_matches() {
        let diff = parse(
            "--- a/src/a.rs\n+++ b/src/a.rs\n@@ -1,1 +1,1 @@\n-x\n+y\n\
             --- a/src/b.rs\n+++ b/src/b.rs\n@@ -1,1 +1,1 @@\n-x\n+y\n",
        )
        .unwrap();
        let matches = reasons_for(&diff, &["src/a.rs", "src/b.rs"]);
        assert!(matches.is_empty());
    }
}
