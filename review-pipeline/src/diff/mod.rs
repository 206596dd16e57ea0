//! Unified-diff parser (typed tree) and lossless renderer.
//!
//! Features:
//! - Works even if file headers (---/+++) are missing (hunks-only input).
//! - Strips `a/` and `b/` prefixes; `/dev/null` encodes create/delete.
//! - Binary patch heuristics (`GIT binary patch`, `Binary files ... differ`).
//! - Preserves the exact line bytes inside hunks (trailing whitespace and CR
//!   included): downstream position mapping depends on character identity.
//!
//! The parser is pure and idempotent: reparsing the same input yields the
//! same document, and `render(parse(d))` reproduces `d` modulo the trailing
//! newline.

pub mod position;

use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

/// Marker of one hunk line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineMarker {
    /// `+`: line exists only in the new file.
    Addition,
    /// `-`: line exists only in the old file.
    Deletion,
    /// ` `: line exists in both files.
    Context,
    /// `\`: "No newline at end of file" marker.
    NoNewline,
}

impl LineMarker {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Addition),
            '-' => Some(Self::Deletion),
            ' ' => Some(Self::Context),
            '\\' => Some(Self::NoNewline),
            _ => None,
        }
    }

    fn as_char(&self) -> char {
        match self {
            Self::Addition => '+',
            Self::Deletion => '-',
            Self::Context => ' ',
            Self::NoNewline => '\\',
        }
    }
}

/// One line inside a hunk. `text` excludes the marker character and keeps
/// the original bytes (including any trailing `\r`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkLine {
    pub marker: LineMarker,
    pub text: String,
}

/// A contiguous block of changes headed by `@@ -a,b +c,d @@`.
///
/// `raw_header` keeps the verbatim header line so rendering is lossless
/// (count shorthand and trailing section text survive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<HunkLine>,
    pub raw_header: String,
}

/// File-level change and its hunks.
///
/// `header_lines` carries the verbatim preamble (`diff --git`, `index`,
/// mode, `---`/`+++`, binary markers) for lossless rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileModification {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub is_binary: bool,
    pub hunks: Vec<DiffHunk>,
    pub header_lines: Vec<String>,
}

impl FileModification {
    /// The path downstream consumers anchor on: new path, else old path.
    pub fn effective_path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }

    /// No old path: the file is being created.
    pub fn is_created(&self) -> bool {
        self.old_path.is_none() && self.new_path.is_some()
    }

    /// No new path: the file is being deleted.
    pub fn is_deleted(&self) -> bool {
        self.new_path.is_none() && self.old_path.is_some()
    }

    /// Both paths present and different.
    pub fn is_renamed(&self) -> bool {
        match (&self.old_path, &self.new_path) {
            (Some(o), Some(n)) => o != n,
            _ => false,
        }
    }
}

/// The parsed diff: ordered file modifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiffDocument {
    pub files: Vec<FileModification>,
    /// True when the input ended with a newline (renderer reproduces it).
    pub trailing_newline: bool,
}

impl DiffDocument {
    /// All effective paths, in document order.
    pub fn modified_paths(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter_map(|f| f.effective_path())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Simple heuristic for binary patches inside a file preamble.
pub fn looks_like_binary_patch(line: &str) -> bool {
    line.contains("GIT binary patch")
        || line.starts_with("Binary files ")
        || (line.starts_with("Files ") && line.contains(" differ"))
}

/// Strips the git `a/` / `b/` prefix and maps `/dev/null` to `None`.
fn clean_path(raw: &str) -> Option<String> {
    let p = raw.trim();
    // `--- a/path<TAB>timestamp` shapes exist in the wild.
    let p = p.split('\t').next().unwrap_or(p);
    if p.is_empty() || p == "/dev/null" {
        return None;
    }
    let p = p
        .strip_prefix("a/")
        .or_else(|| p.strip_prefix("b/"))
        .unwrap_or(p);
    if p.is_empty() {
        None
    } else {
        Some(p.to_string())
    }
}

/// Splits "12,7" or "12" into (start, count); a missing count defaults to 1.
fn split_nums(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once(',') {
        Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
    } else {
        Some((s.parse().ok()?, 1))
    }
}

/// Parses `@@ -a,b +c,d @@ ...` into the four numbers.
fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32, u32)> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let ranges = &rest[..end];
    let (old_part, new_part) = ranges.split_once(' ')?;
    let old = old_part.strip_prefix('-')?;
    let new = new_part.strip_prefix('+')?;
    let (old_start, old_count) = split_nums(old)?;
    let (new_start, new_count) = split_nums(new)?;
    Some((old_start, old_count, new_start, new_count))
}

/// Parses unified diff text into a [`DiffDocument`].
///
/// Hunks are terminated by their declared line counts, which disambiguates
/// deletion lines like `--- x` from the next file's header.
///
/// # Errors
/// [`ParseError::Empty`] for blank input, [`ParseError::InvalidHunkHeader`]
/// (with the 1-based line number) when an `@@` line does not parse.
pub fn parse(input: &str) -> Result<DiffDocument, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let trailing_newline = input.ends_with('\n');
    // split('\n') keeps `\r` inside the segments; drop the phantom segment
    // after a trailing newline.
    let mut raw_lines: Vec<&str> = input.split('\n').collect();
    if trailing_newline {
        raw_lines.pop();
    }

    let mut files: Vec<FileModification> = Vec::new();
    let mut current: Option<FileModification> = None;
    let mut in_hunk = false;
    // Lines still owed to the open hunk, per its declared counts.
    let mut remaining_old = 0u32;
    let mut remaining_new = 0u32;

    for (idx, line) in raw_lines.iter().enumerate() {
        let line_no = idx + 1;

        if in_hunk && !line.starts_with("@@") {
            let marker = line.chars().next().and_then(LineMarker::from_char);
            match marker {
                Some(m) => {
                    match m {
                        LineMarker::Addition => remaining_new = remaining_new.saturating_sub(1),
                        LineMarker::Deletion => remaining_old = remaining_old.saturating_sub(1),
                        LineMarker::Context => {
                            remaining_old = remaining_old.saturating_sub(1);
                            remaining_new = remaining_new.saturating_sub(1);
                        }
                        LineMarker::NoNewline => {}
                    }
                    if let Some(hunk) = current.as_mut().and_then(|f| f.hunks.last_mut()) {
                        hunk.lines.push(HunkLine {
                            marker: m,
                            text: line[1..].to_string(),
                        });
                    }
                    if remaining_old == 0 && remaining_new == 0 {
                        in_hunk = false;
                    }
                    continue;
                }
                None => {
                    // An unmarked line ends the hunk early (lenient on
                    // count-inconsistent input); reprocess it below.
                    in_hunk = false;
                }
            }
        }

        // A "no newline" marker may trail the hunk after its counts are
        // consumed; attach it to the last hunk.
        if !in_hunk && line.starts_with('\\') {
            if let Some(hunk) = current.as_mut().and_then(|f| f.hunks.last_mut()) {
                hunk.lines.push(HunkLine {
                    marker: LineMarker::NoNewline,
                    text: line[1..].to_string(),
                });
                continue;
            }
        }

        if line.starts_with("diff --git") {
            if let Some(f) = current.take() {
                files.push(f);
            }
            let mut f = FileModification::default();
            f.header_lines.push(line.to_string());
            current = Some(f);
            continue;
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            // A new `---` header after hunks were collected starts the next
            // file of a headers-only (no `diff --git`) document.
            let start_new = current
                .as_ref()
                .map(|f| !f.hunks.is_empty() || f.old_path.is_some())
                .unwrap_or(false);
            if start_new {
                if let Some(f) = current.take() {
                    files.push(f);
                }
            }
            let file = ensure_file(&mut current);
            file.header_lines.push(line.to_string());
            file.old_path = clean_path(rest);
            continue;
        }

        if let Some(rest) = line.strip_prefix("+++ ") {
            let file = ensure_file(&mut current);
            file.header_lines.push(line.to_string());
            file.new_path = clean_path(rest);
            continue;
        }

        if line.starts_with("@@") {
            let Some((old_start, old_count, new_start, new_count)) = parse_hunk_header(line)
            else {
                return Err(ParseError::InvalidHunkHeader {
                    line: line_no,
                    text: line.to_string(),
                });
            };
            let file = ensure_file(&mut current);
            file.hunks.push(DiffHunk {
                old_start,
                old_count,
                new_start,
                new_count,
                lines: Vec::new(),
                raw_header: line.to_string(),
            });
            remaining_old = old_count;
            remaining_new = new_count;
            in_hunk = remaining_old > 0 || remaining_new > 0;
            continue;
        }

        // Preamble between files: index lines, mode lines, binary markers,
        // rename hints. Attach to the current (or next) file.
        let file = ensure_file(&mut current);
        if looks_like_binary_patch(line) {
            file.is_binary = true;
        }
        if let Some(rest) = line.strip_prefix("rename from ") {
            file.old_path.get_or_insert_with(|| rest.trim().to_string());
        }
        if let Some(rest) = line.strip_prefix("rename to ") {
            file.new_path.get_or_insert_with(|| rest.trim().to_string());
        }
        file.header_lines.push(line.to_string());
    }

    if let Some(f) = current.take() {
        files.push(f);
    }

    // Drop a leading pseudo-file that collected only loose preamble.
    files.retain(|f| {
        !f.hunks.is_empty()
            || f.old_path.is_some()
            || f.new_path.is_some()
            || f.is_binary
            || !f.header_lines.is_empty()
    });

    if files.iter().all(|f| {
        f.hunks.is_empty() && f.old_path.is_none() && f.new_path.is_none() && !f.is_binary
    }) {
        return Err(ParseError::Empty);
    }

    Ok(DiffDocument {
        files,
        trailing_newline,
    })
}

fn ensure_file(current: &mut Option<FileModification>) -> &mut FileModification {
    current.get_or_insert_with(FileModification::default)
}

/// Renders the document back to unified diff text.
///
/// Verbatim preamble and hunk headers make this lossless: for any valid
/// input, `render(parse(d)) == d` modulo the trailing newline.
pub fn render(doc: &DiffDocument) -> String {
    let mut out = String::new();
    for file in &doc.files {
        for header in &file.header_lines {
            out.push_str(header);
            out.push('\n');
        }
        for hunk in &file.hunks {
            out.push_str(&hunk.raw_header);
            out.push('\n');
            for line in &hunk.lines {
                out.push(line.marker.as_char());
                out.push_str(&line.text);
                out.push('\n');
            }
        }
    }
    if !doc.trailing_newline && out.ends_with('\n') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SIMPLE: &str = "\
diff --git a/src/dao/UserDAO.java b/src/dao/UserDAO.java
index 1111111..2222222 100644
--- a/src/dao/UserDAO.java
+++ b/src/dao/UserDAO.java
@@ -10,3 +10,4 @@ public class UserDAO {
     public User find(String id) {
-        String q = \"SELECT * FROM users WHERE id = \" + id;
+        String q = \"SELECT * FROM users WHERE id = ?\";
+        // bind id
     }
";

    #[test]
    fn parses_paths_and_hunk_numbers() {
        let doc = parse(SIMPLE).unwrap();
        assert_eq!(doc.files.len(), 1);
        let f = &doc.files[0];
        assert_eq!(f.old_path.as_deref(), Some("src/dao/UserDAO.java"));
        assert_eq!(f.new_path.as_deref(), Some("src/dao/UserDAO.java"));
        assert!(!f.is_renamed());
        let h = &f.hunks[0];
        assert_eq!((h.old_start, h.old_count, h.new_start, h.new_count), (10, 3, 10, 4));
        assert_eq!(h.lines.len(), 5);
        assert_eq!(h.lines[1].marker, LineMarker::Deletion);
        assert_eq!(h.lines[2].marker, LineMarker::Addition);
    }

    #[test]
    fn render_round_trips() {
        let doc = parse(SIMPLE).unwrap();
        assert_eq!(render(&doc), SIMPLE);
    }

    #[test]
    fn preserves_crlf_and_trailing_whitespace() {
        let diff = "--- a/f.txt\n+++ b/f.txt\n@@ -1,1 +1,1 @@\n-old\r\n+new  \r\n";
        let doc = parse(diff).unwrap();
        let lines = &doc.files[0].hunks[0].lines;
        assert_eq!(lines[0].text, "old\r");
        assert_eq!(lines[1].text, "new  \r");
        assert_eq!(render(&doc), diff);
    }

    #[test]
    fn missing_count_defaults_to_one() {
        let diff = "--- a/f\n+++ b/f\n@@ -3 +3 @@\n-x\n+y\n";
        let doc = parse(diff).unwrap();
        let h = &doc.files[0].hunks[0];
        assert_eq!((h.old_start, h.old_count, h.new_start, h.new_count), (3, 1, 3, 1));
        assert_eq!(render(&doc), diff);
    }

    #[test]
    fn dev_null_encodes_creation_and_deletion() {
        let created = "--- /dev/null\n+++ b/new.rs\n@@ -0,0 +1,1 @@\n+fn main() {}\n";
        let doc = parse(created).unwrap();
        assert!(doc.files[0].is_created());
        assert_eq!(doc.files[0].effective_path(), Some("new.rs"));

        let deleted = "--- a/gone.rs\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-fn main() {}\n";
        let doc = parse(deleted).unwrap();
        assert!(doc.files[0].is_deleted());
        assert_eq!(doc.files[0].effective_path(), Some("gone.rs"));
    }

    #[test]
    fn malformed_hunk_header_reports_line_number() {
        let diff = "--- a/f\n+++ b/f\n@@ broken @@\n x\n";
        let err = parse(diff).unwrap_err();
        match err {
            ParseError::InvalidHunkHeader { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn no_newline_marker_is_kept() {
        let diff = "--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-a\n+b\n\\ No newline at end of file\n";
        let doc = parse(diff).unwrap();
        let lines = &doc.files[0].hunks[0].lines;
        assert_eq!(lines[2].marker, LineMarker::NoNewline);
        assert_eq!(render(&doc), diff);
    }

    #[test]
    fn hunks_only_input_is_accepted() {
        let diff = "@@ -1,1 +1,2 @@\n x\n+y\n";
        let doc = parse(diff).unwrap();
        assert_eq!(doc.files.len(), 1);
        assert_eq!(doc.files[0].effective_path(), None);
        assert_eq!(doc.files[0].hunks[0].lines.len(), 2);
    }

    #[test]
    fn binary_marker_flags_file() {
        let diff = "diff --git a/img.png b/img.png\nBinary files a/img.png and b/img.png differ\n";
        let doc = parse(diff).unwrap();
        assert!(doc.files[0].is_binary);
        assert!(doc.files[0].hunks.is_empty());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(parse("   \n"), Err(ParseError::Empty)));
    }

    #[test]
    fn reparse_is_idempotent() {
        let doc = parse(SIMPLE).unwrap();
        let doc2 = parse(&render(&doc)).unwrap();
        assert_eq!(doc, doc2);
    }

    #[test]
    fn multi_file_document_keeps_order() {
        let diff = "\
--- a/one.rs
+++ b/one.rs
@@ -1,1 +1,1 @@
-a
+b
--- a/two.rs
+++ b/two.rs
@@ -5,1 +5,2 @@
 ctx
+add
";
        let doc = parse(diff).unwrap();
        assert_eq!(doc.modified_paths(), vec!["one.rs", "two.rs"]);
        assert_eq!(render(&doc), diff);
    }
}
