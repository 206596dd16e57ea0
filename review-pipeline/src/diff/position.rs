//! Maps (file, new-line-number) to a position index inside the raw diff.
//!
//! The position is 1-based and counts every hunk header as one position and
//! every hunk line as one, across files in document order. It anchors inline
//! comments, so it must agree exactly with the rendered diff text.

use super::{DiffDocument, LineMarker};

/// Returns the diff position of `new_line` in `path`, or −1 when the line
/// does not exist on the new side of the diff (deletion-only lines, unknown
/// paths, out-of-hunk lines).
///
/// For the target file a running "current new line" starts at
/// `hunk.new_start - 1`; every `+` or ` ` line advances it, and the first
/// line reaching `new_line` wins. O(diff size) time, O(1) extra memory.
pub fn position_for(doc: &DiffDocument, path: &str, new_line: u32) -> i64 {
    let mut pos: i64 = 0;
    for file in &doc.files {
        let is_target = file.effective_path() == Some(path);
        for hunk in &file.hunks {
            pos += 1; // hunk header occupies one position
            let mut current_new = hunk.new_start.saturating_sub(1);
            for line in &hunk.lines {
                pos += 1;
                if !is_target {
                    continue;
                }
                if matches!(line.marker, LineMarker::Addition | LineMarker::Context) {
                    current_new += 1;
                    if current_new == new_line {
                        return pos;
                    }
                }
            }
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{parse, render};
    use pretty_assertions::assert_eq;

    const TWO_FILES: &str = "\
--- a/src/dao/UserDAO.java
+++ b/src/dao/UserDAO.java
@@ -10,3 +10,4 @@
     public User find(String id) {
-        String q = bad(id);
+        String q = good();
+        bind(id);
     }
@@ -30,2 +31,3 @@
     void close() {
+        pool.release();
     }
--- a/src/service/UserService.java
+++ b/src/service/UserService.java
@@ -5,2 +5,3 @@
 class UserService {
+    private final UserDAO dao;
 }
";

    /// Independent oracle: 1-based index of a line among hunk headers and
    /// hunk lines of the rendered text.
    fn raw_index_of(doc: &crate::diff::DiffDocument, needle: &str) -> i64 {
        let text = render(doc);
        let mut pos = 0i64;
        for line in text.lines() {
            let counted = line.starts_with("@@")
                || line.starts_with('+') && !line.starts_with("+++")
                || line.starts_with('-') && !line.starts_with("---")
                || line.starts_with(' ')
                || line.starts_with('\\');
            if counted {
                pos += 1;
                if line == needle {
                    return pos;
                }
            }
        }
        -1
    }

    #[test]
    fn added_line_position_matches_raw_index() {
        let doc = parse(TWO_FILES).unwrap();
        let pos = position_for(&doc, "src/dao/UserDAO.java", 12);
        assert!(pos > 0);
        assert_eq!(pos, raw_index_of(&doc, "+        bind(id);"));
    }

    #[test]
    fn context_line_position_matches_raw_index() {
        let doc = parse(TWO_FILES).unwrap();
        // Line 10 on the new side is the first context line of hunk one.
        let pos = position_for(&doc, "src/dao/UserDAO.java", 10);
        assert_eq!(pos, raw_index_of(&doc, "     public User find(String id) {"));
    }

    #[test]
    fn second_hunk_accounts_for_header_positions() {
        let doc = parse(TWO_FILES).unwrap();
        let pos = position_for(&doc, "src/dao/UserDAO.java", 32);
        assert_eq!(pos, raw_index_of(&doc, "+        pool.release();"));
    }

    #[test]
    fn later_file_positions_accumulate_across_files() {
        let doc = parse(TWO_FILES).unwrap();
        let pos = position_for(&doc, "src/service/UserService.java", 6);
        assert_eq!(pos, raw_index_of(&doc, "+    private final UserDAO dao;"));
    }

    #[test]
    fn deleted_line_has_no_position() {
        let doc = parse(TWO_FILES).unwrap();
        // New-side line numbering never lands on the deleted line's content;
        // a line number outside any hunk yields -1.
        assert_eq!(position_for(&doc, "src/dao/UserDAO.java", 999), -1);
    }

    #[test]
    fn unknown_path_has_no_position() {
        let doc = parse(TWO_FILES).unwrap();
        assert_eq!(position_for(&doc, "nope.java", 10), -1);
    }
}
