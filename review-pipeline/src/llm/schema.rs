//! Findings schema: locating and validating the model's JSON payload.

use crate::findings::{ReviewFindings, normalize_severity};

/// Pulls the JSON object out of the raw model text.
///
/// Tolerates markdown fences and surrounding prose: the slice from the first
/// `{` to the last `}` is taken as the candidate object.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parses and validates raw model output against the findings schema.
///
/// # Errors
/// A human-readable description of the first violation (used for the strict
/// retry instruction and the terminal failure message).
pub fn parse_findings(raw: &str) -> Result<ReviewFindings, String> {
    let json = extract_json(raw).ok_or_else(|| "no JSON object in output".to_string())?;
    let findings: ReviewFindings =
        serde_json::from_str(json).map_err(|e| format!("JSON does not match schema: {e}"))?;

    for (i, issue) in findings.issues.iter().enumerate() {
        if issue.file.trim().is_empty() {
            return Err(format!("issue[{i}]: empty file path"));
        }
        if issue.start_line < 1 {
            return Err(format!("issue[{i}]: start_line must be >= 1"));
        }
        if normalize_severity(&issue.severity).is_none() {
            return Err(format!(
                "issue[{i}]: severity `{}` outside critical|major|minor|info",
                issue.severity
            ));
        }
        if let Some(score) = issue.confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(format!("issue[{i}]: confidence_score {score} outside [0,1]"));
            }
        }
    }
    for (i, note) in findings.notes.iter().enumerate() {
        if note.file.trim().is_empty() {
            return Err(format!("note[{i}]: empty file path"));
        }
        if note.line < 1 {
            return Err(format!("note[{i}]: line must be >= 1"));
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const VALID: &str = r#"{"summary":"one problem","issues":[{"file":"src/dao.rs","start_line":12,"severity":"critical","title":"SQL injection","confidence_score":0.9}],"notes":[]}"#;

    #[test]
    fn parses_valid_payload() {
        let findings = parse_findings(VALID).unwrap();
        assert_eq!(findings.issues.len(), 1);
        assert_eq!(findings.issues[0].severity, "critical");
        assert_eq!(findings.issues[0].confidence_score, Some(0.9));
    }

    #[test]
    fn tolerates_markdown_fences() {
        let fenced = format!("```json\n{VALID}\n```");
        assert!(parse_findings(&fenced).is_ok());
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_findings("not json").is_err());
    }

    #[test]
    fn rejects_unknown_severity() {
        let bad = r#"{"summary":"","issues":[{"file":"a.rs","start_line":1,"severity":"blocker","title":"t"}],"notes":[]}"#;
        let err = parse_findings(bad).unwrap_err();
        assert!(err.contains("severity"));
    }

    #[test]
    fn rejects_zero_start_line() {
        let bad = r#"{"summary":"","issues":[{"file":"a.rs","start_line":0,"severity":"minor","title":"t"}],"notes":[]}"#;
        assert!(parse_findings(bad).is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let bad = r#"{"summary":"","issues":[{"file":"a.rs","start_line":1,"severity":"minor","title":"t","confidence_score":1.5}],"notes":[]}"#;
        assert!(parse_findings(bad).is_err());
    }

    #[test]
    fn missing_collections_default_to_empty() {
        let minimal = r#"{"summary":"all clear"}"#;
        let findings = parse_findings(minimal).unwrap();
        assert!(findings.issues.is_empty());
        assert!(findings.notes.is_empty());
    }
}
