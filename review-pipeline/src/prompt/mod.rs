//! Prompt assembler: budgeted system/user pair with section markers.
//!
//! Sections are framed with literal `[SECTION]…[/SECTION]` markers so the
//! model and test fixtures can locate boundaries. Assembly order is highest
//! value first: diff → context matches → ticket → expanded files → policies.
//! When the character budget would be exceeded, lower-priority sections are
//! dropped whole rather than mid-sentence. The diff itself is never dropped.

use serde::Serialize;
use tracing::debug;

use crate::context::expand::ExpandedFile;
use crate::context::policy_docs::RepoPolicy;
use crate::context::ticket::TicketContext;
use crate::context::types::ContextMatch;

/// System instruction for the review model.
const SYSTEM_PROMPT: &str = "\
You are a senior code reviewer analyzing a source-control change request.
- Be concise and actionable. Avoid generic advice.
- Only raise issues directly supported by the shown changes.
- Respond with a single JSON object and nothing else, shaped as:
  {\"summary\": string,
   \"issues\": [{\"file\": string, \"start_line\": integer >= 1,
                \"severity\": \"critical\"|\"major\"|\"minor\"|\"info\",
                \"title\": string, \"suggestion\": string?,
                \"confidence_score\": number in [0,1]}],
   \"notes\": [{\"file\": string, \"line\": integer >= 1, \"note\": string}]}
- If the change looks correct, return an empty issues array.";

/// Assembler configuration.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// Combined character budget for system + user.
    pub char_budget: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { char_budget: 48_000 }
    }
}

/// Everything the assembler may draw from.
#[derive(Debug, Clone, Default)]
pub struct PromptInput<'a> {
    pub diff_text: &'a str,
    pub matches: &'a [ContextMatch],
    pub ticket: Option<&'a TicketContext>,
    pub expanded: &'a [ExpandedFile],
    pub policies: &'a [RepoPolicy],
}

/// Assembled prompt pair plus bookkeeping for the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct PromptResult {
    pub system: String,
    pub user: String,
    pub total_chars: usize,
    /// Section names that made it under the budget, in order.
    pub included_sections: Vec<&'static str>,
}

/// Assembles the prompt under the configured budget.
pub fn assemble(input: &PromptInput<'_>, cfg: &PromptConfig) -> PromptResult {
    let mut sections: Vec<(&'static str, String)> = Vec::new();

    sections.push(("DIFF", input.diff_text.to_string()));

    if !input.matches.is_empty() {
        let mut body = String::new();
        for m in input.matches {
            body.push_str(&format!(
                "* {} [{} {:.2}]: {}\n",
                m.path,
                m.reason.as_str(),
                m.confidence,
                m.evidence
            ));
        }
        sections.push(("CONTEXT_MATCHES", body));
    }

    if let Some(ticket) = input.ticket {
        let mut body = format!("Key: {}\n", ticket.key);
        if let Some(summary) = &ticket.summary {
            body.push_str(&format!("Summary: {summary}\n"));
        }
        if let Some(status) = &ticket.status {
            body.push_str(&format!("Status: {status}\n"));
        }
        sections.push(("TICKET", body));
    }

    for file in input.expanded {
        let marker = if file.truncated { " (truncated)" } else { "" };
        sections.push((
            "EXPANDED_FILE",
            format!("path: {}{}\n{}\n", file.path, marker, file.content),
        ));
    }

    for policy in input.policies {
        let marker = if policy.truncated { " (truncated)" } else { "" };
        sections.push((
            "POLICY",
            format!(
                "{} ({}{})\n{}\n",
                policy.kind.label(),
                policy.path,
                marker,
                policy.content
            ),
        ));
    }

    let mut user = String::new();
    let mut included = Vec::new();
    let mut total = SYSTEM_PROMPT.chars().count();

    for (idx, (name, body)) in sections.iter().enumerate() {
        let framed = format!("[{name}]\n{body}\n[/{name}]\n");
        let cost = framed.chars().count();
        // The diff (index 0) is always included; everything else must fit.
        if idx > 0 && total + cost > cfg.char_budget {
            debug!(section = name, cost, "section dropped by prompt budget");
            continue;
        }
        user.push_str(&framed);
        total += cost;
        included.push(*name);
    }

    PromptResult {
        system: SYSTEM_PROMPT.to_string(),
        user,
        total_chars: total,
        included_sections: included,
    }
}

/// Stricter addendum used for the single schema retry.
pub fn strict_system_prompt() -> String {
    format!(
        "{SYSTEM_PROMPT}\n\
         STRICT MODE: your previous answer was not valid JSON for the schema \
         above. Output ONLY the JSON object. No prose, no markdown fences."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::MatchReason;
    use pretty_assertions::assert_eq;

    fn one_match() -> ContextMatch {
        ContextMatch {
            path: "src/b.rs".to_string(),
            reason: MatchReason::SamePackage,
            confidence: 0.8,
            evidence: "same package as src/a.rs".to_string(),
        }
    }

    #[test]
    fn sections_are_framed_and_ordered() {
        let matches = vec![one_match()];
        let expanded = vec![ExpandedFile {
            path: "src/b.rs".to_string(),
            content: "fn b() {}".to_string(),
            truncated: false,
        }];
        let input = PromptInput {
            diff_text: "--- a/src/a.rs\n+++ b/src/a.rs\n",
            matches: &matches,
            expanded: &expanded,
            ..Default::default()
        };
        let result = assemble(&input, &PromptConfig::default());
        assert_eq!(
            result.included_sections,
            vec!["DIFF", "CONTEXT_MATCHES", "EXPANDED_FILE"]
        );
        let diff_at = result.user.find("[DIFF]").unwrap();
        let ctx_at = result.user.find("[CONTEXT_MATCHES]").unwrap();
        assert!(diff_at < ctx_at);
        assert!(result.user.contains("[/DIFF]"));
    }

    #[test]
    fn over_budget_sections_are_dropped_whole() {
        let matches = vec![one_match()];
        let expanded = vec![ExpandedFile {
            path: "src/huge.rs".to_string(),
            content: "x".repeat(10_000),
            truncated: false,
        }];
        let input = PromptInput {
            diff_text: "tiny diff",
            matches: &matches,
            expanded: &expanded,
            ..Default::default()
        };
        let cfg = PromptConfig { char_budget: 1200 };
        let result = assemble(&input, &cfg);
        assert!(result.included_sections.contains(&"CONTEXT_MATCHES"));
        assert!(!result.included_sections.contains(&"EXPANDED_FILE"));
        assert!(result.total_chars <= 1200);
    }

    #[test]
    fn diff_survives_even_when_over_budget() {
        let input = PromptInput {
            diff_text: &"d".repeat(5_000),
            ..Default::default()
        };
        let cfg = PromptConfig { char_budget: 100 };
        let result = assemble(&input, &cfg);
        assert_eq!(result.included_sections, vec!["DIFF"]);
        assert!(result.user.contains("[DIFF]"));
    }

    #[test]
    fn assembly_is_deterministic() {
        let matches = vec![one_match()];
        let input = PromptInput {
            diff_text: "diff",
            matches: &matches,
            ..Default::default()
        };
        let a = assemble(&input, &PromptConfig::default());
        let b = assemble(&input, &PromptConfig::default());
        assert_eq!(a.user, b.user);
        assert_eq!(a.total_chars, b.total_chars);
    }
}
