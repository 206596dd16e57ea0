//! Ticket extractor: pulls an issue key from the change request and asks the
//! ticket system for context.
//!
//! The key pattern is `[ABC-123]` in the title first, then the description.
//! The adapter call is best-effort with a short timeout; on any failure the
//! extractor degrades to the bare key (or to nothing at all). It never blocks
//! the pipeline.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::scm::ChangeRequestMeta;

lazy_static! {
    static ref TICKET_RE: Regex =
        Regex::new(r"\[([A-Z]+-\d+)\]").expect("static ticket regex");
}

/// Context fetched (or merely inferred) for a referenced ticket.
#[derive(Debug, Clone, Default)]
pub struct TicketContext {
    pub key: String,
    pub summary: Option<String>,
    pub status: Option<String>,
}

/// Ticket-system adapter configuration.
#[derive(Debug, Clone, Default)]
pub struct TicketConfig {
    /// Jira-compatible base URL; `None` disables lookups (key-only context).
    pub base_url: Option<String>,
    pub timeout: Duration,
}

/// Finds the first ticket key in title, then description.
pub fn extract_ticket_key(meta: &ChangeRequestMeta) -> Option<String> {
    TICKET_RE
        .captures(&meta.title)
        .or_else(|| {
            meta.description
                .as_deref()
                .and_then(|d| TICKET_RE.captures(d))
        })
        .map(|c| c[1].to_string())
}

/// Extracts and (best-effort) resolves ticket context.
pub async fn fetch_ticket_context(
    meta: &ChangeRequestMeta,
    cfg: &TicketConfig,
) -> Option<TicketContext> {
    let key = extract_ticket_key(meta)?;

    let Some(base) = cfg.base_url.as_deref().filter(|b| !b.is_empty()) else {
        return Some(TicketContext {
            key,
            ..Default::default()
        });
    };

    match lookup(base, &key, cfg.timeout).await {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            debug!(%key, error = %e, "ticket lookup degraded to bare key");
            Some(TicketContext {
                key,
                ..Default::default()
            })
        }
    }
}

async fn lookup(base: &str, key: &str, timeout: Duration) -> Result<TicketContext, reqwest::Error> {
    let url = format!(
        "{}/rest/api/2/issue/{}",
        base.trim_end_matches('/'),
        urlencoding::encode(key)
    );
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let resp: TicketIssue = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(TicketContext {
        key: key.to_string(),
        summary: resp.fields.as_ref().and_then(|f| f.summary.clone()),
        status: resp
            .fields
            .and_then(|f| f.status)
            .map(|s| s.name),
    })
}

#[derive(Deserialize)]
struct TicketIssue {
    fields: Option<TicketFields>,
}

#[derive(Deserialize)]
struct TicketFields {
    summary: Option<String>,
    status: Option<TicketStatus>,
}

#[derive(Deserialize)]
struct TicketStatus {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn meta(title: &str, description: Option<&str>) -> ChangeRequestMeta {
        ChangeRequestMeta {
            title: title.to_string(),
            description: description.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn title_key_wins_over_description() {
        let m = meta("[CORE-12] fix parser", Some("relates to [API-99]"));
        assert_eq!(extract_ticket_key(&m).as_deref(), Some("CORE-12"));
    }

    #[test]
    fn falls_back_to_description() {
        let m = meta("fix parser", Some("implements [API-99]"));
        assert_eq!(extract_ticket_key(&m).as_deref(), Some("API-99"));
    }

    #[test]
    fn requires_bracketed_uppercase_key() {
        assert_eq!(extract_ticket_key(&meta("fix core-12 bug", None)), None);
        assert_eq!(extract_ticket_key(&meta("no ticket here", None)), None);
    }

    #[tokio::test]
    async fn no_base_url_yields_bare_key_context() {
        let ctx = fetch_ticket_context(&meta("[OPS-7] rotate keys", None), &TicketConfig::default())
            .await
            .unwrap();
        assert_eq!(ctx.key, "OPS-7");
        assert_eq!(ctx.summary, None);
    }

    #[tokio::test]
    async fn no_match_yields_no_context() {
        let ctx = fetch_ticket_context(&meta("plain title", None), &TicketConfig::default()).await;
        assert!(ctx.is_none());
    }
}
