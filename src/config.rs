//! Process configuration, read once from the environment at boot.
//!
//! Immutable after construction; hot-reload is out of scope. Every knob has
//! a production default so a minimal deployment only sets credentials and
//! connection URLs.

use std::time::Duration;

use anyhow::Context;
use review_pipeline::context::co_change::CoChangeStrategy;
use review_pipeline::context::expand::ExpandConfig;
use review_pipeline::context::ticket::TicketConfig;
use review_pipeline::context::ContextOrchestrator;
use review_pipeline::aggregate::AggregationConfig;
use review_pipeline::llm::AnalyzeConfig;
use review_pipeline::pipeline::PipelineConfig;
use review_pipeline::publish::PublishConfig;
use review_pipeline::prompt::PromptConfig;
use review_queue::QueueConfig;

/// Everything the binary needs to wire the system together.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub redis_url: String,
    pub queue: QueueConfig,
    pub queue_retention: Duration,
    pub workers: usize,
    pub pipeline: PipelineConfig,
    pub scm_timeout: Duration,
    pub github: Option<ScmCredentials>,
    pub gitlab: Option<ScmCredentials>,
    pub retention: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct ScmCredentials {
    pub base_api: String,
    pub token: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:8080");
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL must be set")?;

        let queue = QueueConfig {
            stream: env_or("QUEUE_STREAM", "review:agent-requests"),
            group: env_or("QUEUE_GROUP", "agent-workers"),
            batch_size: env_parse("QUEUE_BATCH_SIZE", 1)?,
            poll_timeout: Duration::from_secs(env_parse("QUEUE_POLL_TIMEOUT_SECS", 5)?),
            visibility_timeout: Duration::from_secs(env_parse(
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                600,
            )?),
        };

        let pipeline = PipelineConfig {
            pipeline_deadline: Duration::from_secs(env_parse("PIPELINE_DEADLINE_SECS", 600)?),
            best_effort_deadline: Duration::from_secs(env_parse("BEST_EFFORT_DEADLINE_SECS", 15)?),
            analyze: AnalyzeConfig {
                timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 120)?),
                schema_retries: env_parse("LLM_SCHEMA_RETRIES", 1)?,
            },
            aggregation: AggregationConfig {
                min_confidence: env_parse("AGG_MIN_CONFIDENCE", 0.7)?,
                max_issues_per_file: env_parse("AGG_MAX_ISSUES_PER_FILE", 10)?,
                dedup_enabled: env_bool("AGG_DEDUP_ENABLED", true),
            },
            orchestrator: ContextOrchestrator {
                strategy_deadline: Duration::from_secs(env_parse(
                    "CONTEXT_STRATEGY_DEADLINE_SECS",
                    5,
                )?),
                max_matches: env_parse("CONTEXT_MAX_MATCHES", 20)?,
                inventory_cap: env_parse("CONTEXT_INVENTORY_CAP", 2000)?,
                co_change: CoChangeStrategy {
                    lookback_days: env_parse("CONTEXT_CO_CHANGE_LOOKBACK_DAYS", 90)?,
                    max_commits: env_parse("CONTEXT_CO_CHANGE_MAX_COMMITS", 200)?,
                },
            },
            expand: ExpandConfig {
                max_files: env_parse("EXPAND_MAX_FILES", 8)?,
                max_lines: env_parse("EXPAND_MAX_LINES", 400)?,
                ..ExpandConfig::default()
            },
            ticket: TicketConfig {
                base_url: std::env::var("TICKET_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                timeout: Duration::from_secs(5),
            },
            policy_char_budget: env_parse("POLICY_CHAR_BUDGET", 4_000)?,
            prompt: PromptConfig {
                char_budget: env_parse("PROMPT_CHAR_BUDGET", 48_000)?,
            },
            publish: PublishConfig::default(),
        };

        Ok(Self {
            bind_addr,
            database_url,
            redis_url,
            queue,
            queue_retention: Duration::from_secs(env_parse("QUEUE_RETENTION_SECS", 86_400)?),
            workers: env_parse("QUEUE_WORKERS", 2)?,
            pipeline,
            scm_timeout: Duration::from_secs(env_parse("SCM_TIMEOUT_SECS", 30)?),
            github: scm_credentials("GITHUB_API_BASE", "https://api.github.com", "GITHUB_TOKEN"),
            gitlab: scm_credentials(
                "GITLAB_API_BASE",
                "https://gitlab.com/api/v4",
                "GITLAB_TOKEN",
            ),
            retention: chrono::Duration::days(env_parse("RETENTION_DAYS", 30)?),
        })
    }
}

fn scm_credentials(
    base_var: &str,
    default_base: &str,
    token_var: &str,
) -> Option<ScmCredentials> {
    let token = std::env::var(token_var).ok().filter(|t| !t.trim().is_empty())?;
    Some(ScmCredentials {
        base_api: std::env::var(base_var)
            .ok()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| default_base.to_string()),
        token,
    })
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}")),
        _ => Ok(default),
    }
}
