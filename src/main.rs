mod config;

use std::sync::Arc;
use std::time::Duration;

use api::core::app_state::AppState;
use llm_service::LlmStreamClient;
use llm_service::config::default_config::config_from_env;
use review_pipeline::pipeline::worker::spawn_workers;
use review_pipeline::{ReviewPipeline, ScmClient, ScmRouter};
use review_pipeline::scm::{ProviderKind, ScmConfig};
use review_queue::{IdempotencyStore, RequestQueue};
use review_store::ReviewStore;
use review_store::retention::spawn_retention_sweeper;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from a .env file when one exists.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = AppConfig::from_env()?;

    // LLM transport.
    let llm = Arc::new(LlmStreamClient::from_config(config_from_env()?)?);
    info!(provider = llm.provider_name(), model = llm.model(), "llm client ready");

    // Persistence: lazy pool so the process can boot while Postgres warms up.
    let store = ReviewStore::connect_lazy(&cfg.database_url, 10)?;
    spawn_retention_sweeper(store.clone(), Duration::from_secs(3600), cfg.retention);

    // Queue + idempotency records.
    let queue = RequestQueue::connect(&cfg.redis_url, cfg.queue.clone()).await?;
    let idempotency = IdempotencyStore::connect(&cfg.redis_url, cfg.queue_retention).await?;

    // SCM clients per configured provider.
    let scm = ScmRouter::new(
        scm_client(&cfg, ProviderKind::GitHub)?,
        scm_client(&cfg, ProviderKind::GitLab)?,
    );

    let pipeline = Arc::new(ReviewPipeline::new(
        scm,
        llm.clone(),
        store,
        cfg.pipeline.clone(),
    ));

    // Worker pool over the shared consumer group.
    let workers = spawn_workers(
        cfg.workers,
        pipeline.clone(),
        queue.clone(),
        idempotency.clone(),
    );
    info!(count = workers.len(), "queue workers running");

    let state = Arc::new(AppState {
        pipeline,
        queue,
        idempotency,
        llm,
    });
    api::start(state, &cfg.bind_addr).await?;
    Ok(())
}

fn scm_client(cfg: &AppConfig, kind: ProviderKind) -> anyhow::Result<Option<ScmClient>> {
    let credentials = match kind {
        ProviderKind::GitHub => cfg.github.as_ref(),
        ProviderKind::GitLab => cfg.gitlab.as_ref(),
    };
    let Some(credentials) = credentials else {
        info!(provider = kind.as_str(), "no token configured; provider disabled");
        return Ok(None);
    };
    let client = ScmClient::from_config(ScmConfig {
        kind,
        base_api: credentials.base_api.clone(),
        token: credentials.token.clone(),
        timeout: cfg.scm_timeout,
    })?;
    Ok(Some(client))
}
