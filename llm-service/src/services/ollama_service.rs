//! Ollama streaming service (`POST /api/generate` with `"stream": true`).
//!
//! The system prompt is prepended to the user prompt, matching Ollama's
//! single-prompt generate API.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{
        AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, make_snippet,
    },
    health_service::HealthStatus,
    streaming::{ChatStreamChunk, process_ollama_stream},
};

#[derive(Debug)]
pub struct OllamaService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_generate: String,
    url_tags: String,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

impl OllamaService {
    /// Creates a new service from the given config.
    ///
    /// # Errors
    /// - [`AiLlmError::Provider`] with `InvalidProvider` if `cfg.provider` is not Ollama
    /// - [`AiLlmError::Provider`] with `InvalidEndpoint` if `cfg.endpoint` is invalid
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::Ollama {
            return Err(
                ProviderError::new(Provider::Ollama, ProviderErrorKind::InvalidProvider).into(),
            );
        }

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::InvalidEndpoint(cfg.endpoint.clone()),
            )
            .into());
        }

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let base = endpoint.trim_end_matches('/').to_string();
        let url_generate = format!("{}/api/generate", base);
        let url_tags = format!("{}/api/tags", base);

        info!(model = %cfg.model, endpoint = %cfg.endpoint, "OllamaService initialized");

        Ok(Self {
            client,
            cfg,
            url_generate,
            url_tags,
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// Opens a streaming generate call and forwards deltas into `tx`.
    pub async fn stream_chat(
        &self,
        system: &str,
        user: &str,
        tx: mpsc::Sender<ChatStreamChunk>,
    ) -> Result<(), AiLlmError> {
        let started = Instant::now();
        let full_prompt = if system.is_empty() {
            user.to_string()
        } else {
            format!("{}\n\n{}", system, user)
        };

        let body = OllamaGenerateRequest {
            model: &self.cfg.model,
            prompt: full_prompt,
            stream: true,
        };

        debug!(model = %self.cfg.model, "POST {}", self.url_generate);

        let resp = self
            .client
            .post(&self.url_generate)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let url = self.url_generate.clone();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::HttpStatus(HttpError {
                    status,
                    url,
                    snippet: make_snippet(&text),
                }),
            )
            .into());
        }

        process_ollama_stream(resp, tx).await?;
        debug!(latency_ms = started.elapsed().as_millis(), "stream drained");
        Ok(())
    }

    /// Best-effort health probe: `GET {endpoint}/api/tags`.
    pub async fn health(&self) -> HealthStatus {
        let started = Instant::now();
        match self.client.get(&self.url_tags).send().await {
            Ok(resp) if resp.status().is_success() => HealthStatus::ok(
                "ollama",
                &self.cfg.endpoint,
                Some(&self.cfg.model),
                started.elapsed().as_millis(),
                "tags endpoint reachable",
            ),
            Ok(resp) => HealthStatus::fail(
                "ollama",
                &self.cfg.endpoint,
                Some(&self.cfg.model),
                started.elapsed().as_millis(),
                format!("status {}", resp.status()),
            ),
            Err(e) => HealthStatus::fail(
                "ollama",
                &self.cfg.endpoint,
                Some(&self.cfg.model),
                started.elapsed().as_millis(),
                e.to_string(),
            ),
        }
    }
}
