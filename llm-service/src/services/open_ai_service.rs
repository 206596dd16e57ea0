//! OpenAI-compatible streaming chat service.
//!
//! Endpoint derived from `LlmModelConfig::endpoint`:
//! - POST {endpoint}/v1/chat/completions with `"stream": true`
//!
//! The constructor rejects configs that name a different provider, lack an
//! API key, or carry a non-HTTP endpoint. Failures are normalized via the
//! unified types in `error_handler`.

use std::time::{Duration, Instant};

use reqwest::header;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{
        AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, make_snippet,
    },
    health_service::HealthStatus,
    streaming::{ChatStreamChunk, process_openai_stream},
};

/// Thin client for any OpenAI-compatible chat API.
///
/// Keeps a preconfigured `reqwest::Client` (timeout + default headers).
#[derive(Debug)]
pub struct OpenAiService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_chat: String,
    url_models: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl OpenAiService {
    /// Creates a new service from the given config.
    ///
    /// # Errors
    /// - [`AiLlmError::Provider`] with `InvalidProvider` if `cfg.provider` is not OpenAi
    /// - [`AiLlmError::Provider`] with `MissingApiKey` if `cfg.api_key` is `None`
    /// - [`AiLlmError::Provider`] with `InvalidEndpoint` if `cfg.endpoint` is invalid
    /// - [`AiLlmError::HttpTransport`] if the HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::OpenAi {
            return Err(
                ProviderError::new(Provider::OpenAi, ProviderErrorKind::InvalidProvider).into(),
            );
        }

        let api_key = cfg.api_key.clone().ok_or_else(|| {
            ProviderError::new(Provider::OpenAi, ProviderErrorKind::MissingApiKey)
        })?;

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ProviderError::new(
                Provider::OpenAi,
                ProviderErrorKind::InvalidEndpoint(cfg.endpoint.clone()),
            )
            .into());
        }

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
                ProviderError::new(
                    Provider::OpenAi,
                    ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                )
            })?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let base = endpoint.trim_end_matches('/').to_string();
        let url_chat = format!("{}/v1/chat/completions", base);
        let url_models = format!("{}/v1/models", base);

        info!(
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            timeout_secs = cfg.timeout_secs.unwrap_or(120),
            "OpenAiService initialized"
        );

        Ok(Self {
            client,
            cfg,
            url_chat,
            url_models,
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// Opens a streaming chat completion and forwards deltas into `tx`.
    ///
    /// # Errors
    /// - [`AiLlmError::Provider`] with `HttpStatus` for non-2xx responses
    /// - [`AiLlmError::HttpTransport`] for client/network failures
    /// - [`AiLlmError::Provider`] with `StreamTruncated` for an unusable stream
    pub async fn stream_chat(
        &self,
        system: &str,
        user: &str,
        tx: mpsc::Sender<ChatStreamChunk>,
    ) -> Result<(), AiLlmError> {
        let started = Instant::now();
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });

        let body = ChatCompletionRequest {
            model: &self.cfg.model,
            messages,
            stream: true,
            max_tokens: self.cfg.max_tokens,
            temperature: self.cfg.temperature,
        };

        debug!(
            model = %self.cfg.model,
            prompt_len = user.len(),
            "POST {}", self.url_chat
        );

        let resp = self.client.post(&self.url_chat).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let url = self.url_chat.clone();
            let text = resp.text().await.unwrap_or_default();
            let snippet = make_snippet(&text);

            error!(
                %status,
                %url,
                %snippet,
                model = %self.cfg.model,
                latency_ms = started.elapsed().as_millis(),
                "chat completions returned non-success status"
            );

            return Err(ProviderError::new(
                Provider::OpenAi,
                ProviderErrorKind::HttpStatus(HttpError {
                    status,
                    url,
                    snippet,
                }),
            )
            .into());
        }

        process_openai_stream(resp, tx).await?;
        debug!(
            latency_ms = started.elapsed().as_millis(),
            "stream drained"
        );
        Ok(())
    }

    /// Best-effort health probe: `GET {endpoint}/v1/models`.
    pub async fn health(&self) -> HealthStatus {
        let started = Instant::now();
        match self.client.get(&self.url_models).send().await {
            Ok(resp) if resp.status().is_success() => HealthStatus::ok(
                "openai",
                &self.cfg.endpoint,
                Some(&self.cfg.model),
                started.elapsed().as_millis(),
                "models endpoint reachable",
            ),
            Ok(resp) => HealthStatus::fail(
                "openai",
                &self.cfg.endpoint,
                Some(&self.cfg.model),
                started.elapsed().as_millis(),
                format!("status {}", resp.status()),
            ),
            Err(e) => HealthStatus::fail(
                "openai",
                &self.cfg.endpoint,
                Some(&self.cfg.model),
                started.elapsed().as_millis(),
                e.to_string(),
            ),
        }
    }
}
