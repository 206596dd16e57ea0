//! Streaming chat service over interchangeable LLM backends.
//!
//! The crate exposes a single enum client, [`LlmStreamClient`], with concrete
//! implementations per provider (OpenAI-compatible API, local Ollama, and an
//! in-memory stub for tests). No `async-trait`, no heap trait objects; plain
//! `async fn` and enum dispatch.
//!
//! Responsibilities:
//! - open a streaming chat completion and forward deltas through a bounded
//!   `mpsc` channel (backpressure on the network read when the consumer lags),
//! - normalize transport/provider failures into [`error_handler::AiLlmError`],
//! - provide lightweight health probes suitable for a `/health` endpoint.

pub mod config;
pub mod error_handler;
pub mod health_service;
pub mod services;
pub mod streaming;

use tokio::sync::mpsc;
use tracing::debug;

use config::llm_model_config::LlmModelConfig;
use config::llm_provider::LlmProvider;
use error_handler::AiLlmError;
use health_service::HealthStatus;
use services::{ollama_service::OllamaService, open_ai_service::OpenAiService};
use streaming::ChatStreamChunk;

/// Thin enum client for dispatch across providers.
pub enum LlmStreamClient {
    OpenAi(OpenAiService),
    Ollama(OllamaService),
    Stub(services::stub_service::StubService),
}

impl LlmStreamClient {
    /// Constructs a concrete client from a complete model config.
    ///
    /// # Errors
    /// Propagates constructor validation of the selected service
    /// (provider mismatch, missing API key, invalid endpoint).
    pub fn from_config(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        Ok(match cfg.provider {
            LlmProvider::OpenAi => Self::OpenAi(OpenAiService::new(cfg)?),
            LlmProvider::Ollama => Self::Ollama(OllamaService::new(cfg)?),
            LlmProvider::Stub => Self::Stub(services::stub_service::StubService::new()),
        })
    }

    /// Model identifier configured for this client.
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi(c) => c.model(),
            Self::Ollama(c) => c.model(),
            Self::Stub(c) => c.model(),
        }
    }

    /// Provider label for persistence and logs.
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => "openai",
            Self::Ollama(_) => "ollama",
            Self::Stub(_) => "stub",
        }
    }

    /// Streams a chat completion into `tx` as [`ChatStreamChunk`] values.
    ///
    /// The call returns once the provider stream is fully drained (after a
    /// final `Done` was sent) or on the first transport/provider failure.
    /// A closed receiver is treated as cancellation: the upstream HTTP read
    /// stops and the call returns `Ok(())`.
    pub async fn stream_chat(
        &self,
        system: &str,
        user: &str,
        tx: mpsc::Sender<ChatStreamChunk>,
    ) -> Result<(), AiLlmError> {
        debug!(
            provider = self.provider_name(),
            model = self.model(),
            user_len = user.len(),
            "stream_chat start"
        );
        match self {
            Self::OpenAi(c) => c.stream_chat(system, user, tx).await,
            Self::Ollama(c) => c.stream_chat(system, user, tx).await,
            Self::Stub(c) => c.stream_chat(system, user, tx).await,
        }
    }

    /// Best-effort health probe; never fails, maps errors to `ok=false`.
    pub async fn health(&self) -> HealthStatus {
        match self {
            Self::OpenAi(c) => c.health().await,
            Self::Ollama(c) => c.health().await,
            Self::Stub(c) => c.health(),
        }
    }
}
