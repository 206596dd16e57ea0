//! Default LLM config loaded strictly from environment variables.
//!
//! All validation happens here, next to the variables it concerns; there is
//! no generic env-helper layer. The `stub` kind short-circuits with a fixed
//! offline config.
//!
//! # Environment variables
//!
//! - `LLM_KIND`         = provider kind (`openai`, `ollama`, `stub`)
//! - `LLM_MODEL`        = model identifier (required unless `stub`)
//! - `LLM_ENDPOINT`     = inference endpoint base URL (required unless `stub`)
//! - `LLM_API_KEY`      = API key (required for `openai`)
//! - `LLM_MAX_TOKENS`   = optional max tokens (u32)
//! - `LLM_TIMEOUT_SECS` = optional hard deadline for the streamed completion
//!   (defaults to 120)

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{AiLlmError, ConfigError},
};

/// Default hard deadline for a streamed completion.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// A set-and-non-blank environment value, trimmed.
fn setting(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Builds the review-model config from the environment.
///
/// # Errors
/// - [`ConfigError::UnsupportedProvider`] for an unknown `LLM_KIND`
/// - [`ConfigError::MissingVar`] for missing kind/model/endpoint/api-key
/// - [`ConfigError::InvalidFormat`] for a non-HTTP endpoint
/// - [`ConfigError::InvalidNumber`] for unparseable numeric knobs
pub fn config_from_env() -> Result<LlmModelConfig, AiLlmError> {
    let kind_raw = setting("LLM_KIND").ok_or(ConfigError::MissingVar("LLM_KIND"))?;
    let provider =
        LlmProvider::parse(&kind_raw).ok_or(ConfigError::UnsupportedProvider(kind_raw))?;

    if provider == LlmProvider::Stub {
        return Ok(LlmModelConfig {
            provider,
            model: "stub".to_string(),
            endpoint: "stub://local".to_string(),
            api_key: None,
            max_tokens: None,
            temperature: None,
            timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
        });
    }

    let model = setting("LLM_MODEL").ok_or(ConfigError::MissingVar("LLM_MODEL"))?;

    let endpoint = setting("LLM_ENDPOINT").ok_or(ConfigError::MissingVar("LLM_ENDPOINT"))?;
    let scheme_ok = ["http://", "https://"]
        .iter()
        .any(|scheme| endpoint.starts_with(scheme));
    if !scheme_ok {
        return Err(ConfigError::InvalidFormat {
            var: "LLM_ENDPOINT",
            reason: "expected an http:// or https:// URL",
        }
        .into());
    }

    let api_key = setting("LLM_API_KEY");
    if provider == LlmProvider::OpenAi && api_key.is_none() {
        return Err(ConfigError::MissingVar("LLM_API_KEY").into());
    }

    let max_tokens = match setting("LLM_MAX_TOKENS") {
        None => None,
        Some(raw) => Some(raw.parse::<u32>().map_err(|_| ConfigError::InvalidNumber {
            var: "LLM_MAX_TOKENS",
            reason: "expected a positive integer",
        })?),
    };

    let timeout_secs = match setting("LLM_TIMEOUT_SECS") {
        None => DEFAULT_TIMEOUT_SECS,
        Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
            var: "LLM_TIMEOUT_SECS",
            reason: "expected whole seconds",
        })?,
    };

    Ok(LlmModelConfig {
        provider,
        model,
        endpoint,
        api_key,
        max_tokens,
        temperature: Some(0.2),
        timeout_secs: Some(timeout_secs),
    })
}
