/// Represents the provider (backend) used for streaming chat inference.
///
/// Adding more providers (e.g., Anthropic, Mistral API) is done by
/// extending this enum and the matching service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Any OpenAI-compatible `/v1/chat/completions` API.
    OpenAi,
    /// Local Ollama runtime for on-device inference.
    Ollama,
    /// In-memory scripted backend for tests and dry runs.
    Stub,
}

impl LlmProvider {
    /// Parses the `LLM_KIND` value (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "chatgpt" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            "stub" => Some(Self::Stub),
            _ => None,
        }
    }
}
