//! LLM streaming adapter.
//!
//! One operation: [`analyze`]: a restartable-per-call streamed analysis
//! delivered through a [`ChunkSink`]. The adapter:
//! - forwards model deltas as ANALYSIS chunks at line granularity,
//! - parses the accumulated text against the findings schema on completion,
//!   retrying ONCE with a stricter system instruction,
//! - terminates the sequence with a synthetic DONE chunk (count summary) or
//!   an ERROR chunk carrying the sanitized cause,
//! - honors a hard deadline across both attempts,
//! - treats a dropped subscriber as cancellation and stops the upstream read
//!   within one buffered chunk.
//!
//! State machine per call: `OPENING → STREAMING → (VALIDATING → DONE) |
//! ERROR`; transitions are single-direction.

pub mod schema;

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use llm_service::LlmStreamClient;
use llm_service::streaming::{ChatStreamChunk, STREAM_BUFFER_CHUNKS};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::Error;
use crate::findings::ReviewFindings;
use crate::prompt::{PromptResult, strict_system_prompt};

/// Chunk kinds relayed to subscribers. ANALYSIS carries model text;
/// SUGGESTION/SECURITY/PERFORMANCE/COMMENTARY are reserved classifications
/// for relays that post-process the stream; ERROR/DONE/PUBLISHED terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkKind {
    Analysis,
    Suggestion,
    Security,
    Performance,
    Commentary,
    Error,
    Done,
    Published,
}

/// One streamed unit, serialized verbatim into SSE `data:` bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewChunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Monotonic nanoseconds since process start.
    pub timestamp: u128,
    /// Sanitized failure message, present on ERROR chunks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

fn monotonic_ns() -> u128 {
    PROCESS_EPOCH
        .get_or_init(Instant::now)
        .elapsed()
        .as_nanos()
}

impl ReviewChunk {
    pub fn new(kind: ChunkKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: None,
            timestamp: monotonic_ns(),
            error: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Where chunks go: a live subscriber or nowhere (worker shape).
pub enum ChunkSink {
    Subscriber(mpsc::Sender<ReviewChunk>),
    Discard,
}

impl ChunkSink {
    /// Delivers a chunk; `false` means the subscriber disconnected.
    pub async fn send(&self, chunk: ReviewChunk) -> bool {
        match self {
            Self::Subscriber(tx) => tx.send(chunk).await.is_ok(),
            Self::Discard => true,
        }
    }
}

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct AnalyzeConfig {
    /// Hard deadline for the whole call, both attempts included.
    pub timeout: Duration,
    /// Extra attempts after a schema failure (default 1).
    pub schema_retries: u32,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            schema_retries: 1,
        }
    }
}

/// Successful analysis: validated findings plus the raw text they came from.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub findings: ReviewFindings,
    pub raw_response: String,
}

/// Failed analysis; `raw_response` is preserved for schema failures so the
/// review can persist what the model actually said.
#[derive(Debug)]
pub struct AnalyzeFailure {
    pub error: Error,
    pub raw_response: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterState {
    Opening,
    Streaming,
    Validating,
    Done,
    Error,
}

/// Runs one streamed analysis against the configured model.
pub async fn analyze(
    llm: &LlmStreamClient,
    prompt: &PromptResult,
    cfg: &AnalyzeConfig,
    sink: &ChunkSink,
) -> Result<AnalysisOutcome, AnalyzeFailure> {
    let started = Instant::now();
    let mut last_raw: Option<String> = None;
    let mut last_schema_error = String::new();

    for attempt in 0..=cfg.schema_retries {
        let system = if attempt == 0 {
            prompt.system.clone()
        } else {
            strict_system_prompt()
        };

        let Some(remaining) = cfg.timeout.checked_sub(started.elapsed()) else {
            return Err(timeout_failure(sink, last_raw).await);
        };

        debug!(attempt, state = ?AdapterState::Opening, "llm analysis attempt");
        let pass = tokio::time::timeout(
            remaining,
            stream_one_pass(llm, &system, &prompt.user, sink),
        )
        .await;

        let outcome = match pass {
            Err(_) => return Err(timeout_failure(sink, last_raw).await),
            Ok(o) => o,
        };

        let raw = match outcome {
            PassOutcome::Cancelled => {
                debug!("subscriber cancelled mid-stream");
                return Err(AnalyzeFailure {
                    error: Error::Cancelled,
                    raw_response: None,
                });
            }
            PassOutcome::Failed(e) => {
                let error = Error::Llm(e);
                emit_error(sink, &error).await;
                return Err(AnalyzeFailure {
                    error,
                    raw_response: last_raw,
                });
            }
            PassOutcome::Completed(raw) => raw,
        };

        debug!(state = ?AdapterState::Validating, chars = raw.len(), "validating model output");
        match schema::parse_findings(&raw) {
            Ok(findings) => {
                let done = ReviewChunk::new(
                    ChunkKind::Done,
                    format!("Analysis complete. Found {} issues.", findings.issues.len()),
                )
                .with_metadata(
                    serde_json::json!({
                        "issues": findings.issues.len(),
                        "notes": findings.notes.len(),
                    })
                    .to_string(),
                );
                if !sink.send(done).await {
                    return Err(AnalyzeFailure {
                        error: Error::Cancelled,
                        raw_response: None,
                    });
                }
                debug!(state = ?AdapterState::Done, "analysis complete");
                return Ok(AnalysisOutcome {
                    findings,
                    raw_response: raw,
                });
            }
            Err(detail) => {
                warn!(attempt, %detail, "schema validation failed");
                last_schema_error = detail;
                last_raw = Some(raw);
            }
        }
    }

    let error = Error::LlmSchemaInvalid(last_schema_error);
    emit_error(sink, &error).await;
    Err(AnalyzeFailure {
        error,
        raw_response: last_raw,
    })
}

enum PassOutcome {
    Completed(String),
    Cancelled,
    Failed(llm_service::error_handler::AiLlmError),
}

/// One provider pass: producer streams into a bounded channel, the consumer
/// accumulates and relays complete lines as ANALYSIS chunks.
async fn stream_one_pass(
    llm: &LlmStreamClient,
    system: &str,
    user: &str,
    sink: &ChunkSink,
) -> PassOutcome {
    let (tx, mut rx) = mpsc::channel::<ChatStreamChunk>(STREAM_BUFFER_CHUNKS);

    let producer = llm.stream_chat(system, user, tx);
    let consumer = async {
        let mut accumulated = String::new();
        let mut line_buffer = String::new();
        let mut cancelled = false;

        while let Some(chunk) = rx.recv().await {
            match chunk {
                ChatStreamChunk::Delta(delta) => {
                    accumulated.push_str(&delta);
                    line_buffer.push_str(&delta);
                    // Relay at line granularity to keep SSE overhead sane.
                    while let Some(pos) = line_buffer.find('\n') {
                        let line: String = line_buffer.drain(..=pos).collect();
                        if !sink
                            .send(ReviewChunk::new(ChunkKind::Analysis, line))
                            .await
                        {
                            cancelled = true;
                            break;
                        }
                    }
                    if cancelled {
                        break;
                    }
                }
                ChatStreamChunk::Done => {
                    if !line_buffer.is_empty() {
                        let rest = std::mem::take(&mut line_buffer);
                        if !sink.send(ReviewChunk::new(ChunkKind::Analysis, rest)).await {
                            cancelled = true;
                        }
                    }
                    break;
                }
            }
        }
        // Dropping rx here signals the producer to stop reading upstream.
        drop(rx);
        (accumulated, cancelled)
    };

    debug!(state = ?AdapterState::Streaming, "relaying model output");
    let (producer_result, (accumulated, cancelled)) = tokio::join!(producer, consumer);

    if cancelled {
        return PassOutcome::Cancelled;
    }
    if let Err(e) = producer_result {
        return PassOutcome::Failed(e);
    }
    PassOutcome::Completed(accumulated)
}

async fn emit_error(sink: &ChunkSink, error: &Error) {
    debug!(state = ?AdapterState::Error, code = error.surface_code(), "analysis failed");
    let chunk =
        ReviewChunk::new(ChunkKind::Error, error.surface_code()).with_error(error.to_string());
    let _ = sink.send(chunk).await;
}

async fn timeout_failure(sink: &ChunkSink, raw: Option<String>) -> AnalyzeFailure {
    let error = Error::LlmTimeout;
    emit_error(sink, &error).await;
    AnalyzeFailure {
        error,
        raw_response: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{PromptConfig, PromptInput, assemble};
    use llm_service::services::stub_service::StubService;
    use pretty_assertions::assert_eq;

    const VALID_JSON: &str = r#"{"summary":"found it","issues":[{"file":"src/dao.rs","start_line":12,"severity":"critical","title":"SQL injection","confidence_score":0.9}],"notes":[]}"#;

    fn prompt() -> PromptResult {
        assemble(
            &PromptInput {
                diff_text: "diff",
                ..Default::default()
            },
            &PromptConfig::default(),
        )
    }

    fn subscriber() -> (ChunkSink, mpsc::Receiver<ReviewChunk>) {
        let (tx, rx) = mpsc::channel(64);
        (ChunkSink::Subscriber(tx), rx)
    }

    async fn drain(mut rx: mpsc::Receiver<ReviewChunk>) -> Vec<ReviewChunk> {
        let mut out = Vec::new();
        while let Ok(c) = rx.try_recv() {
            out.push(c);
        }
        out
    }

    #[tokio::test]
    async fn streams_analysis_then_done() {
        let llm = LlmStreamClient::Stub(StubService::with_responses([VALID_JSON]));
        let (sink, rx) = subscriber();

        let outcome = analyze(&llm, &prompt(), &AnalyzeConfig::default(), &sink)
            .await
            .unwrap();
        assert_eq!(outcome.findings.issues.len(), 1);
        assert_eq!(outcome.raw_response, VALID_JSON);

        let chunks = drain(rx).await;
        assert!(matches!(chunks.last().unwrap().kind, ChunkKind::Done));
        assert!(
            chunks
                .iter()
                .any(|c| matches!(c.kind, ChunkKind::Analysis))
        );
        assert_eq!(
            chunks.last().unwrap().content,
            "Analysis complete. Found 1 issues."
        );
    }

    #[tokio::test]
    async fn schema_failure_then_strict_retry_recovers() {
        let llm = LlmStreamClient::Stub(StubService::with_responses(["not json", VALID_JSON]));
        let (sink, rx) = subscriber();

        let outcome = analyze(&llm, &prompt(), &AnalyzeConfig::default(), &sink)
            .await
            .unwrap();
        // The raw response is the second (valid) attempt.
        assert_eq!(outcome.raw_response, VALID_JSON);

        let chunks = drain(rx).await;
        assert!(matches!(chunks.last().unwrap().kind, ChunkKind::Done));
    }

    #[tokio::test]
    async fn double_schema_failure_is_terminal_with_raw_preserved() {
        let llm = LlmStreamClient::Stub(StubService::with_responses(["not json", "still not"]));
        let (sink, rx) = subscriber();

        let failure = analyze(&llm, &prompt(), &AnalyzeConfig::default(), &sink)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, Error::LlmSchemaInvalid(_)));
        assert_eq!(failure.raw_response.as_deref(), Some("still not"));

        let chunks = drain(rx).await;
        let last = chunks.last().unwrap();
        assert!(matches!(last.kind, ChunkKind::Error));
        assert_eq!(last.content, "LLM_SCHEMA_INVALID");
        assert!(last.error.is_some());
    }

    #[tokio::test]
    async fn timestamps_are_monotonic() {
        let llm = LlmStreamClient::Stub(StubService::with_responses([VALID_JSON]));
        let (sink, rx) = subscriber();
        analyze(&llm, &prompt(), &AnalyzeConfig::default(), &sink)
            .await
            .unwrap();
        let chunks = drain(rx).await;
        for pair in chunks.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn dropped_subscriber_cancels_analysis() {
        let llm = LlmStreamClient::Stub(StubService::with_responses([VALID_JSON]));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChunkSink::Subscriber(tx);

        let failure = analyze(&llm, &prompt(), &AnalyzeConfig::default(), &sink)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, Error::Cancelled));
    }

    #[test]
    fn chunk_serializes_with_type_field() {
        let chunk = ReviewChunk::new(ChunkKind::Analysis, "text");
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "ANALYSIS");
        assert_eq!(json["content"], "text");
        assert!(json.get("metadata").is_none());
    }
}
