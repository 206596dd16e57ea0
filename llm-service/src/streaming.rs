//! Streamed-completion plumbing shared by the provider services.
//!
//! Providers speak slightly different wire formats (OpenAI SSE frames,
//! Ollama newline-delimited JSON); both are reduced here to a common
//! [`ChatStreamChunk`] sequence delivered through a bounded `mpsc` channel.
//! When the channel is full the network read pauses (backpressure); when the
//! receiver is dropped the read stops (cancellation).
//!
//! Decoding is split in two layers: a [`LineAssembler`] that turns arbitrary
//! byte chunks into complete lines, and per-provider frame interpreters that
//! classify each line.

use futures_util::StreamExt;
use reqwest::Response;
use tokio::sync::mpsc;

use crate::error_handler::{AiLlmError, Provider, ProviderError, ProviderErrorKind};

/// Recommended channel capacity between a provider read loop and a consumer.
pub const STREAM_BUFFER_CHUNKS: usize = 16;

/// One unit of streamed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStreamChunk {
    /// A piece of generated text, in provider byte order.
    Delta(String),
    /// Terminal marker; the accumulated text is complete.
    Done,
}

/// Reassembles newline-delimited lines from arbitrarily split byte chunks.
#[derive(Debug, Default)]
struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Feeds one network chunk; returns every line completed by it.
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(nl) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=nl).collect();
            line.pop(); // the newline itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left once the network stream ends.
    fn remainder(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

/// Classification of one OpenAI-compatible SSE line.
#[derive(Debug, PartialEq, Eq)]
enum OpenAiFrame {
    /// Content and/or a finish signal from a `data:` payload.
    Payload { text: Option<String>, last: bool },
    /// The literal `data: [DONE]` terminator.
    Terminator,
    /// Blank lines, comments, `event:` fields: not ours to decode.
    Skip,
    /// A `data:` payload that failed to decode.
    Garbage(String),
}

#[derive(serde::Deserialize)]
struct ChatDelta {
    choices: Vec<DeltaChoice>,
}

#[derive(serde::Deserialize)]
struct DeltaChoice {
    delta: DeltaBody,
    finish_reason: Option<String>,
}

#[derive(serde::Deserialize)]
struct DeltaBody {
    content: Option<String>,
}

fn interpret_openai_frame(line: &str) -> OpenAiFrame {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return OpenAiFrame::Skip;
    };
    let payload = payload.trim_start();
    if payload.is_empty() {
        return OpenAiFrame::Skip;
    }
    if payload == "[DONE]" {
        return OpenAiFrame::Terminator;
    }
    match serde_json::from_str::<ChatDelta>(payload) {
        Ok(parsed) => {
            let choice = parsed.choices.into_iter().next();
            let last = choice
                .as_ref()
                .map(|c| c.finish_reason.is_some())
                .unwrap_or(false);
            let text = choice
                .and_then(|c| c.delta.content)
                .filter(|t| !t.is_empty());
            OpenAiFrame::Payload { text, last }
        }
        Err(e) => OpenAiFrame::Garbage(e.to_string()),
    }
}

/// What the read loop should do after one interpreted line.
enum LineAction {
    Emit { text: Option<String>, last: bool },
    Finish,
    Continue,
}

/// Drains an OpenAI-compatible SSE response into `tx`.
///
/// A closed receiver stops the read and returns `Ok(())`. A stream that
/// yielded nothing but garbage frames and no terminator is reported as
/// truncated; a stream that simply ends after valid deltas gets a synthetic
/// `Done`.
pub async fn process_openai_stream(
    response: Response,
    tx: mpsc::Sender<ChatStreamChunk>,
) -> Result<(), AiLlmError> {
    let mut assembler = LineAssembler::default();
    let mut body = response.bytes_stream();
    let mut deltas_sent = 0usize;
    let mut garbage_frames = 0usize;

    let mut handle_line = |line: String| -> LineAction {
        match interpret_openai_frame(&line) {
            OpenAiFrame::Terminator => LineAction::Finish,
            OpenAiFrame::Payload { text, last } => LineAction::Emit { text, last },
            OpenAiFrame::Skip => LineAction::Continue,
            OpenAiFrame::Garbage(cause) => {
                garbage_frames += 1;
                tracing::warn!(%cause, line, "discarding undecodable SSE frame");
                LineAction::Continue
            }
        }
    };

    let mut trailing: Vec<String> = Vec::new();
    'network: loop {
        let lines = match body.next().await {
            Some(chunk) => assembler.feed(&chunk?),
            None => {
                // The stream ended; a last frame may lack its newline.
                trailing.extend(assembler.remainder());
                break 'network;
            }
        };
        for line in lines {
            match handle_line(line) {
                LineAction::Finish => {
                    let _ = tx.send(ChatStreamChunk::Done).await;
                    return Ok(());
                }
                LineAction::Emit { text, last } => {
                    if let Some(text) = text {
                        if tx.send(ChatStreamChunk::Delta(text)).await.is_err() {
                            // Consumer went away: cancel the upstream read.
                            return Ok(());
                        }
                        deltas_sent += 1;
                    }
                    if last {
                        let _ = tx.send(ChatStreamChunk::Done).await;
                        return Ok(());
                    }
                }
                LineAction::Continue => {}
            }
        }
    }

    for line in trailing {
        if let LineAction::Emit {
            text: Some(text), ..
        } = handle_line(line)
        {
            if tx.send(ChatStreamChunk::Delta(text)).await.is_err() {
                return Ok(());
            }
            deltas_sent += 1;
        }
    }

    if garbage_frames > 0 && deltas_sent == 0 {
        return Err(ProviderError::new(
            Provider::OpenAi,
            ProviderErrorKind::StreamTruncated(format!(
                "{garbage_frames} undecodable frames, no usable output"
            )),
        )
        .into());
    }
    let _ = tx.send(ChatStreamChunk::Done).await;
    Ok(())
}

/// One line of an Ollama `/api/generate` streaming response.
#[derive(serde::Deserialize)]
struct GenerateLine {
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

/// Drains an Ollama newline-delimited JSON response into `tx`.
///
/// Unlike the SSE path, every non-blank line must decode; Ollama does not
/// interleave unrelated framing.
pub async fn process_ollama_stream(
    response: Response,
    tx: mpsc::Sender<ChatStreamChunk>,
) -> Result<(), AiLlmError> {
    let mut assembler = LineAssembler::default();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        for line in assembler.feed(&chunk?) {
            if deliver_generate_line(&line, &tx).await? {
                return Ok(());
            }
        }
    }

    // A last object may arrive without its newline.
    if let Some(line) = assembler.remainder() {
        if deliver_generate_line(&line, &tx).await? {
            return Ok(());
        }
    }

    let _ = tx.send(ChatStreamChunk::Done).await;
    Ok(())
}

/// Decodes and forwards one generate line; `Ok(true)` ends the stream
/// (terminal object reached or the consumer went away).
async fn deliver_generate_line(
    line: &str,
    tx: &mpsc::Sender<ChatStreamChunk>,
) -> Result<bool, AiLlmError> {
    if line.trim().is_empty() {
        return Ok(false);
    }
    let parsed: GenerateLine = serde_json::from_str(line).map_err(|e| {
        ProviderError::new(Provider::Ollama, ProviderErrorKind::Decode(e.to_string()))
    })?;

    if let Some(text) = parsed.response.filter(|t| !t.is_empty()) {
        if tx.send(ChatStreamChunk::Delta(text)).await.is_err() {
            return Ok(true);
        }
    }
    if parsed.done {
        let _ = tx.send(ChatStreamChunk::Done).await;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn assembler_joins_lines_across_chunk_boundaries() {
        let mut assembler = LineAssembler::default();
        assert!(assembler.feed(b"data: {\"par").is_empty());
        assert_eq!(
            assembler.feed(b"tial\"}\ndata: next"),
            vec!["data: {\"partial\"}".to_string()]
        );
        assert_eq!(assembler.remainder().as_deref(), Some("data: next"));
    }

    #[test]
    fn assembler_strips_crlf_endings() {
        let mut assembler = LineAssembler::default();
        assert_eq!(
            assembler.feed(b"one\r\ntwo\n"),
            vec!["one".to_string(), "two".to_string()]
        );
    }

    #[test]
    fn non_data_framing_is_skipped() {
        assert_eq!(interpret_openai_frame(""), OpenAiFrame::Skip);
        assert_eq!(interpret_openai_frame("event: message_start"), OpenAiFrame::Skip);
        assert_eq!(interpret_openai_frame(": keep-alive comment"), OpenAiFrame::Skip);
        assert_eq!(interpret_openai_frame("data:"), OpenAiFrame::Skip);
    }

    #[test]
    fn terminator_and_finish_reason_are_recognized() {
        assert_eq!(interpret_openai_frame("data: [DONE]"), OpenAiFrame::Terminator);

        let finished =
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(
            interpret_openai_frame(finished),
            OpenAiFrame::Payload {
                text: None,
                last: true
            }
        );
    }

    #[test]
    fn content_payload_extracts_text() {
        let frame = interpret_openai_frame(
            r#"data: {"choices":[{"delta":{"content":"review"},"finish_reason":null}]}"#,
        );
        assert_eq!(
            frame,
            OpenAiFrame::Payload {
                text: Some("review".to_string()),
                last: false
            }
        );
    }

    #[test]
    fn broken_payload_is_garbage() {
        assert!(matches!(
            interpret_openai_frame("data: {not-json"),
            OpenAiFrame::Garbage(_)
        ));
    }

    #[test]
    fn ollama_generate_line_decodes() {
        let mid: GenerateLine = serde_json::from_str(r#"{"response":"Hi","done":false}"#).unwrap();
        assert_eq!(mid.response.as_deref(), Some("Hi"));
        assert!(!mid.done);

        let end: GenerateLine = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(end.done);
        assert_eq!(end.response, None);
    }
}
