//! In-memory stub backend with scripted responses.
//!
//! Used by tests and dry runs to exercise the full streaming path without a
//! live provider. Responses are queued; each `stream_chat` call pops the next
//! one and streams it line by line, then sends `Done`. An empty queue streams
//! an empty completion.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::{
    error_handler::AiLlmError, health_service::HealthStatus, streaming::ChatStreamChunk,
};

#[derive(Debug, Default)]
pub struct StubService {
    responses: Mutex<VecDeque<String>>,
}

impl StubService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a stub preloaded with responses, consumed in order.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    /// Appends a scripted response to the queue.
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("stub response queue poisoned")
            .push_back(response.into());
    }

    pub fn model(&self) -> &str {
        "stub"
    }

    /// Streams the next scripted response, line by line.
    pub async fn stream_chat(
        &self,
        _system: &str,
        _user: &str,
        tx: mpsc::Sender<ChatStreamChunk>,
    ) -> Result<(), AiLlmError> {
        let next = self
            .responses
            .lock()
            .expect("stub response queue poisoned")
            .pop_front();

        if let Some(text) = next {
            for line in text.split_inclusive('\n') {
                if tx
                    .send(ChatStreamChunk::Delta(line.to_string()))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
        }
        let _ = tx.send(ChatStreamChunk::Done).await;
        Ok(())
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::ok("stub", "stub://local", Some("stub"), 0, "always healthy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::STREAM_BUFFER_CHUNKS;
    use pretty_assertions::assert_eq;

    async fn drain(mut rx: mpsc::Receiver<ChatStreamChunk>) -> Vec<ChatStreamChunk> {
        let mut out = Vec::new();
        while let Some(c) = rx.recv().await {
            out.push(c);
        }
        out
    }

    #[tokio::test]
    async fn streams_scripted_response_line_by_line() {
        let stub = StubService::with_responses(["first line\nsecond line"]);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER_CHUNKS);
        stub.stream_chat("sys", "user", tx).await.unwrap();

        let chunks = drain(rx).await;
        assert_eq!(
            chunks,
            vec![
                ChatStreamChunk::Delta("first line\n".into()),
                ChatStreamChunk::Delta("second line".into()),
                ChatStreamChunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn empty_queue_streams_empty_completion() {
        let stub = StubService::new();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER_CHUNKS);
        stub.stream_chat("", "", tx).await.unwrap();
        assert_eq!(drain(rx).await, vec![ChatStreamChunk::Done]);
    }

    #[tokio::test]
    async fn responses_consumed_in_order() {
        let stub = StubService::with_responses(["one", "two"]);
        for expected in ["one", "two"] {
            let (tx, rx) = mpsc::channel(STREAM_BUFFER_CHUNKS);
            stub.stream_chat("", "", tx).await.unwrap();
            let chunks = drain(rx).await;
            assert_eq!(chunks[0], ChatStreamChunk::Delta(expected.into()));
        }
    }
}
