//! GET …/stream and …/stream-and-publish
//!
//! Relays pipeline chunks as SSE. Every event is one `data: <json>\n\n`
//! frame; the stream always terminates with DONE, PUBLISHED or ERROR. A
//! disconnected client cancels the pipeline upstream (nothing persisted).

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use review_pipeline::llm::{ChunkSink, ReviewChunk};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::app_state::AppState;
use crate::error_handler::AppError;
use crate::middleware_layer::correlation::{echo_header, request_context};
use crate::routes::parse_change_request;

/// Streaming analysis without publication.
pub async fn stream_review(
    State(state): State<Arc<AppState>>,
    Path((provider, repository_id, n)): Path<(String, String, u64)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    start_stream(state, provider, repository_id, n, headers, false).await
}

/// Streaming analysis, publishing findings on normal termination.
pub async fn stream_and_publish_review(
    State(state): State<Arc<AppState>>,
    Path((provider, repository_id, n)): Path<(String, String, u64)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    start_stream(state, provider, repository_id, n, headers, true).await
}

async fn start_stream(
    state: Arc<AppState>,
    provider: String,
    repository_id: String,
    n: u64,
    headers: HeaderMap,
    publish: bool,
) -> Result<impl IntoResponse, AppError> {
    let cr = parse_change_request(&provider, &repository_id, n)?;
    let ctx = request_context(&headers);
    debug!(%cr, correlation_id = %ctx.correlation_id, publish, "sse stream requested");

    let (tx, rx) = mpsc::channel::<ReviewChunk>(16);
    {
        let pipeline = state.pipeline.clone();
        let ctx = ctx.clone();
        let cr = cr.clone();
        tokio::spawn(async move {
            // The terminal chunk (DONE/PUBLISHED/ERROR) travels on the
            // channel; the result itself is only for logs.
            if let Err(e) = pipeline
                .run_streaming(&cr, &ctx, ChunkSink::Subscriber(tx), publish)
                .await
            {
                debug!(%cr, code = e.surface_code(), "streamed review ended with error");
            }
        });
    }

    let sse = Sse::new(chunk_stream(rx)).keep_alive(KeepAlive::default());
    Ok((echo_header(&ctx), sse))
}

/// Adapts the chunk channel into SSE events.
fn chunk_stream(
    rx: mpsc::Receiver<ReviewChunk>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        let event = match serde_json::to_string(&chunk) {
            Ok(json) => Event::default().data(json),
            Err(e) => Event::default()
                .data(format!("{{\"type\":\"ERROR\",\"content\":\"serialization: {e}\"}}")),
        };
        Some((Ok(event), rx))
    })
}

#[cfg(test)]
mod tests {
    use review_pipeline::llm::{ChunkKind, ReviewChunk};

    /// SSE bodies must be single-line JSON: the serializer escapes newlines,
    /// so `data: <json>\n\n` framing cannot be broken by content.
    #[test]
    fn chunk_json_never_contains_raw_newlines() {
        let chunk = ReviewChunk::new(ChunkKind::Analysis, "line one\nline two\n");
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains('\n'));
        assert!(json.starts_with('{') && json.ends_with('}'));
    }
}
