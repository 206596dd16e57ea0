//! HTTP surface: synchronous SSE streaming, publish-only, async enqueue and
//! status endpoints, plus health.
//!
//! Routing:
//! - GET  /api/v1/reviews/{provider}/{repository_id}/change-requests/{n}/stream
//! - GET  /api/v1/reviews/{provider}/{repository_id}/change-requests/{n}/stream-and-publish
//! - POST /api/v1/reviews/{provider}/{repository_id}/change-requests/{n}/review
//! - POST /api/v1/async-reviews/{provider}/{repository_id}/change-requests/{n}
//! - GET  /api/v1/async-reviews/{request_id}/status
//! - GET  /api/v1/health
//!
//! The inbound `X-Correlation-ID` header is honored (or generated), echoed on
//! responses, and carried through the pipeline and queue records.

pub mod core;
pub mod error_handler;
pub mod middleware_layer;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::app_state::AppState;
use crate::error_handler::AppError;

/// Builds the application router over the shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/reviews/{provider}/{repository_id}/change-requests/{n}/stream",
            get(routes::reviews::stream_review_route::stream_review),
        )
        .route(
            "/api/v1/reviews/{provider}/{repository_id}/change-requests/{n}/stream-and-publish",
            get(routes::reviews::stream_review_route::stream_and_publish_review),
        )
        .route(
            "/api/v1/reviews/{provider}/{repository_id}/change-requests/{n}/review",
            post(routes::reviews::publish_review_route::publish_review),
        )
        .route(
            "/api/v1/async-reviews/{provider}/{repository_id}/change-requests/{n}",
            post(routes::async_reviews::enqueue_route::enqueue_review),
        )
        .route(
            "/api/v1/async-reviews/{request_id}/status",
            get(routes::async_reviews::status_route::review_status),
        )
        .route("/api/v1/health", get(routes::health_route::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds and serves the API until the process exits.
pub async fn start(state: Arc<AppState>, bind_addr: &str) -> Result<(), AppError> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(AppError::Bind)?;
    info!(%bind_addr, "http server listening");
    axum::serve(listener, router)
        .await
        .map_err(AppError::Server)?;
    Ok(())
}
