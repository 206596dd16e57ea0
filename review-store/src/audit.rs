//! Audit records for context retrieval.
//!
//! One `context_retrieval_sessions` row per enrichment run, with a
//! `strategy_executions` child row per strategy. Written best-effort after
//! enrichment; the pipeline never fails on an audit write.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::errors::StoreResult;
use crate::store::ReviewStore;

/// Snapshot of one enrichment run.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSessionRecord {
    pub provider: String,
    pub repository_id: String,
    pub change_request_number: i64,
    pub correlation_id: String,
    pub match_count: i32,
    /// Characters of the assembled prompt, when one was produced.
    pub prompt_chars: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub strategies: Vec<StrategyExecutionRecord>,
}

/// Outcome of a single strategy inside a session.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyExecutionRecord {
    pub strategy: String,
    /// SUCCESS / TIMEOUT / ERROR / SKIPPED.
    pub status: String,
    pub duration_ms: i64,
    pub match_count: i32,
    /// Cause for non-success outcomes.
    pub detail: Option<String>,
}

impl ReviewStore {
    /// Persists one context-retrieval session with its strategy rows.
    pub async fn record_context_session(&self, session: &ContextSessionRecord) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        let session_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO context_retrieval_sessions
                (id, provider, repository_id, change_request_number,
                 correlation_id, match_count, prompt_chars, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session_id)
        .bind(&session.provider)
        .bind(&session.repository_id)
        .bind(session.change_request_number)
        .bind(&session.correlation_id)
        .bind(session.match_count)
        .bind(session.prompt_chars)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await?;

        for s in &session.strategies {
            sqlx::query(
                r#"
                INSERT INTO strategy_executions
                    (id, session_id, strategy, status, duration_ms, match_count, detail)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(&s.strategy)
            .bind(&s.status)
            .bind(s.duration_ms)
            .bind(s.match_count)
            .bind(&s.detail)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Best-effort variant: failures are logged, never propagated.
    pub async fn record_context_session_best_effort(&self, session: &ContextSessionRecord) {
        if let Err(e) = self.record_context_session(session).await {
            warn!(error = %e, "context session audit write failed");
        }
    }
}
