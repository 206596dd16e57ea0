//! Transactional review store over a Postgres pool.

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};
use crate::model::{
    NewIssue, NewNote, NewReview, ReviewAggregate, ReviewRecord, ReviewState, StoredIssue,
    StoredNote,
};

/// Handle to the review tables, cheap to clone.
#[derive(Clone)]
pub struct ReviewStore {
    pool: PgPool,
}

impl ReviewStore {
    /// Connects with a bounded pool and a statement timeout.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!(max_connections, "review store connected");
        Ok(Self { pool })
    }

    /// Wraps an existing pool (tests, shared pools).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects lazily: the URL is validated now, connections are opened on
    /// first use. Lets the process boot while the database is still coming
    /// up.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Upserts a review by its compound key, replacing findings.
    ///
    /// Preserves the original `created_at` on conflict. State defaults to
    /// PENDING unless the caller passed one. Returns the review id.
    pub async fn save(&self, review: NewReview) -> StoreResult<Uuid> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let state = review.state.unwrap_or(ReviewState::Pending);
        let completed_at = state.is_terminal().then_some(now);

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO reviews
                (id, provider, repository_id, change_request_number, state,
                 created_at, updated_at, completed_at,
                 llm_provider, llm_model, raw_response, summary, overall_confidence)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (repository_id, change_request_number, provider)
            DO UPDATE SET
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at,
                llm_provider = EXCLUDED.llm_provider,
                llm_model = EXCLUDED.llm_model,
                raw_response = EXCLUDED.raw_response,
                summary = EXCLUDED.summary,
                overall_confidence = EXCLUDED.overall_confidence
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&review.provider)
        .bind(&review.repository_id)
        .bind(review.change_request_number)
        .bind(state.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(&review.llm_provider)
        .bind(&review.llm_model)
        .bind(&review.raw_response)
        .bind(&review.summary)
        .bind(review.overall_confidence)
        .fetch_one(&mut *tx)
        .await?;

        replace_findings(&mut tx, id, &review.issues, &review.notes).await?;
        tx.commit().await?;

        debug!(review_id = %id, issues = review.issues.len(), notes = review.notes.len(), "review saved");
        Ok(id)
    }

    /// Returns the materialized aggregate, or `None` for an unknown id.
    pub async fn find_by_id(&self, review_id: Uuid) -> StoreResult<Option<ReviewAggregate>> {
        let review: Option<ReviewRecord> =
            sqlx::query_as(r#"SELECT * FROM reviews WHERE id = $1"#)
                .bind(review_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(review) = review else {
            return Ok(None);
        };
        let (issues, notes) = self.load_findings(review_id).await?;
        Ok(Some(ReviewAggregate {
            review,
            issues,
            notes,
        }))
    }

    /// Looks a review up by its compound key.
    pub async fn find_by_ref(
        &self,
        provider: &str,
        repository_id: &str,
        change_request_number: i64,
    ) -> StoreResult<Option<ReviewAggregate>> {
        let review: Option<ReviewRecord> = sqlx::query_as(
            r#"
            SELECT * FROM reviews
            WHERE repository_id = $1 AND change_request_number = $2 AND provider = $3
            "#,
        )
        .bind(repository_id)
        .bind(change_request_number)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        let Some(review) = review else {
            return Ok(None);
        };
        let id = review.id;
        let (issues, notes) = self.load_findings(id).await?;
        Ok(Some(ReviewAggregate {
            review,
            issues,
            notes,
        }))
    }

    /// Applies a state transition, enforcing lifecycle legality.
    ///
    /// Sets `completed_at` iff the target state is terminal (exactly once:
    /// terminal states cannot transition further, so the column is written a
    /// single time).
    ///
    /// # Errors
    /// [`StoreError::IllegalTransition`] for a move the lifecycle forbids,
    /// [`StoreError::NotFound`] for an unknown id.
    pub async fn update_state(&self, review_id: Uuid, to: ReviewState) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        transition_state(&mut tx, review_id, to).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Atomic replacement of findings plus a state change.
    pub async fn update_result_and_state(
        &self,
        review_id: Uuid,
        issues: Vec<NewIssue>,
        notes: Vec<NewNote>,
        summary: Option<String>,
        overall_confidence: Option<f32>,
        raw_response: Option<String>,
        to: ReviewState,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        transition_state(&mut tx, review_id, to).await?;
        sqlx::query(
            r#"
            UPDATE reviews
            SET summary = $2, overall_confidence = $3,
                raw_response = COALESCE($4, raw_response)
            WHERE id = $1
            "#,
        )
        .bind(review_id)
        .bind(&summary)
        .bind(overall_confidence)
        .bind(&raw_response)
        .execute(&mut *tx)
        .await?;
        replace_findings(&mut tx, review_id, &issues, &notes).await?;
        tx.commit().await?;
        debug!(%review_id, state = to.as_str(), issues = issues.len(), "result and state updated");
        Ok(())
    }

    /// Records the SCM comment id after a successful inline publication.
    pub async fn mark_issue_published(
        &self,
        issue_id: Uuid,
        scm_comment_id: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE review_issues
            SET inline_comment_posted = TRUE, scm_comment_id = $2
            WHERE id = $1
            "#,
        )
        .bind(issue_id)
        .bind(scm_comment_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes reviews older than the retention window; findings cascade.
    ///
    /// Returns the number of deleted reviews.
    pub async fn cleanup_expired(
        &self,
        now: chrono::DateTime<Utc>,
        retention: chrono::Duration,
    ) -> StoreResult<u64> {
        let cutoff = now - retention;
        let result = sqlx::query(r#"DELETE FROM reviews WHERE created_at < $1"#)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, %cutoff, "expired reviews removed");
        }
        Ok(deleted)
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_findings(
        &self,
        review_id: Uuid,
    ) -> StoreResult<(Vec<StoredIssue>, Vec<StoredNote>)> {
        let issues: Vec<StoredIssue> = sqlx::query_as(
            r#"SELECT * FROM review_issues WHERE review_id = $1 ORDER BY file, start_line, id"#,
        )
        .bind(review_id)
        .fetch_all(&self.pool)
        .await?;
        let notes: Vec<StoredNote> = sqlx::query_as(
            r#"SELECT * FROM review_notes WHERE review_id = $1 ORDER BY file, line, id"#,
        )
        .bind(review_id)
        .fetch_all(&self.pool)
        .await?;
        Ok((issues, notes))
    }
}

/// Loads the current state with a row lock and applies the transition.
async fn transition_state(
    tx: &mut Transaction<'_, Postgres>,
    review_id: Uuid,
    to: ReviewState,
) -> StoreResult<()> {
    let current_raw: Option<String> =
        sqlx::query_scalar(r#"SELECT state FROM reviews WHERE id = $1 FOR UPDATE"#)
            .bind(review_id)
            .fetch_optional(&mut **tx)
            .await?;
    let Some(current_raw) = current_raw else {
        return Err(StoreError::NotFound(review_id));
    };
    let from = ReviewState::parse(&current_raw)
        .ok_or_else(|| StoreError::Database(sqlx::Error::Decode(
            format!("unknown persisted state `{current_raw}`").into(),
        )))?;

    if !from.can_transition_to(to) {
        return Err(StoreError::IllegalTransition { from, to });
    }

    let now = Utc::now();
    let completed_at = to.is_terminal().then_some(now);
    sqlx::query(
        r#"
        UPDATE reviews
        SET state = $2, updated_at = $3,
            completed_at = COALESCE(completed_at, $4)
        WHERE id = $1
        "#,
    )
    .bind(review_id)
    .bind(to.as_str())
    .bind(now)
    .bind(completed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Deletes and re-inserts the composed findings of a review.
async fn replace_findings(
    tx: &mut Transaction<'_, Postgres>,
    review_id: Uuid,
    issues: &[NewIssue],
    notes: &[NewNote],
) -> StoreResult<()> {
    sqlx::query(r#"DELETE FROM review_issues WHERE review_id = $1"#)
        .bind(review_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(r#"DELETE FROM review_notes WHERE review_id = $1"#)
        .bind(review_id)
        .execute(&mut **tx)
        .await?;

    for issue in issues {
        sqlx::query(
            r#"
            INSERT INTO review_issues
                (id, review_id, file, start_line, severity, title, suggestion,
                 confidence_score, inline_comment_posted, scm_comment_id,
                 fallback_reason, position_metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(review_id)
        .bind(&issue.file)
        .bind(issue.start_line)
        .bind(&issue.severity)
        .bind(&issue.title)
        .bind(&issue.suggestion)
        .bind(issue.confidence_score)
        .bind(issue.inline_comment_posted)
        .bind(&issue.scm_comment_id)
        .bind(&issue.fallback_reason)
        .bind(&issue.position_metadata)
        .execute(&mut **tx)
        .await?;
    }

    for note in notes {
        sqlx::query(
            r#"
            INSERT INTO review_notes (id, review_id, file, line, note)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(review_id)
        .bind(&note.file)
        .bind(note.line)
        .bind(&note.note)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
