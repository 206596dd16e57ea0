//! Pipeline driver: end-to-end orchestration of one review.
//!
//! Two execution shapes share one core:
//! - **sync stream** ([`ReviewPipeline::run_streaming`]) relays chunks to a
//!   live subscriber; a cancelled subscriber aborts the run and nothing is
//!   persisted,
//! - **queued worker** ([`ReviewPipeline::run_queued`]) drives the store
//!   lifecycle `PENDING → PROCESSING → {COMPLETED | FAILED}` and returns the
//!   serialized result for the idempotency record.
//!
//! Best-effort stages (enrichment, expansion, policies, ticket, audit,
//! publish) degrade without failing the review. Critical stages (fetch,
//! parse, analyze, persist) propagate classified errors.

pub mod worker;

use std::time::{Duration, Instant};

use chrono::Utc;
use review_store::audit::{ContextSessionRecord, StrategyExecutionRecord};
use review_store::{NewIssue, NewNote, NewReview, ReviewState, ReviewStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::{AggregationConfig, aggregate};
use crate::context::expand::{ExpandConfig, ExpandedFile, expand_files};
use crate::context::policy_docs::{RepoPolicy, fetch_policies};
use crate::context::ticket::{TicketConfig, TicketContext, fetch_ticket_context};
use crate::context::{ContextOrchestrator, EnrichedDiff};
use crate::diff::{self, DiffDocument};
use crate::errors::{Error, ParseError, PipelineResult};
use crate::findings::{AggregatedFindings, ReviewFindings};
use crate::llm::{AnalyzeConfig, ChunkKind, ChunkSink, ReviewChunk, analyze};
use crate::observability::{MetricsSnapshot, PipelineMetrics, RequestContext};
use crate::prompt::{PromptConfig, PromptInput, PromptResult, assemble};
use crate::publish::{PublishConfig, PublishReport, publish};
use crate::scm::{ChangeRequestMeta, ChangeRequestRef, ScmClient, ScmRouter};
use llm_service::LlmStreamClient;

/// All pipeline knobs, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard per-request deadline (default 10 min).
    pub pipeline_deadline: Duration,
    /// Deadline for each best-effort fetch stage.
    pub best_effort_deadline: Duration,
    pub analyze: AnalyzeConfig,
    pub aggregation: AggregationConfig,
    pub orchestrator: ContextOrchestrator,
    pub expand: ExpandConfig,
    pub ticket: TicketConfig,
    /// Character budget per policy document.
    pub policy_char_budget: usize,
    pub prompt: PromptConfig,
    pub publish: PublishConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_deadline: Duration::from_secs(600),
            best_effort_deadline: Duration::from_secs(15),
            analyze: AnalyzeConfig::default(),
            aggregation: AggregationConfig::default(),
            orchestrator: ContextOrchestrator::default(),
            expand: ExpandConfig::default(),
            ticket: TicketConfig {
                base_url: None,
                timeout: Duration::from_secs(5),
            },
            policy_char_budget: 4_000,
            prompt: PromptConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

/// Outcome of a queued execution, serialized into the idempotency record.
#[derive(Debug, Clone)]
pub struct QueuedOutcome {
    pub review_id: Uuid,
    pub findings: AggregatedFindings,
}

/// The assembled pipeline; cheap to clone per worker.
#[derive(Clone)]
pub struct ReviewPipeline {
    scm: ScmRouter,
    llm: std::sync::Arc<LlmStreamClient>,
    store: ReviewStore,
    cfg: PipelineConfig,
    metrics: std::sync::Arc<PipelineMetrics>,
}

struct ExecutionOutput {
    meta: ChangeRequestMeta,
    diff_doc: DiffDocument,
    aggregated: AggregatedFindings,
    raw_response: Option<String>,
}

struct ExecFailure {
    error: Error,
    raw_response: Option<String>,
    /// True when an ERROR chunk already went out (the LLM adapter emits its
    /// own); the driver must not emit a second one.
    chunk_emitted: bool,
}

impl From<Error> for ExecFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            raw_response: None,
            chunk_emitted: false,
        }
    }
}

impl ReviewPipeline {
    pub fn new(
        scm: ScmRouter,
        llm: std::sync::Arc<LlmStreamClient>,
        store: ReviewStore,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            scm,
            llm,
            store,
            cfg,
            metrics: std::sync::Arc::new(PipelineMetrics::default()),
        }
    }

    pub fn store(&self) -> &ReviewStore {
        &self.store
    }

    pub fn scm(&self) -> &ScmRouter {
        &self.scm
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Sync streaming shape. Relays chunks through `sink`; persists and
    /// (optionally) publishes only when the stream completes normally. A
    /// cancelled subscriber leaves no trace in the store.
    pub async fn run_streaming(
        &self,
        cr: &ChangeRequestRef,
        ctx: &RequestContext,
        sink: ChunkSink,
        publish_after: bool,
    ) -> PipelineResult<()> {
        let started = Instant::now();
        info!(%cr, correlation_id = %ctx.correlation_id, "streaming review start");
        let scm = self.scm.client_for(cr.provider)?;

        let result = tokio::time::timeout(
            self.cfg.pipeline_deadline,
            self.execute(scm, cr, ctx, &sink),
        )
        .await;

        let output = match flatten_deadline(result) {
            Ok(o) => o,
            Err(failure) => {
                if matches!(failure.error, Error::Cancelled) {
                    info!(%cr, "subscriber cancelled; nothing persisted");
                    self.metrics.record_cancelled();
                    return Err(Error::Cancelled);
                }
                if !failure.chunk_emitted {
                    let chunk = ReviewChunk::new(ChunkKind::Error, failure.error.surface_code())
                        .with_error(failure.error.to_string());
                    let _ = sink.send(chunk).await;
                }
                // Terminal failure of a streamed run is still recorded.
                self.persist_failed(cr, failure.raw_response.clone()).await;
                self.metrics.record_failed();
                return Err(failure.error);
            }
        };

        let review_id = self
            .store
            .save(self.to_new_review(
                cr,
                &output.aggregated,
                output.raw_response.clone(),
                ReviewState::Completed,
            ))
            .await?;
        debug!(%review_id, "streamed review persisted");

        if publish_after {
            let mut aggregated = output.aggregated;
            match publish(
                scm,
                cr,
                &output.meta,
                &mut aggregated,
                &output.diff_doc,
                &self.cfg.publish,
            )
            .await
            {
                Ok(report) => {
                    self.record_published_ids(review_id, &report).await;
                    let chunk = ReviewChunk::new(
                        ChunkKind::Published,
                        format!(
                            "Published {} inline comments ({} kept in summary).",
                            report.inline_posted, report.fallbacks
                        ),
                    );
                    let _ = sink.send(chunk).await;
                }
                Err(e) => {
                    // Publishing failure does not fail the review.
                    warn!(error = %e, "publish degraded after streamed review");
                    self.metrics.record_publish_failure();
                    let chunk = ReviewChunk::new(ChunkKind::Error, "SCM_ERROR")
                        .with_error(format!("publish failed: {e}"));
                    let _ = sink.send(chunk).await;
                }
            }
        }

        self.metrics.record_completed();
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "streaming review done");
        Ok(())
    }

    /// Queued worker shape with the full store lifecycle.
    pub async fn run_queued(
        &self,
        cr: &ChangeRequestRef,
        ctx: &RequestContext,
    ) -> PipelineResult<QueuedOutcome> {
        let started = Instant::now();
        info!(%cr, correlation_id = %ctx.correlation_id, "queued review start");
        let scm = self.scm.client_for(cr.provider)?;

        let review_id = self
            .store
            .save(NewReview {
                provider: cr.provider.as_str().to_string(),
                repository_id: cr.repository_id.clone(),
                change_request_number: cr.number as i64,
                state: None,
                llm_provider: Some(self.llm.provider_name().to_string()),
                llm_model: Some(self.llm.model().to_string()),
                raw_response: None,
                summary: None,
                overall_confidence: None,
                issues: Vec::new(),
                notes: Vec::new(),
            })
            .await?;
        self.store
            .update_state(review_id, ReviewState::Processing)
            .await?;

        let sink = ChunkSink::Discard;
        let result = tokio::time::timeout(
            self.cfg.pipeline_deadline,
            self.execute(scm, cr, ctx, &sink),
        )
        .await;

        let output = match flatten_deadline(result) {
            Ok(o) => o,
            Err(failure) => {
                let code = failure.error.surface_code();
                if let Err(e) = self
                    .store
                    .update_result_and_state(
                        review_id,
                        Vec::new(),
                        Vec::new(),
                        Some(format!("Review failed: {code}")),
                        None,
                        failure.raw_response,
                        ReviewState::Failed,
                    )
                    .await
                {
                    warn!(error = %e, "failed-state persistence degraded");
                }
                self.metrics.record_failed();
                return Err(failure.error);
            }
        };

        let (issues, notes) = to_store_findings(&output.aggregated);
        self.store
            .update_result_and_state(
                review_id,
                issues,
                notes,
                Some(output.aggregated.summary.clone()),
                Some(output.aggregated.overall_confidence),
                output.raw_response.clone(),
                ReviewState::Completed,
            )
            .await?;

        // Publish is best-effort for the queued shape.
        let mut aggregated = output.aggregated;
        match publish(
            scm,
            cr,
            &output.meta,
            &mut aggregated,
            &output.diff_doc,
            &self.cfg.publish,
        )
        .await
        {
            Ok(report) => self.record_published_ids(review_id, &report).await,
            Err(e) => {
                warn!(error = %e, "publish degraded after queued review");
                self.metrics.record_publish_failure();
            }
        }

        self.metrics.record_completed();
        info!(
            %review_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "queued review done"
        );
        Ok(QueuedOutcome {
            review_id,
            findings: aggregated,
        })
    }

    /// Publish-only shape: aggregates the supplied findings and posts them,
    /// without invoking the model or touching the review lifecycle.
    pub async fn publish_only(
        &self,
        cr: &ChangeRequestRef,
        findings: ReviewFindings,
    ) -> PipelineResult<PublishReport> {
        let scm = self.scm.client_for(cr.provider)?;
        let meta =
            crate::resilience::retry_once_transient("fetch-meta", || scm.fetch_meta(cr)).await?;
        let diff_text =
            crate::resilience::retry_once_transient("fetch-diff", || scm.fetch_diff_text(cr))
                .await?;
        let diff_doc = match diff::parse(&diff_text) {
            Ok(doc) => doc,
            Err(ParseError::Empty) => DiffDocument::default(),
            Err(e) => return Err(Error::Parse(e)),
        };

        let mut aggregated = aggregate(findings, None, &self.cfg.aggregation);
        publish(
            scm,
            cr,
            &meta,
            &mut aggregated,
            &diff_doc,
            &self.cfg.publish,
        )
        .await
    }

    /// Shared core: fetch → parse → enrich → prompt → analyze → aggregate.
    async fn execute(
        &self,
        scm: &ScmClient,
        cr: &ChangeRequestRef,
        ctx: &RequestContext,
        sink: &ChunkSink,
    ) -> Result<ExecutionOutput, ExecFailure> {
        let t0 = Instant::now();

        debug!("fetch: change request metadata");
        let meta =
            crate::resilience::retry_once_transient("fetch-meta", || scm.fetch_meta(cr)).await?;

        debug!("fetch: raw diff");
        let diff_text =
            crate::resilience::retry_once_transient("fetch-diff", || scm.fetch_diff_text(cr))
                .await?;

        debug!(chars = diff_text.len(), "parse: unified diff");
        let diff_doc = match diff::parse(&diff_text) {
            Ok(doc) => doc,
            // An empty change request is a valid, finding-free review.
            Err(ParseError::Empty) => DiffDocument::default(),
            Err(e) => return Err(Error::Parse(e).into()),
        };

        if diff_doc.is_empty() {
            debug!("empty diff: skipping enrichment and analysis");
            let aggregated = aggregate(ReviewFindings::default(), None, &self.cfg.aggregation);
            let done = ReviewChunk::new(ChunkKind::Done, aggregated.summary.clone());
            if !sink.send(done).await {
                return Err(Error::Cancelled.into());
            }
            return Ok(ExecutionOutput {
                meta,
                diff_doc,
                aggregated,
                raw_response: None,
            });
        }

        let head_sha = meta.diff_refs.head_sha.clone();

        debug!("enrich: context strategies");
        let enriched = self
            .cfg
            .orchestrator
            .enrich(diff_doc, scm, cr, &head_sha)
            .await;

        debug!("enrich: file expansion, policies, ticket");
        let expanded: Vec<ExpandedFile> = crate::resilience::best_effort(
            "expand-files",
            self.cfg.best_effort_deadline,
            || async {
                Ok(expand_files(scm, cr, &head_sha, &enriched.diff, &self.cfg.expand).await)
            },
        )
        .await
        .into_value();

        let policies: Vec<RepoPolicy> = crate::resilience::best_effort(
            "policy-docs",
            self.cfg.best_effort_deadline,
            || async {
                Ok(fetch_policies(scm, cr, &head_sha, self.cfg.policy_char_budget).await)
            },
        )
        .await
        .into_value();

        let ticket: Option<TicketContext> = crate::resilience::best_effort(
            "ticket-context",
            self.cfg.best_effort_deadline,
            || async { Ok(fetch_ticket_context(&meta, &self.cfg.ticket).await) },
        )
        .await
        .into_value();

        debug!("prompt: assembly");
        let prompt = assemble(
            &PromptInput {
                diff_text: &diff_text,
                matches: &enriched.matches,
                ticket: ticket.as_ref(),
                expanded: &expanded,
                policies: &policies,
            },
            &self.cfg.prompt,
        );

        self.audit_context_session(cr, ctx, &enriched, &prompt).await;

        debug!(prompt_chars = prompt.total_chars, "analyze: streaming model");
        let outcome = analyze(&self.llm, &prompt, &self.cfg.analyze, sink)
            .await
            .map_err(|f| ExecFailure {
                error: f.error,
                raw_response: f.raw_response,
                chunk_emitted: true,
            })?;

        debug!("aggregate: post-processing findings");
        let aggregated = aggregate(outcome.findings, None, &self.cfg.aggregation);

        debug!(
            issues = aggregated.issues.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "execution core done"
        );
        Ok(ExecutionOutput {
            meta,
            diff_doc: enriched.diff,
            aggregated,
            raw_response: Some(outcome.raw_response),
        })
    }

    /// Writes the context-retrieval audit records, best-effort.
    async fn audit_context_session(
        &self,
        cr: &ChangeRequestRef,
        ctx: &RequestContext,
        enriched: &EnrichedDiff,
        prompt: &PromptResult,
    ) {
        let strategies = enriched
            .per_strategy
            .iter()
            .map(|(name, report)| StrategyExecutionRecord {
                strategy: name.clone(),
                status: report.status.as_str().to_string(),
                duration_ms: report.duration_ms as i64,
                match_count: report.reason_histogram.values().sum::<u32>() as i32,
                detail: report.detail.clone(),
            })
            .collect();

        let session = ContextSessionRecord {
            provider: cr.provider.as_str().to_string(),
            repository_id: cr.repository_id.clone(),
            change_request_number: cr.number as i64,
            correlation_id: ctx.correlation_id.to_string(),
            match_count: enriched.matches.len() as i32,
            prompt_chars: Some(prompt.total_chars as i32),
            created_at: Utc::now(),
            strategies,
        };
        self.store
            .record_context_session_best_effort(&session)
            .await;
    }

    /// Persists a FAILED review for the streaming shape, best-effort.
    async fn persist_failed(&self, cr: &ChangeRequestRef, raw_response: Option<String>) {
        let empty = AggregatedFindings::default();
        let mut review = self.to_new_review(cr, &empty, raw_response, ReviewState::Failed);
        review.summary = None;
        if let Err(e) = self.store.save(review).await {
            warn!(error = %e, "failed-state persistence degraded");
        }
    }

    fn to_new_review(
        &self,
        cr: &ChangeRequestRef,
        aggregated: &AggregatedFindings,
        raw_response: Option<String>,
        state: ReviewState,
    ) -> NewReview {
        let (issues, notes) = to_store_findings(aggregated);
        NewReview {
            provider: cr.provider.as_str().to_string(),
            repository_id: cr.repository_id.clone(),
            change_request_number: cr.number as i64,
            state: Some(state),
            llm_provider: Some(self.llm.provider_name().to_string()),
            llm_model: Some(self.llm.model().to_string()),
            raw_response,
            summary: Some(aggregated.summary.clone()),
            overall_confidence: Some(aggregated.overall_confidence),
            issues,
            notes,
        }
    }

    /// Syncs SCM comment ids from a publish report into the stored issues.
    async fn record_published_ids(&self, review_id: Uuid, report: &PublishReport) {
        if report.inline_posted == 0 {
            return;
        }
        let stored = match self.store.find_by_id(review_id).await {
            Ok(Some(aggregate)) => aggregate,
            _ => return,
        };
        for outcome in report.outcomes.iter().filter(|o| o.posted) {
            let Some(comment_id) = outcome.scm_comment_id.as_deref() else {
                continue;
            };
            let matching = stored.issues.iter().find(|row| {
                row.file == outcome.file
                    && row.start_line == outcome.start_line as i32
                    && row.scm_comment_id.is_none()
            });
            if let Some(row) = matching {
                if let Err(e) = self.store.mark_issue_published(row.id, comment_id).await {
                    warn!(error = %e, "publication-state sync degraded");
                }
            }
        }
    }
}

/// Converts aggregated findings into store rows.
pub fn to_store_findings(aggregated: &AggregatedFindings) -> (Vec<NewIssue>, Vec<NewNote>) {
    let issues = aggregated
        .issues
        .iter()
        .map(|i| NewIssue {
            file: i.file.clone(),
            start_line: i.start_line as i32,
            severity: i.severity.clone(),
            title: i.title.clone(),
            suggestion: i.suggestion.clone(),
            confidence_score: i.confidence_score,
            inline_comment_posted: i.inline_comment_posted,
            scm_comment_id: i.scm_comment_id.clone(),
            fallback_reason: i.fallback_reason.clone(),
            position_metadata: i.position_metadata.clone(),
        })
        .collect();
    let notes = aggregated
        .notes
        .iter()
        .map(|n| NewNote {
            file: n.file.clone(),
            line: n.line as i32,
            note: n.note.clone(),
        })
        .collect();
    (issues, notes)
}

fn flatten_deadline(
    result: Result<Result<ExecutionOutput, ExecFailure>, tokio::time::error::Elapsed>,
) -> Result<ExecutionOutput, ExecFailure> {
    match result {
        Ok(inner) => inner,
        Err(_) => Err(Error::PipelineTimeout.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChunkSink;
    use crate::scm::stub::StubScm;
    use crate::scm::ProviderKind;
    use llm_service::services::stub_service::StubService;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const DIFF: &str = "\
--- a/UserDAO.java
+++ b/UserDAO.java
@@ -10,2 +10,3 @@
     public User find(String id) {
+        String q = concat(id);
     }
";

    const VALID_JSON: &str = r#"{"summary":"found it","issues":[{"file":"UserDAO.java","start_line":11,"severity":"critical","title":"SQL injection","confidence_score":0.9}],"notes":[]}"#;

    fn detached_store() -> ReviewStore {
        // Lazy pool: URL parses, no connection is made. Any write would
        // error, which the assertions below rely on.
        ReviewStore::connect_lazy("postgres://localhost:1/unreachable", 1)
            .expect("lazy pool from static url")
    }

    fn pipeline_with(scm: StubScm, responses: &[&str]) -> ReviewPipeline {
        let llm = Arc::new(llm_service::LlmStreamClient::Stub(
            StubService::with_responses(responses.iter().map(|s| s.to_string())),
        ));
        ReviewPipeline::new(
            ScmRouter::stub(scm),
            llm,
            detached_store(),
            PipelineConfig::default(),
        )
    }

    fn cr() -> ChangeRequestRef {
        ChangeRequestRef::new(ProviderKind::GitHub, "acme/app", 5).unwrap()
    }

    #[tokio::test]
    async fn cancelled_subscriber_aborts_before_any_persistence() {
        let scm = StubScm::new().with_diff(DIFF);
        let pipeline = pipeline_with(scm.clone(), &[VALID_JSON]);

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let err = pipeline
            .run_streaming(&cr(), &RequestContext::generated(), ChunkSink::Subscriber(tx), true)
            .await
            .unwrap_err();
        // Cancellation short-circuits before the store save; a store write
        // attempt against the detached pool would surface as a Store error
        // instead.
        assert!(matches!(err, Error::Cancelled));
        assert!(scm.posted_comments().is_empty());
    }

    #[tokio::test]
    async fn diff_fetch_failure_emits_error_chunk_and_fails() {
        let scm = StubScm::new().failing_diff_fetch();
        let pipeline = pipeline_with(scm, &[VALID_JSON]);

        let (tx, mut rx) = mpsc::channel(16);
        let err = pipeline
            .run_streaming(&cr(), &RequestContext::generated(), ChunkSink::Subscriber(tx), false)
            .await
            .unwrap_err();
        assert_eq!(err.surface_code(), "SCM_ERROR");

        let mut kinds = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            kinds.push(chunk.kind);
        }
        assert_eq!(kinds.last(), Some(&ChunkKind::Error));
    }

    #[test]
    fn store_mapping_preserves_publication_fields() {
        let mut aggregated = AggregatedFindings::default();
        aggregated.issues.push(crate::findings::Issue {
            file: "a.rs".into(),
            start_line: 3,
            severity: "major".into(),
            title: "t".into(),
            suggestion: None,
            confidence_score: Some(0.8),
            inline_comment_posted: true,
            scm_comment_id: Some("c-1".into()),
            fallback_reason: None,
            position_metadata: Some("{\"position\":4}".into()),
            source: crate::findings::FindingSource::Ai,
        });
        let (issues, notes) = to_store_findings(&aggregated);
        assert_eq!(issues.len(), 1);
        assert!(notes.is_empty());
        assert!(issues[0].inline_comment_posted);
        assert_eq!(issues[0].scm_comment_id.as_deref(), Some("c-1"));
        assert_eq!(issues[0].start_line, 3);
    }
}
