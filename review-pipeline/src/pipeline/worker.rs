//! Queue worker loop: exclusive claim, idempotency short-circuit, bounded
//! retry, acknowledgment.
//!
//! Per delivery:
//! 1. claim via the consumer group (stale reclaim first),
//! 2. a terminal idempotency record ⇒ ack and skip,
//! 3. mark PROCESSING,
//! 4. run the pipeline under its per-request deadline,
//! 5. write COMPLETED (serialized findings) or FAILED (sanitized error),
//! 6. ack. Transient failures on a first delivery stay unacked so the
//!    visibility timeout redelivers once; a reclaimed delivery that fails is
//!    terminal either way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use review_queue::stream::Delivery;
use review_queue::{IdempotencyStore, RequestQueue};
use tracing::{debug, info, warn};

use crate::observability::{CorrelationId, RequestContext};
use crate::pipeline::ReviewPipeline;
use crate::scm::{ChangeRequestRef, ProviderKind};

/// Spawns `count` worker loops sharing the consumer group.
pub fn spawn_workers(
    count: usize,
    pipeline: Arc<ReviewPipeline>,
    queue: RequestQueue,
    idempotency: IdempotencyStore,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|i| {
            let pipeline = pipeline.clone();
            let queue = queue.clone();
            let idempotency = idempotency.clone();
            let consumer = format!("worker-{i}");
            tokio::spawn(async move {
                run_worker_loop(pipeline, queue, idempotency, consumer).await;
            })
        })
        .collect()
}

/// One worker's endless claim/process/ack loop.
pub async fn run_worker_loop(
    pipeline: Arc<ReviewPipeline>,
    queue: RequestQueue,
    idempotency: IdempotencyStore,
    consumer: String,
) {
    info!(consumer, "worker loop started");
    loop {
        // Rescue deliveries stranded by crashed peers before blocking on new
        // work.
        let stale = match queue.claim_stale(&consumer).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(consumer, error = %e, "stale claim failed; backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                Vec::new()
            }
        };
        for delivery in stale {
            handle_delivery(&pipeline, &queue, &idempotency, &consumer, delivery).await;
        }

        let batch = match queue.read_batch(&consumer).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(consumer, error = %e, "queue read failed; backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        for delivery in batch {
            handle_delivery(&pipeline, &queue, &idempotency, &consumer, delivery).await;
        }
    }
}

async fn handle_delivery(
    pipeline: &ReviewPipeline,
    queue: &RequestQueue,
    idempotency: &IdempotencyStore,
    consumer: &str,
    delivery: Delivery,
) {
    let request = delivery.request.clone();
    let request_id = request.request_id;
    debug!(consumer, %request_id, reclaimed = delivery.reclaimed, "delivery claimed");

    // Short-circuit: a prior run already finished this request.
    match idempotency.get(request_id).await {
        Ok(Some(record)) if record.status.is_terminal() => {
            debug!(%request_id, status = record.status.as_str(), "terminal record exists; ack only");
            ack_or_warn(queue, &delivery).await;
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(%request_id, error = %e, "idempotency lookup failed; proceeding");
        }
    }

    if let Err(e) = idempotency.mark_processing(request_id).await {
        warn!(%request_id, error = %e, "processing mark failed");
    }

    let Some(provider) = ProviderKind::parse(&request.provider) else {
        let _ = idempotency
            .write_failed(request_id, "unknown provider", 0)
            .await;
        ack_or_warn(queue, &delivery).await;
        return;
    };
    let cr = match ChangeRequestRef::new(provider, &request.repository_id, request.change_request_number)
    {
        Ok(cr) => cr,
        Err(e) => {
            let _ = idempotency
                .write_failed(request_id, &e.to_string(), 0)
                .await;
            ack_or_warn(queue, &delivery).await;
            return;
        }
    };

    let ctx = RequestContext::new(CorrelationId::from_header(Some(&request.correlation_id)));
    let started = Instant::now();

    match pipeline.run_queued(&cr, &ctx).await {
        Ok(outcome) => {
            let elapsed = started.elapsed().as_millis() as u64;
            match serde_json::to_string(&outcome.findings) {
                Ok(json) => {
                    if let Err(e) = idempotency.write_completed(request_id, &json, elapsed).await {
                        warn!(%request_id, error = %e, "completed record write failed");
                    }
                }
                Err(e) => {
                    warn!(%request_id, error = %e, "findings serialization failed");
                    let _ = idempotency
                        .write_failed(request_id, "result serialization failed", elapsed)
                        .await;
                }
            }
            ack_or_warn(queue, &delivery).await;
            info!(%request_id, elapsed_ms = elapsed, "request completed");
        }
        Err(error) => {
            let elapsed = started.elapsed().as_millis() as u64;
            // One redelivery for transient failures on a fresh delivery; a
            // reclaimed delivery fails terminally.
            if error.is_transient() && !delivery.reclaimed {
                warn!(
                    %request_id,
                    code = error.surface_code(),
                    "transient failure; leaving for redelivery"
                );
                return;
            }
            let message = format!("{}: {}", error.surface_code(), error);
            if let Err(e) = idempotency.write_failed(request_id, &message, elapsed).await {
                warn!(%request_id, error = %e, "failed record write failed");
            }
            ack_or_warn(queue, &delivery).await;
            info!(%request_id, code = error.surface_code(), "request failed");
        }
    }
}

async fn ack_or_warn(queue: &RequestQueue, delivery: &Delivery) {
    if let Err(e) = queue.ack(&delivery.entry_id).await {
        warn!(entry_id = %delivery.entry_id, error = %e, "ack failed");
    }
}
