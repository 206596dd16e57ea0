//! Retry/timeout/partial-failure policies shared by the pipeline stages.
//!
//! Two tiers:
//! - **critical** calls get `with_deadline` and `retry_once_transient`;
//!   failures propagate to the driver for classification,
//! - **best-effort** calls degrade to a recorded empty result and never
//!   propagate (`BestEffort::Degraded` carries the cause for the audit trail).

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::{Error, PipelineResult};

/// Outcome of a best-effort stage.
#[derive(Debug, Clone)]
pub enum BestEffort<T> {
    Ok(T),
    /// The stage failed or timed out; the pipeline continues with a default.
    Degraded { cause: String },
}

impl<T: Default> BestEffort<T> {
    /// The value, or the default on degradation.
    pub fn into_value(self) -> T {
        match self {
            Self::Ok(v) => v,
            Self::Degraded { .. } => T::default(),
        }
    }
}

impl<T> BestEffort<T> {
    pub fn degraded_cause(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Degraded { cause } => Some(cause),
        }
    }
}

/// Bounds a future by `deadline`, mapping an overrun to `on_timeout`.
pub async fn with_deadline<T, F>(deadline: Duration, on_timeout: Error, fut: F) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout),
    }
}

/// Runs `make` and retries exactly once when the failure is transient.
pub async fn retry_once_transient<T, F, Fut>(stage: &str, mut make: F) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    match make().await {
        Ok(v) => Ok(v),
        Err(e) if e.is_transient() => {
            warn!(stage, error = %e, "transient failure, retrying once");
            make().await
        }
        Err(e) => Err(e),
    }
}

/// Best-effort wrapper: one retry on transient failure, then degrade.
pub async fn best_effort<T, F, Fut>(stage: &str, deadline: Duration, mut make: F) -> BestEffort<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let attempt = retry_once_transient(stage, &mut make);
    match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(v)) => BestEffort::Ok(v),
        Ok(Err(e)) => {
            warn!(stage, error = %e, "best-effort stage degraded");
            BestEffort::Degraded {
                cause: e.to_string(),
            }
        }
        Err(_) => {
            warn!(stage, "best-effort stage timed out");
            BestEffort::Degraded {
                cause: format!("timeout after {}ms", deadline.as_millis()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScmError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_once_on_transient() {
        let calls = AtomicUsize::new(0);
        let result: PipelineResult<u32> = retry_once_transient("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::Scm(ScmError::Server(503)))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_failures() {
        let calls = AtomicUsize::new(0);
        let result: PipelineResult<u32> = retry_once_transient("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Scm(ScmError::Unauthorized)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn best_effort_degrades_instead_of_failing() {
        let out: BestEffort<Vec<u32>> = best_effort("test", Duration::from_secs(1), || async {
            Err(Error::Validation("boom".into()))
        })
        .await;
        assert!(out.degraded_cause().is_some());
        assert!(out.into_value().is_empty());
    }

    #[tokio::test]
    async fn deadline_maps_to_given_error() {
        let result: PipelineResult<()> =
            with_deadline(Duration::from_millis(5), Error::PipelineTimeout, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::PipelineTimeout)));
    }
}
