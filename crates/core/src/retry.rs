use crate::error::{PipelineError, Stage, StageError};
use crate::models::PipelineConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_budget: u32,
    pub per_call_timeout: Duration,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(value: &PipelineConfig) -> Self {
        Self {
            retry_budget: value.retry_budget,
            per_call_timeout: value.per_call_timeout,
            initial_backoff: value.initial_backoff,
            backoff_multiplier: value.backoff_multiplier,
            max_backoff: value.max_backoff,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based). No jitter, so a
    /// re-run waits exactly as long as the first run did.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base.min(self.max_backoff.as_secs_f64()))
    }
}

/// Runs one bounded external call: timeout on each attempt, cancellation
/// checked while waiting, at most `retry_budget` re-issues of the same request.
pub async fn call_with_policy<F, Fut, T>(
    stage: Stage,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, PipelineError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { stage }),
            outcome = tokio::time::timeout(policy.per_call_timeout, operation()) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(StageError::Cancelled)) => return Err(PipelineError::Cancelled { stage }),
            Ok(Err(error)) => error,
            Err(_) => StageError::UpstreamTimeout {
                service: stage.to_string(),
                after: policy.per_call_timeout,
            },
        };

        if !error.is_retryable() || attempt >= policy.retry_budget {
            return Err(PipelineError::Stage {
                stage,
                attempts: attempt + 1,
                source: error,
            });
        }

        let delay = policy.backoff(attempt);
        warn!(
            stage = %stage,
            attempt = attempt + 1,
            budget = policy.retry_budget,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "retrying stage call"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { stage }),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
        debug!(stage = %stage, attempt = attempt + 1, "re-issuing request");
    }
}
