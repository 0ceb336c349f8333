// Resilient execution of fallible network operations
pub mod state;

pub use state::{InMemoryStateStore, JsonFileStateStore, OperationStep, RetryState, StateStore};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::metrics::{MetricsSink, NullSink};

/// Backoff and classification parameters for one class of operation.
///
/// Delay for attempt n is `min(max_delay, base * factor^n) * (1 ± jitter)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total invocations = max_retries + 1
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Fraction of the delay randomized in both directions, [0, 1)
    pub jitter_fraction: f64,
    /// Per-attempt timeout; exceeding it counts as a retryable timeout
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_fraction: 0.1,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backoff_factor < 1.0 {
            anyhow::bail!("backoff_factor must be >= 1.0");
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            anyhow::bail!("jitter_fraction must be in [0, 1)");
        }
        if self.max_delay_ms < self.base_delay_ms {
            anyhow::bail!("max_delay_ms must be >= base_delay_ms");
        }
        if self.attempt_timeout_ms == 0 {
            anyhow::bail!("attempt_timeout_ms must be non-zero");
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = exp.min(self.max_delay_ms as f64);

        let jittered = if self.jitter_fraction > 0.0 {
            let jitter = rand::thread_rng()
                .gen_range(-self.jitter_fraction..=self.jitter_fraction);
            capped * (1.0 + jitter)
        } else {
            capped
        };

        Duration::from_millis(jittered.max(0.0) as u64)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Wraps fallible async operations with timeout, classification and backoff.
///
/// Retryable errors are absorbed here up to `max_retries`; fatal errors
/// propagate immediately. After exhaustion the last error surfaces wrapped
/// with the attempt count.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: Arc::new(NullSink),
        }
    }

    pub fn with_metrics(policy: RetryPolicy, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { policy, metrics }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails fatally, or retries are exhausted.
    ///
    /// The closure builds a fresh future per attempt. Each attempt runs under
    /// the policy's per-attempt timeout; timing out is a retryable error.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let timeout = self.policy.attempt_timeout();
            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(timeout)),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(operation, attempts = attempt + 1, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    self.metrics.retry_attempted(operation, attempt + 1, delay);
                    tracing::warn!(operation, attempt = attempt + 1, ?delay, %err, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    tracing::error!(operation, attempts = attempt + 1, %err, "retries exhausted");
                    return Err(EngineError::RetriesExhausted {
                        attempts: attempt + 1,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    // Fatal: propagate without retrying
                    return Err(err);
                }
            }
        }
    }

    /// Run a multi-step operation, persisting progress after each completed
    /// step so a restart resumes from the last completed step.
    ///
    /// At-least-once per step, not exactly-once: a crash between completing a
    /// step and saving its progress replays the step, so steps must be
    /// idempotent.
    pub async fn execute_with_state(
        &self,
        operation_id: &str,
        steps: &[OperationStep],
        store: &dyn StateStore,
    ) -> Result<(), EngineError> {
        let mut state = store
            .load(operation_id)
            .unwrap_or_else(|| RetryState::new(operation_id));

        if state.completed_steps > 0 {
            tracing::info!(
                operation_id,
                completed = state.completed_steps,
                total = steps.len(),
                "resuming multi-step operation"
            );
            if state.next_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(state.next_delay_ms)).await;
            }
        }

        for (i, step) in steps.iter().enumerate().skip(state.completed_steps) {
            // attempt_count tracks invocations, not steps, so retries
            // absorbed inside execute() are visible in the saved state
            let mut step_attempts: u32 = 0;
            let result = self
                .execute(step.name(), || {
                    step_attempts += 1;
                    step.run()
                })
                .await;
            state.attempt_count += step_attempts;

            match result {
                Ok(()) => {
                    state.completed_steps = i + 1;
                    state.next_delay_ms = 0;
                    state.last_error_kind = None;
                    store.save(&state);
                }
                Err(err) => {
                    state.next_delay_ms = self.policy.delay_for(0).as_millis() as u64;
                    state.last_error_kind = Some(err.kind());
                    store.save(&state);
                    return Err(err);
                }
            }
        }

        store.clear(operation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
            jitter_fraction: 0.0,
            attempt_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, EngineError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_is_exactly_n_plus_one() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Connection("reset".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result.unwrap_err() {
            EngineError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, EngineError::Connection(_)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Auth("bad key".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), EngineError::Auth(_)));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(EngineError::RateLimited("429".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_is_monotonic_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            backoff_factor: 2.0,
            jitter_fraction: 0.0,
            attempt_timeout_ms: 1_000,
        };

        let mut previous = Duration::ZERO;
        for attempt in 0..10 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "delay regressed at attempt {attempt}");
            assert!(delay <= Duration::from_millis(2_000));
            previous = delay;
        }
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(9), Duration::from_millis(2_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            jitter_fraction: 0.2,
            attempt_timeout_ms: 1_000,
        };

        for _ in 0..100 {
            let delay = policy.delay_for(0).as_millis() as f64;
            assert!((800.0..=1_200.0).contains(&delay), "delay was {delay}");
        }
    }
}
