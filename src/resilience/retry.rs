use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::outcome::{Outcome, StepExecutionResult};

/// Bounded retry for environment failures.
///
/// Only [`Outcome::EnvironmentFailure`] is retried; every other outcome is
/// returned as soon as it is seen. Backoff is linear: the `n`th retry waits
/// `n * base_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

/// A step result together with how many times the step was invoked.
#[derive(Debug, Clone)]
pub struct Retried {
    pub result: StepExecutionResult,
    pub attempts: u32,
}

impl Retried {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.base_delay())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `step_fn` until it stops reporting an environment failure or the
    /// retry budget is spent. The closure receives the 1-based attempt number.
    pub async fn retry<F, Fut>(&self, name: &str, mut step_fn: F) -> Retried
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StepExecutionResult>,
    {
        let mut attempt = 1;
        loop {
            let result = step_fn(attempt).await;

            if result.outcome != Outcome::EnvironmentFailure {
                return Retried { result, attempts: attempt };
            }

            if attempt > self.max_retries {
                tracing::warn!(
                    step = name,
                    attempts = attempt,
                    error = result.error.as_deref().unwrap_or(""),
                    "Environment failure persisted after retries"
                );
                return Retried { result, attempts: attempt };
            }

            let delay = self.base_delay * attempt;
            tracing::info!(
                step = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = result.error.as_deref().unwrap_or(""),
                "Environment failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn env_failure(step: &str) -> StepExecutionResult {
        StepExecutionResult::failure(step, Outcome::EnvironmentFailure, "Address already in use")
    }

    #[tokio::test]
    async fn test_persistent_environment_failure_runs_max_plus_one() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let retried = policy
            .retry("run_tests", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { env_failure("run_tests") }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retried.attempts, 3);
        assert_eq!(retried.retries(), 2);
        assert_eq!(retried.result.outcome, Outcome::EnvironmentFailure);
    }

    #[tokio::test]
    async fn test_other_outcomes_are_not_retried() {
        for outcome in [Outcome::Success, Outcome::CognitiveFailure, Outcome::HardFailure] {
            let calls = AtomicU32::new(0);
            let policy = RetryPolicy::new(5, Duration::ZERO);
            let retried = policy
                .retry("step", |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if outcome == Outcome::Success {
                            StepExecutionResult::success("step")
                        } else {
                            StepExecutionResult::failure("step", outcome, "boom")
                        }
                    }
                })
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), 1, "{outcome}");
            assert_eq!(retried.result.outcome, outcome);
        }
    }

    #[tokio::test]
    async fn test_recovers_when_environment_clears() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let retried = policy
            .retry("install", |attempt| async move {
                if attempt < 2 {
                    env_failure("install")
                } else {
                    StepExecutionResult::success("install")
                }
            })
            .await;
        assert!(retried.result.is_success());
        assert_eq!(retried.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear() {
        let policy = RetryPolicy::new(2, Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        let retried = policy.retry("step", |_| async { env_failure("step") }).await;
        // 5s before the second attempt, 10s before the third.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(15), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(16), "{elapsed:?}");
        assert_eq!(retried.attempts, 3);
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::ZERO);
        policy
            .retry("step", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { env_failure("step") }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
