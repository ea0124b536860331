//! Bounded retry for LLM calls, distinguishing rate-limit backoff (a fixed,
//! longer wait, since resets are time-based) from generic transient-error
//! backoff (exponential).

use std::time::Duration;

use crate::provider::LlmError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt numbered `attempt` (0-indexed), given the
    /// error from the previous attempt.
    pub fn delay_for(&self, attempt: u32, error: &LlmError) -> Duration {
        match error {
            LlmError::RateLimited => self.rate_limit_delay,
            _ => self.base_delay * 2u32.saturating_pow(attempt),
        }
    }

    /// Runs `call` up to `max_attempts` times, retrying only on
    /// `LlmError::is_retryable()` errors, sleeping per `delay_for` between
    /// attempts. Returns the last error once attempts are exhausted.
    pub async fn run<F, Fut, T>(&self, mut call: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt, &err);
                    tracing::warn!(attempt, %err, ?delay, "retrying llm call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_up_to_limit() {
        let policy = RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1), rate_limit_delay: Duration::from_millis(1) };
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(LlmError::Transient("boom".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_retrying_on_success() {
        let policy = RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1), rate_limit_delay: Duration::from_millis(1) };
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 1 { Err(LlmError::Transient("boom".to_string())) } else { Ok(42) } }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::AuthError) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
