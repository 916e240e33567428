//! Bounded exponential backoff for LLM calls

use super::LlmError;
use std::future::Future;
use std::time::Duration;

/// Retry schedule for transient LLM failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): initial × 2^(retry-1), capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }

    /// Run `operation`, retrying retryable errors per this policy
    ///
    /// A provider `Retry-After` hint stretches the wait, still bounded by
    /// `max_backoff`.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut retry = 0u32;

        loop {
            match operation().await {
                Ok(value) => {
                    if retry > 0 {
                        tracing::debug!(operation = operation_name, retry, "LLM call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && retry < self.max_retries => {
                    retry += 1;
                    let mut delay = self.delay_for(retry);
                    if let LlmError::RateLimited { retry_after_secs: Some(secs) } = &err {
                        delay = delay.max(Duration::from_secs(*secs)).min(self.max_backoff);
                    }
                    tracing::warn!(
                        operation = operation_name,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "LLM call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    tracing::error!(
                        operation = operation_name,
                        attempts = retry + 1,
                        error = %err,
                        "LLM call failed, retries exhausted"
                    );
                    return Err(LlmError::RetriesExhausted {
                        attempts: retry + 1,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}
