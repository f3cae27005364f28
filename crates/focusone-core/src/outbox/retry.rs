//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{BackendError, ReportingFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Disable retries entirely.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based): base * 2^retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(retry))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of retries.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    kind: &'static str,
    mut op: F,
) -> Result<T, ReportingFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(kind, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                let retries_used = attempt - 1;
                if !err.is_retryable() || retries_used >= policy.max_retries {
                    return Err(ReportingFailure {
                        kind,
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                let delay = policy.delay_for(retries_used);
                debug!(kind, attempt, ?delay, error = %err, "retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
