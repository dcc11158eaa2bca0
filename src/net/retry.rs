use crate::config::LinkCheckConfig;
use crate::net::NetworkFailure;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LinkCheckConfig::default())
    }
}

/// Final result of a retried operation
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, NetworkFailure>,
    pub attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn from_config(config: &LinkCheckConfig) -> Self {
        Self {
            retries: config.retries,
            base_backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// A policy that never retries
    #[must_use]
    pub const fn none() -> Self {
        Self {
            retries: 0,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based)
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NetworkFailure>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    }
                }
                Err(failure) if failure.is_transient() && attempts <= self.retries => {
                    let delay = self.delay_for_retry(attempts);
                    tracing::debug!(
                        "Attempt {attempts} failed ({failure}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => {
                    return Attempted {
                        result: Err(failure),
                        attempts,
                    }
                }
            }
        }
    }
}
