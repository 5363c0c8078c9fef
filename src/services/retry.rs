//! Retry with exponential backoff around a single fallible async operation.
//!
//! The wrapper knows nothing about HTTP: the caller supplies the operation,
//! the policy (retry budget + backoff curve) and the predicate deciding which
//! errors are worth another attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means a single attempt.
    pub max_retries: u32,
    /// Unit of the backoff curve. The n-th retry waits `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (1-based): 2s, 4s, 8s... with a 1s base.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `operation`, retrying while `should_retry` accepts the error and the
/// policy still has budget. The last error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(
                        "Operation '{}' succeeded after {} retries",
                        operation_name,
                        retries
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }
                if retries >= policy.max_retries {
                    tracing::warn!(
                        "Operation '{}' failed after {} retries: {}",
                        operation_name,
                        retries,
                        err
                    );
                    return Err(err);
                }

                retries += 1;
                let delay = policy.backoff(retries);
                tracing::warn!(
                    "Operation '{}' failed: {}. Retrying in {:?} (attempt {}/{})",
                    operation_name,
                    err,
                    delay,
                    retries,
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
