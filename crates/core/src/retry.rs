// crates/core/src/retry.rs
//! Exponential-backoff retry for idempotent requests.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::ApiError;

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based):
    /// `min(base * 2^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op`, retrying errors for which [`ApiError::is_retryable`] holds.
///
/// `op` runs at most `policy.max_attempts` times in total, first call
/// included. Any other error is returned immediately.
pub async fn retry_request<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(retries = attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            message: format!("status {status}"),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_twice_then_success_retries_twice() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let result = retry_request(&RetryPolicy::default(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(http(503))
                } else {
                    Ok("devices")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "devices");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_400_fails_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = retry_request(&RetryPolicy::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(http(400)) }
        })
        .await;

        assert!(matches!(result, Err(ApiError::Http { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = retry_request(&RetryPolicy::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Network("connection refused".into())) }
        })
        .await;

        assert!(matches!(result, Err(ApiError::Network(_))));
        // first call plus two retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
