/// Bounded retry with exponential backoff, gated by the shared rate limiter
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::types::Period;
use crate::utils::RateLimiter;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

/// Upper bound on a single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

impl RetryPolicy {
    /// Sleep between attempt `attempt` and `attempt + 1` (0-based), capped at
    /// `MAX_BACKOFF`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs.max(0.0))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, limiter: Arc<RateLimiter>) -> Self {
        RetryExecutor { policy, limiter }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` for `period`. Every attempt first takes a token from the
    /// limiter, so retries spend global rate budget too. Returns
    /// `FetchFailed` with the last cause once attempts are exhausted, or the
    /// error itself when it is not retryable.
    pub async fn execute<T, F, Fut>(&self, label: &str, period: Period, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_retries.max(1);
        let mut attempt = 0;

        loop {
            self.limiter.acquire().await;
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} {} succeeded on attempt {}", label, period, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!("{} {} failed with non-retryable error: {}", label, period, e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    return Err(SyncError::FetchFailed {
                        period,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_after(attempt - 1);
                    warn!(
                        "⚠️  {} {} attempt {}/{} failed ({}): {} - retrying in {:?}",
                        label,
                        period,
                        attempt,
                        max_attempts,
                        e.error_code(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn period() -> Period {
        Period::new(2025, 8).unwrap()
    }

    fn executor(max_retries: u32, limiter: Arc<RateLimiter>) -> RetryExecutor {
        RetryExecutor::new(
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(5),
                backoff_factor: 2.0,
            },
            limiter,
        )
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
            backoff_factor: 1.5,
        };
        assert_eq!(policy.delay_after(0), Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Duration::from_millis(150));
        assert_eq!(policy.delay_after(2), Duration::from_millis(225));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 200,
            base_delay: Duration::from_secs(2),
            backoff_factor: 1.5,
        };
        assert_eq!(policy.delay_after(150), MAX_BACKOFF);
        assert_eq!(policy.delay_after(u32::MAX), MAX_BACKOFF);
        assert!(policy.delay_after(3) < MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_exhaustion_makes_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let exec = executor(3, Arc::new(RateLimiter::new(100, 0.0)));

        let result: Result<()> = exec
            .execute("2330", period(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Transport("connection reset".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(SyncError::FetchFailed { period: p, attempts, source }) => {
                assert_eq!(p, period());
                assert_eq!(attempts, 3);
                assert!(matches!(*source, SyncError::Transport(_)));
            }
            other => panic!("expected FetchFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let exec = executor(3, Arc::new(RateLimiter::new(100, 0.0)));

        let result = exec
            .execute("2330", period(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SyncError::MalformedResponse("truncated json".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let exec = executor(5, Arc::new(RateLimiter::new(100, 0.0)));

        let result: Result<()> = exec
            .execute("9999", period(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Rejected("unknown code".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(SyncError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_every_attempt_consumes_a_token() {
        let limiter = Arc::new(RateLimiter::new(10, 0.0));
        let exec = executor(4, Arc::clone(&limiter));

        let _: Result<()> = exec
            .execute("2330", period(), || async {
                Err(SyncError::Timeout("10s".into()))
            })
            .await;

        let left = limiter.available().await;
        assert!((left - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_backoff_sleeps_between_attempts() {
        let exec = RetryExecutor::new(
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(20),
                backoff_factor: 2.0,
            },
            Arc::new(RateLimiter::new(100, 0.0)),
        );

        let start = Instant::now();
        let _: Result<()> = exec
            .execute("2330", period(), || async {
                Err(SyncError::Transport("down".into()))
            })
            .await;

        // 20ms + 40ms between the three attempts
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
