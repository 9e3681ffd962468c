//! Rate-limited request admission with bounded retry on "too many requests".

pub mod bucket;

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::call::bounded;
use crate::config::RateLimitConfig;
use crate::error::{SessionError, SessionResult};

pub use bucket::{AcquireError, RateLease, TokenBucket};

pub struct RateLimitedThrottler {
    bucket: TokenBucket,
    max_retries: u32,
    retry_step: Duration,
    queue_full_backoff: Duration,
}

impl RateLimitedThrottler {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config),
            max_retries: config.max_retries,
            retry_step: config.retry_step,
            queue_full_backoff: config.queue_full_backoff,
        }
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// Run `action` under a lease of `weight` tokens.
    ///
    /// A rate-limit reply releases the lease and retries after
    /// `retry_step * n` for the n-th retry, up to `max_retries` times.
    /// Every other outcome is returned as is.
    pub async fn execute<T, F, Fut>(
        &self,
        weight: u32,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        mut action: F,
    ) -> SessionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SessionResult<T>>,
    {
        let mut retries = 0u32;
        loop {
            let lease = self.acquire(weight, deadline, cancel).await?;
            let outcome = bounded(deadline, cancel, action()).await.and_then(|r| r);
            drop(lease);

            match outcome {
                Err(err) if err.is_rate_limited() => {
                    if retries >= self.max_retries {
                        tracing::warn!("Rate limited; giving up after {} retries", retries);
                        return Err(SessionError::RateLimited { retries });
                    }
                    if deadline.is_some_and(|at| Instant::now() >= at) {
                        return Err(SessionError::Timeout);
                    }
                    retries += 1;
                    let delay = self.retry_step * retries;
                    tracing::debug!(
                        "Rate limited; retry {}/{} in {}ms",
                        retries,
                        self.max_retries,
                        delay.as_millis()
                    );
                    bounded(deadline, cancel, tokio::time::sleep(delay)).await?;
                }
                other => return other,
            }
        }
    }

    async fn acquire(
        &self,
        weight: u32,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> SessionResult<RateLease> {
        loop {
            match bounded(deadline, cancel, self.bucket.acquire(weight)).await? {
                Ok(lease) => return Ok(lease),
                Err(AcquireError::QueueFull) => {
                    tracing::warn!(
                        "Rate limiter queue full; retrying in {}ms",
                        self.queue_full_backoff.as_millis()
                    );
                    bounded(deadline, cancel, tokio::time::sleep(self.queue_full_backoff)).await?;
                }
                Err(AcquireError::TooLarge {
                    requested,
                    capacity,
                }) => {
                    return Err(SessionError::Config(format!(
                        "request weight {} exceeds bucket capacity {}",
                        requested, capacity
                    )))
                }
                Err(AcquireError::ZeroWeight) => {
                    return Err(SessionError::Config("request weight must be positive".into()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn throttler() -> RateLimitedThrottler {
        RateLimitedThrottler::new(&RateLimitConfig::default())
    }

    fn rate_limited() -> SessionError {
        SessionError::Remote {
            code: 10028,
            message: "too_many_requests".into(),
            data: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_success() {
        let throttler = throttler();
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result = throttler
            .execute(500, None, &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 | 1 => Err(rate_limited()),
                        _ => Ok("done"),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_not_retried() {
        let throttler = throttler();
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result: SessionResult<()> = throttler
            .execute(500, None, &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SessionError::Remote {
                        code: 10009,
                        message: "not_enough_funds".into(),
                        data: None,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(SessionError::Remote { code: 10009, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let throttler = RateLimitedThrottler::new(&RateLimitConfig {
            max_retries: 2,
            ..Default::default()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result: SessionResult<()> = throttler
            .execute(500, None, &cancel, || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(rate_limited())
                }
            })
            .await;

        assert!(matches!(result, Err(SessionError::RateLimited { retries: 2 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_turns_retry_into_timeout() {
        let throttler = throttler();
        let cancel = CancellationToken::new();
        let deadline = Some(Instant::now() + Duration::from_millis(150));

        let result: SessionResult<()> = throttler
            .execute(500, deadline, &cancel, || async { Err(rate_limited()) })
            .await;

        assert!(matches!(result, Err(SessionError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_waiting_for_tokens() {
        let throttler = Arc::new(throttler());
        let cancel = CancellationToken::new();
        let drained = throttler
            .execute(50_000, None, &cancel, || async { Ok(()) })
            .await;
        assert!(drained.is_ok());

        let calls = Arc::new(AtomicU32::new(0));
        let task = {
            let throttler = Arc::clone(&throttler);
            let cancel = cancel.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                throttler
                    .execute(500, None, &cancel, || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert!(matches!(task.await.unwrap(), Err(SessionError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_weight_rejected() {
        let throttler = throttler();
        let cancel = CancellationToken::new();
        let result = throttler
            .execute(60_000, None, &cancel, || async { Ok(()) })
            .await;
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
