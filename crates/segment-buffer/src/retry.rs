// Backoff policy shared by segment and manifest requests.

use crate::error::BufferError;
use crate::metrics::ControllerMetrics;
use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every further retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread retries by up to half the base delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

/// How a finished attempt is handled.
enum RetryAction<T> {
    Done(T),
    Retry(BufferError),
    Fail(BufferError),
}

impl<T> RetryAction<T> {
    fn from_result(result: Result<T, BufferError>) -> Self {
        match result {
            Ok(value) => Self::Done(value),
            Err(err) if err.is_retryable() => Self::Retry(err),
            Err(err) => Self::Fail(err),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry` (0 for the first retry).
    fn backoff(&self, retry: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        if !self.jitter {
            return delay;
        }

        let spread = (self.base_delay / 2).min(self.max_delay.saturating_sub(delay));
        let spread_ms = u64::try_from(spread.as_millis()).unwrap_or(u64::MAX);
        if spread_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..spread_ms))
    }

    /// Requests `target` until it succeeds, fails permanently or the retry
    /// budget runs out. Every attempt and backoff wait races `token`.
    ///
    /// `request` receives the attempt number, starting at 0.
    pub async fn run<T, F, Fut>(
        &self,
        target: &Url,
        token: &CancellationToken,
        metrics: Option<&ControllerMetrics>,
        request: F,
    ) -> Result<T, BufferError>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, BufferError>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(BufferError::Cancelled),
                result = request(attempt) => result,
            };

            let err = match RetryAction::from_result(result) {
                RetryAction::Done(value) => return Ok(value),
                RetryAction::Fail(err) => return Err(err),
                RetryAction::Retry(err) if attempt >= self.max_retries => return Err(err),
                RetryAction::Retry(err) => err,
            };

            let delay = self.backoff(attempt);
            attempt += 1;
            if let Some(metrics) = metrics {
                metrics.record_fetch_retry();
            }
            warn!(
                url = %target,
                attempt,
                max = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(BufferError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(1),
            jitter: false,
        }
    }

    fn target() -> Url {
        Url::parse("https://cdn.example.com/dash/chunk-stream0-00001.m4s").unwrap()
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_half_base_delay() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..32 {
            let delay = policy.backoff(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn missing_segment_is_not_retried() {
        let token = CancellationToken::new();
        let metrics = ControllerMetrics::new();
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = policy(3)
            .run(&target(), &token, Some(&metrics), |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async {
                    Err(BufferError::http_status(
                        StatusCode::NOT_FOUND,
                        "chunk-stream0-00001.m4s",
                    ))
                }
            })
            .await;
        assert!(matches!(result, Err(BufferError::HttpStatus { .. })));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.snapshot().fetch_retries, 0);
    }

    #[tokio::test]
    async fn unavailable_server_exhausts_retries() {
        let token = CancellationToken::new();
        let metrics = ControllerMetrics::new();
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = policy(2)
            .run(&target(), &token, Some(&metrics), |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async {
                    Err(BufferError::http_status(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "chunk-stream0-00001.m4s",
                    ))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.snapshot().fetch_retries, 2);
    }

    #[tokio::test]
    async fn recovers_after_truncated_body() {
        let token = CancellationToken::new();
        let result = policy(3)
            .run(&target(), &token, None, |attempt| async move {
                if attempt == 0 {
                    Err(BufferError::decode("chunk-stream0-00001.m4s", "connection reset"))
                } else {
                    Ok(7u32)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_pending_attempt() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result: Result<u32, _> = policy(3)
            .run(&target(), &token, None, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1u32)
            })
            .await;
        assert!(matches!(result, Err(BufferError::Cancelled)));
    }
}
