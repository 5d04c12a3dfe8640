//! Retry with exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::config::RetryConfig;
use crate::providers::ProviderError;

/// Backoff growth per attempt.
pub const BACKOFF_FACTOR: f32 = 2.0;

/// Retry schedule for one job.
///
/// Only transient errors (`network`, `timeout`, `rate_limit`) are retried.
/// At most `1 + max_retries` attempts are made.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(retry: &RetryConfig, max_retries: u32) -> Self {
        Self {
            min_delay: retry.min_delay,
            max_delay: retry.max_delay,
            jitter: retry.jitter,
            max_retries,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(BACKOFF_FACTOR)
            .with_max_times(self.max_retries as usize);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// `keep_going` is consulted before each retry so a cancelled session
    /// stops early; `on_retry` sees the error and the upcoming delay.
    pub async fn run<T, F, Fut, K, N>(
        &self,
        op: F,
        mut keep_going: K,
        on_retry: N,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        K: FnMut() -> bool,
        N: FnMut(&ProviderError, Duration),
    {
        op.retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(move |e: &ProviderError| e.is_transient() && keep_going())
            .notify(on_retry)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig::default(), max_retries)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy(3)
            .run(
                || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::Network("connection reset".into()))
                    } else {
                        Ok("graded")
                    }
                },
                || true,
                |_, _| {},
            )
            .await;

        assert_eq!(result.unwrap(), "graded");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy(2)
            .run(
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Timeout(Duration::from_secs(1)))
                },
                || true,
                |_, _| {},
            )
            .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_do_not_retry() {
        for err in [
            ProviderError::Auth("bad key".into()),
            ProviderError::MalformedRequest("unknown model".into()),
        ] {
            let counter = AtomicU32::new(0);
            let calls = &counter;
            let result: Result<(), _> = policy(5)
                .run(
                    || {
                        let err = err.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Err(err)
                        }
                    },
                    || true,
                    |_, _| {},
                )
                .await;
            assert!(result.is_err());
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_going_stops_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy(5)
            .run(
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Network("down".into()))
                },
                || false,
                |_, _| {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_grow_and_are_capped() {
        let retry = RetryConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter: false,
        };
        let mut delays = Vec::new();
        let _: Result<(), _> = RetryPolicy::new(&retry, 4)
            .run(
                || async { Err(ProviderError::Network("down".into())) },
                || true,
                |_, delay| delays.push(delay),
            )
            .await;

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
                Duration::from_millis(300),
            ]
        );
    }
}
