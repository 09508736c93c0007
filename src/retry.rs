//! Retry classification and exponential backoff for API requests.

use crate::error::Error;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Why a request attempt failed, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No response was received (connect failure, timeout, send failure).
    Network,
    /// The service answered 5xx.
    ServerError,
    /// The service answered 429.
    RateLimited,
    /// Any other rejected status.
    ClientError,
    /// The failure could not be attributed to the network or a status.
    Indeterminate,
}

impl FailureKind {
    /// Returns true if an attempt failing this way should be retried.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::ServerError | Self::RateLimited)
    }
}

/// Classifies a rejected response status.
#[must_use]
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        500..=599 => FailureKind::ServerError,
        429 => FailureKind::RateLimited,
        _ => FailureKind::ClientError,
    }
}

/// Classifies a failed attempt.
#[must_use]
pub fn classify(error: &Error) -> FailureKind {
    match error {
        Error::Status { status, .. } => classify_status(*status),
        Error::Http(err) => match err.status() {
            Some(status) => classify_status(status.as_u16()),
            None if is_network_error(err) => FailureKind::Network,
            None => FailureKind::Indeterminate,
        },
        _ => FailureKind::Indeterminate,
    }
}

/// True for transport failures where no complete response reached the client.
///
/// Bodies are parsed with `serde_json` after they are read, so a reqwest
/// decode error only comes from a body stream that broke off.
fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() || err.is_decode()
}

/// How failed requests are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay unit; retry `n` waits `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `attempt` until it succeeds, fails in a non-retryable way, or the
    /// retry budget is spent. The last error is returned on failure.
    ///
    /// # Errors
    /// Returns the error of the final attempt.
    pub async fn run<F, Fut, T>(&self, mut attempt: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let kind = classify(&err);
                    if !kind.is_retryable() || retries >= self.max_retries {
                        return Err(err);
                    }
                    retries += 1;
                    let delay = self.delay_for(retries);
                    debug!(?kind, retry = retries, ?delay, "retrying request: {}", err);
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

    fn status_error(status: u16) -> Error {
        Error::Status { status, body: None }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(500), FailureKind::ServerError);
        assert_eq!(classify_status(503), FailureKind::ServerError);
        assert_eq!(classify_status(599), FailureKind::ServerError);
        assert_eq!(classify_status(429), FailureKind::RateLimited);
        assert_eq!(classify_status(404), FailureKind::ClientError);
        assert_eq!(classify_status(400), FailureKind::ClientError);
        assert_eq!(classify_status(301), FailureKind::ClientError);
        assert_eq!(classify_status(600), FailureKind::ClientError);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(FailureKind::Network.is_retryable());
        assert!(FailureKind::ServerError.is_retryable());
        assert!(FailureKind::RateLimited.is_retryable());
        assert!(!FailureKind::ClientError.is_retryable());
        assert!(!FailureKind::Indeterminate.is_retryable());
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(classify(&Error::ConnectionClosed), FailureKind::Indeterminate);
        assert_eq!(classify(&status_error(429)), FailureKind::RateLimited);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(100) >= policy.delay_for(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_server_errors_up_to_limit() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<(), Error> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(status_error(503)) }
            })
            .await;

        assert!(matches!(result, Err(Error::Status { status: 503, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_does_not_retry_client_errors() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<(), Error> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(status_error(404)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recovers_after_rate_limit() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result = policy
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(status_error(429))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_with_no_retries() {
        let policy = RetryPolicy::none();
        let attempts = AtomicU32::new(0);

        let result: Result<(), Error> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(status_error(500)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
