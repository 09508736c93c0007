//! Integration tests for the Knock API client.
//!
//! Tests run against [`mock::MockServer`], a local axum service started per
//! test, so no external service is needed. Set `RUST_LOG` to see client and
//! mock logs.

pub mod mock;
pub mod raw;

use knock_client::{
    ApiClient, ClientConfig, Error, FailureRecorder, RequestSpec, RetryPolicy, SocketOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// API key used by every test client.
pub const TEST_API_KEY: &str = "pk_test_123";

/// Installs a test log subscriber once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Retry policy with the default budget and millisecond delays.
#[must_use]
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(5),
    }
}

/// Socket options with short timeouts for tests.
#[must_use]
pub fn fast_socket_options() -> SocketOptions {
    SocketOptions {
        heartbeat_interval: Duration::from_secs(30),
        push_timeout: Duration::from_secs(2),
        reconnect: true,
    }
}

/// Failure recorder that keeps what it was given.
#[derive(Debug, Default)]
pub struct CapturingRecorder {
    failures: Mutex<Vec<(String, String)>>,
}

impl CapturingRecorder {
    /// Recorded `(path, error)` pairs.
    #[must_use]
    pub fn failures(&self) -> Vec<(String, String)> {
        self.failures.lock().clone()
    }
}

impl FailureRecorder for CapturingRecorder {
    fn record_failure(&self, request: &RequestSpec, error: &Error) {
        self.failures
            .lock()
            .push((request.path.clone(), error.to_string()));
    }
}

/// Creates a client for `host` with fast retries and socket options.
///
/// # Errors
/// Returns error if client creation fails.
pub fn create_test_client(host: &str, user_token: Option<&str>) -> Result<ApiClient, Error> {
    let mut config = ClientConfig::new(host, TEST_API_KEY);
    if let Some(token) = user_token {
        config = config.with_user_token(token);
    }
    ApiClient::builder(config)
        .retry_policy(fast_retry_policy())
        .socket_options(fast_socket_options())
        .build()
}

/// Like [`create_test_client`], with a capturing failure recorder.
///
/// # Errors
/// Returns error if client creation fails.
pub fn create_recording_client(host: &str) -> Result<(ApiClient, Arc<CapturingRecorder>), Error> {
    let recorder = Arc::new(CapturingRecorder::default());
    let client = ApiClient::builder(ClientConfig::new(host, TEST_API_KEY))
        .retry_policy(fast_retry_policy())
        .socket_options(fast_socket_options())
        .failure_recorder(Arc::clone(&recorder) as Arc<dyn FailureRecorder>)
        .build()?;
    Ok((client, recorder))
}

/// URL of a local port with nothing listening on it.
///
/// # Errors
/// Returns error if no port can be reserved.
pub async fn unreachable_host() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{}", addr))
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
