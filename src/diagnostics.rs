//! Failure reporting for requests that end in the error path.

use crate::error::Error;
use crate::request::RequestSpec;
use std::fmt::Debug;
use tracing::error;

/// Receives every request failure before it is returned to the caller.
pub trait FailureRecorder: Debug + Send + Sync {
    /// Records a failed request.
    fn record_failure(&self, request: &RequestSpec, error: &Error);
}

/// Default recorder; emits a `tracing` error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl FailureRecorder for TracingRecorder {
    fn record_failure(&self, request: &RequestSpec, error: &Error) {
        error!(
            method = %request.method,
            path = %request.path,
            status = ?error.status(),
            "request failed: {}",
            error
        );
    }
}
