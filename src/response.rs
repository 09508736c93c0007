//! Normalized API responses.

use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status reported for every request that failed outright.
pub const FAILURE_STATUS: u16 = 500;

/// Coarse outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The service answered with a status below 300.
    Ok,
    /// The request failed or the service answered with an error status.
    Error,
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Result of [`ApiClient::make_request`](crate::ApiClient::make_request).
#[derive(Debug)]
pub struct ApiResponse {
    /// Outcome.
    pub status_code: ResponseStatus,
    /// HTTP status, or 500 when the request failed.
    pub status: u16,
    /// Response payload.
    pub body: Option<Value>,
    /// Failure detail, set only when the request failed.
    pub error: Option<Error>,
}

impl ApiResponse {
    /// Builds a response for a completed request.
    #[must_use]
    pub fn completed(status: u16, body: Option<Value>) -> Self {
        let status_code = if status < 300 {
            ResponseStatus::Ok
        } else {
            ResponseStatus::Error
        };
        Self {
            status_code,
            status,
            body,
            error: None,
        }
    }

    /// Builds a response for a failed request.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self {
            status_code: ResponseStatus::Error,
            status: FAILURE_STATUS,
            body: None,
            error: Some(error),
        }
    }

    /// Returns true if the outcome is `ok`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status_code == ResponseStatus::Ok
    }

    /// Deserializes the body into `T`.
    ///
    /// # Errors
    /// Returns error if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let body = self.body.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(body)?)
    }
}

/// Interprets a raw response body: JSON when it parses, text otherwise.
pub(crate) fn parse_body(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}
