//! Error types for the Knock client.

use crate::config::ConfigError;
use thiserror::Error;


/// Client error types.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed before a response status was available.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Connection parameters could not be encoded as a query string.
    #[error("Query encoding failed: {0}")]
    QueryEncoding(#[from] serde_urlencoded::ser::Error),

    /// A configured value cannot be sent as an HTTP header.
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// The service answered with a status the request does not accept.
    #[error("API returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response payload, if any.
        body: Option<serde_json::Value>,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A channel push was answered with a non-`ok` reply.
    #[error("Channel reply {status}: {response}")]
    ChannelReply {
        /// Reply status reported by the server (e.g. "error").
        status: String,
        /// Reply payload.
        response: serde_json::Value,
    },

    /// The channel has not been joined.
    #[error("Channel is not joined: {0}")]
    NotJoined(String),

    /// `join` was called on a channel that is already joining or joined.
    #[error("Channel already joined: {0}")]
    AlreadyJoined(String),

    /// No reply arrived within the push timeout.
    #[error("Timed out waiting for reply to {event} on {topic}")]
    Timeout {
        /// Channel topic.
        topic: String,
        /// Event that was pushed.
        event: String,
    },

    /// The operation needs a Tokio runtime and none is running.
    #[error("No Tokio runtime available")]
    NoRuntime,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Returns the HTTP status carried by this error, if a response was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
