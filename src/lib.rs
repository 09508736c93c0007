//! Client library for the Knock notification API.
//!
//! [`ApiClient`] sends authenticated REST requests with automatic retries and
//! keeps a real-time socket for channel subscriptions.
//!
//! Requests never return `Err`: every outcome is an [`ApiResponse`] whose
//! `status_code` is `ok` or `error`. Network failures and statuses rejected
//! after retries are reported with status 500 and the failure in `error`.
//!
//! # Example
//!
//! ```no_run
//! use knock_client::{ApiClient, ClientConfig, RequestSpec};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), knock_client::Error> {
//!     let client = ApiClient::new(
//!         ClientConfig::new("https://api.knock.app", "pk_test_123").with_user_token("user-jwt"),
//!     )?;
//!
//!     let resp = client
//!         .make_request(RequestSpec::get("/v1/users/user_1/feeds/feed_1").query("page_size", "20"))
//!         .await;
//!     println!("{} {}", resp.status_code, resp.status);
//!
//!     client.connect_socket()?;
//!     let mut channel = client.create_channel("feeds:feed_1:user_1", Some(json!({})));
//!     channel.join().await?;
//!     while let Some(event) = channel.recv().await {
//!         println!("{}: {}", event.event, event.payload);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Client configuration from code, TOML or environment |
//! | [`headers`] | Default request headers |
//! | [`request`] / [`response`] | Request description and normalized response |
//! | [`retry`] | Failure classification and backoff |
//! | [`socket`] / [`channel`] | Real-time connection and channel handles |
//! | [`protocol`] | Channel wire frames |

pub mod channel;
mod client;
pub mod config;
pub mod diagnostics;
mod error;
pub mod headers;
pub mod protocol;
pub mod request;
pub mod response;
pub mod retry;
pub mod socket;

pub use channel::{Channel, ChannelId, ChannelMessage, ChannelState};
pub use client::{ApiClient, ApiClientBuilder};
pub use config::{ClientConfig, ConfigError};
pub use diagnostics::{FailureRecorder, TracingRecorder};
pub use error::Error;
pub use request::RequestSpec;
pub use response::{ApiResponse, ResponseStatus};
pub use retry::{FailureKind, RetryPolicy};
pub use socket::{ConnectionState, OpenSignal, Socket, SocketOptions};
