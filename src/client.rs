//! API client: authenticated requests with retries plus the channel socket.

use crate::channel::Channel;
use crate::config::ClientConfig;
use crate::diagnostics::{FailureRecorder, TracingRecorder};
use crate::error::Error;
use crate::headers::{MISSING_USER_TOKEN, default_headers};
use crate::request::RequestSpec;
use crate::response::{ApiResponse, parse_body};
use crate::retry::RetryPolicy;
use crate::socket::{Socket, SocketOptions, socket_endpoint};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use url::Url;


/// Builder for [`ApiClient`].
#[derive(Debug)]
pub struct ApiClientBuilder {
    config: ClientConfig,
    retry_policy: RetryPolicy,
    socket_options: SocketOptions,
    recorder: Arc<dyn FailureRecorder>,
}

impl ApiClientBuilder {
    /// Overrides the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Overrides the socket options.
    #[must_use]
    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Replaces the recorder notified of failed requests.
    #[must_use]
    pub fn failure_recorder(mut self, recorder: Arc<dyn FailureRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid, the host is not a URL,
    /// or a credential is not a valid header value.
    pub fn build(self) -> Result<ApiClient, Error> {
        let config = self.config;
        config.validate()?;
        Url::parse(&config.host)?;

        let client = Client::builder()
            .default_headers(default_headers(&config)?)
            .build()?;

        let user_token = config.user_token.as_deref();
        let mut params: Vec<(&str, &str)> = Vec::with_capacity(2);
        if let Some(token) = user_token {
            params.push(("user_token", token));
        }
        params.push(("api_key", config.api_key.as_str()));
        let socket = Socket::new(socket_endpoint(&config.host), &params, self.socket_options)?;

        debug!(
            host = %config.host,
            user_token = user_token.is_some(),
            "api client created"
        );

        Ok(ApiClient {
            host: config.host.trim_end_matches('/').to_string(),
            config: Arc::new(config),
            client,
            retry_policy: self.retry_policy,
            socket,
            recorder: self.recorder,
            socket_connected: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Client for the Knock API.
///
/// Owns one HTTP client and one socket; both are configured at construction.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    host: String,
    client: Client,
    retry_policy: RetryPolicy,
    socket: Socket,
    recorder: Arc<dyn FailureRecorder>,
    socket_connected: Arc<AtomicBool>,
}

impl ApiClient {
    /// Creates a client with the default retry policy and socket options.
    ///
    /// # Errors
    /// Returns error if the client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        Self::builder(config).build()
    }

    /// Starts a builder for `config`.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            retry_policy: RetryPolicy::default(),
            socket_options: SocketOptions::default(),
            recorder: Arc::new(TracingRecorder),
        }
    }

    /// Configuration the client was built from.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Value sent in the user-token header.
    #[must_use]
    pub fn user_token_header(&self) -> &str {
        self.config
            .user_token
            .as_deref()
            .unwrap_or(MISSING_USER_TOKEN)
    }

    /// Retry policy applied to every request.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// The underlying socket.
    #[must_use]
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// True once the socket has opened after [`ApiClient::connect_socket`].
    ///
    /// The flag is not cleared by [`ApiClient::disconnect_socket`] or by a
    /// lost connection; use [`Socket::is_connected`] for the live state.
    #[must_use]
    pub fn socket_connected(&self) -> bool {
        self.socket_connected.load(Ordering::Acquire)
    }

    /// Executes a request, retrying per the retry policy.
    ///
    /// Never fails: every failure is reported as an [`ApiResponse`] with
    /// status 500 and the failure detail in `error`.
    pub async fn make_request(&self, request: RequestSpec) -> ApiResponse {
        let spec = &request;
        match self.retry_policy.run(move || self.send_once(spec)).await {
            Ok((status, body)) => ApiResponse::completed(status, body),
            Err(err) => {
                self.recorder.record_failure(&request, &err);
                ApiResponse::failed(err)
            }
        }
    }

    /// Starts connecting the socket without waiting for it to open. A no-op
    /// once the socket has opened.
    ///
    /// # Errors
    /// Returns `Error::NoRuntime` outside a Tokio runtime.
    pub fn connect_socket(&self) -> Result<(), Error> {
        if self.socket_connected() {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let opened = self.socket.on_open();
        self.socket.connect()?;

        let flag = Arc::clone(&self.socket_connected);
        handle.spawn(async move {
            if opened.opened().await {
                flag.store(true, Ordering::Release);
            }
        });
        Ok(())
    }

    /// Starts closing the socket. Does not clear [`ApiClient::socket_connected`].
    pub fn disconnect_socket(&self) {
        self.socket.disconnect();
    }

    /// Creates a channel handle on the socket. Each call returns a new,
    /// independent handle.
    #[must_use]
    pub fn create_channel(&self, name: impl Into<String>, params: Option<Value>) -> Channel {
        self.socket.channel(name, params)
    }

    async fn send_once(&self, request: &RequestSpec) -> Result<(u16, Option<Value>), Error> {
        let mut url = request.resolve(&self.host)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = parse_body(&resp.bytes().await?);
        debug!(method = %request.method, path = %request.path, status, "request completed");

        if request.accepts(status) {
            Ok((status, body))
        } else {
            Err(Error::Status { status, body })
        }
    }
}
