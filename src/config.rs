//! Client configuration, loadable from TOML files or the environment.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Environment variable holding the API host.
pub const HOST_ENV: &str = "KNOCK_HOST";
/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "KNOCK_API_KEY";
/// Environment variable holding the optional user token.
pub const USER_TOKEN_ENV: &str = "KNOCK_USER_TOKEN";

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "https://api.knock.app";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
    /// Required environment variable is not set.
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
}

/// Options the API client is constructed from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., "https://api.knock.app").
    #[serde(default = "default_host")]
    pub host: String,
    /// Public API key, sent as a bearer token.
    pub api_key: String,
    /// Token identifying the signed-in user, if any.
    #[serde(default)]
    pub user_token: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

impl ClientConfig {
    /// Creates a configuration for the given host and API key.
    #[must_use]
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            user_token: None,
        }
    }

    /// Sets the user token.
    #[must_use]
    pub fn with_user_token(mut self, user_token: impl Into<String>) -> Self {
        self.user_token = Some(user_token.into());
        self
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if the content is not valid TOML or fails validation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from `KNOCK_HOST`, `KNOCK_API_KEY` and
    /// `KNOCK_USER_TOKEN`.
    ///
    /// # Errors
    /// Returns error if the API key is missing or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns error if the API key is missing or validation fails.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(API_KEY_ENV).ok_or(ConfigError::MissingEnv(API_KEY_ENV))?;
        let config = Self {
            host: lookup(HOST_ENV).unwrap_or_else(default_host),
            api_key,
            user_token: lookup(USER_TOKEN_ENV).filter(|t| !t.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns error if the host or API key is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "host cannot be empty".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "api_key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
