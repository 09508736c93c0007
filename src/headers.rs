//! Default headers attached to every API request.

use crate::config::ClientConfig;
use crate::error::Error;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

/// Header carrying the user token.
pub const USER_TOKEN_HEADER: &str = "x-knock-user-token";

/// Value sent in the user-token header when no token is configured.
pub const MISSING_USER_TOKEN: &str = "null";

/// Builds the default header set for a configuration.
///
/// The user-token header is always present; without a token it carries the
/// literal string `null`.
///
/// # Errors
/// Returns error if the API key or user token is not a valid header value.
pub fn default_headers(config: &ClientConfig) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    let user_token = config.user_token.as_deref().unwrap_or(MISSING_USER_TOKEN);
    let mut token = HeaderValue::from_str(user_token)?;
    token.set_sensitive(true);
    headers.insert(HeaderName::from_static(USER_TOKEN_HEADER), token);

    Ok(headers)
}
