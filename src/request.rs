//! Request descriptions merged onto the client defaults.

use crate::error::Error;
use reqwest::Method;
use serde_json::Value;
use url::Url;

/// Predicate deciding which response statuses count as success.
pub type StatusValidator = fn(u16) -> bool;

/// Accepts `2xx` statuses only.
#[must_use]
pub fn default_validate_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// A single API request.
///
/// Headers given here are added on top of the client's default headers and
/// replace defaults with the same name.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the client host, or an absolute URL.
    pub path: String,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
    /// JSON request body.
    pub body: Option<Value>,
    /// Extra headers for this request.
    pub headers: Vec<(String, String)>,
    /// Statuses for which the request is considered successful.
    pub validate_status: StatusValidator,
}

impl RequestSpec {
    /// Creates a request with the given method and path.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            validate_status: default_validate_status,
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a POST request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Creates a PUT request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Creates a PATCH request.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// Creates a DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the status validator.
    #[must_use]
    pub fn validate_status(mut self, validator: StatusValidator) -> Self {
        self.validate_status = validator;
        self
    }

    /// Returns true if `status` counts as success for this request.
    #[must_use]
    pub fn accepts(&self, status: u16) -> bool {
        (self.validate_status)(status)
    }

    /// Resolves the request path against the client host.
    ///
    /// # Errors
    /// Returns error if the resulting URL is invalid.
    pub fn resolve(&self, base: &str) -> Result<Url, Error> {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            return Ok(Url::parse(&self.path)?);
        }
        if self.path.is_empty() {
            return Ok(Url::parse(base)?);
        }
        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        );
        Ok(Url::parse(&url)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_validator_accepts_2xx_only() {
        assert!(default_validate_status(200));
        assert!(default_validate_status(204));
        assert!(default_validate_status(299));
        assert!(!default_validate_status(199));
        assert!(!default_validate_status(301));
        assert!(!default_validate_status(404));
        assert!(!default_validate_status(500));
    }

    #[test]
    fn test_builder_accumulates_fields() {
        let spec = RequestSpec::put("/v1/users/u1/feeds/f1/messages/batch/seen")
            .query("page_size", "50")
            .header("X-Request-Id", "r1")
            .json(json!({"message_ids": ["m1"]}));

        assert_eq!(spec.method, Method::PUT);
        assert_eq!(spec.query, vec![("page_size".to_string(), "50".to_string())]);
        assert_eq!(spec.headers.len(), 1);
        assert_eq!(spec.body, Some(json!({"message_ids": ["m1"]})));
    }

    #[test]
    fn test_custom_validator() {
        let spec = RequestSpec::get("/v1/ping").validate_status(|_| true);

        assert!(spec.accepts(404));
        assert!(spec.accepts(503));
    }

    #[test]
    fn test_resolve_joins_slashes() {
        let spec = RequestSpec::get("/v1/users/u1");
        let url = spec.resolve("https://api.example.com/").unwrap();

        assert_eq!(url.as_str(), "https://api.example.com/v1/users/u1");
    }

    #[test]
    fn test_resolve_without_leading_slash() {
        let spec = RequestSpec::get("v1/users/u1");
        let url = spec.resolve("https://api.example.com").unwrap();

        assert_eq!(url.as_str(), "https://api.example.com/v1/users/u1");
    }

    #[test]
    fn test_resolve_absolute_url() {
        let spec = RequestSpec::delete("http://other.example.com/x");
        let url = spec.resolve("https://api.example.com").unwrap();

        assert_eq!(url.as_str(), "http://other.example.com/x");
    }

    #[test]
    fn test_resolve_invalid_base() {
        let spec = RequestSpec::get("/v1");
        assert!(matches!(spec.resolve("not a host"), Err(Error::InvalidUrl(_))));
    }
}
