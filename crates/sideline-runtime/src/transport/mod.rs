//! Transport abstractions for upstream calls.
//!
//! This module defines the request/response shapes that flow through the
//! request cache and the resilience manager, the [`Transport`] trait that
//! actually moves bytes, and the error taxonomy shared by all of them.
//!
//! ## Security
//!
//! Bearer tokens are held as [`ApiToken`] and only exposed at header
//! construction. See the [`secrets`] module.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sideline_core::TrustMetadata;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod secrets;

#[cfg(feature = "http")]
mod http;

pub use secrets::{ApiToken, TokenSource};

#[cfg(feature = "http")]
pub use http::HttpTransport;

/// Errors from upstream calls.
///
/// `Clone` so a single outcome can be handed to every caller sharing a
/// de-duplicated request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Circuit open for service '{service}'")]
    CircuitOpen { service: String },

    #[error("Bulkhead full for service '{service}' ({max} in flight)")]
    BulkheadFull { service: String, max: usize },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UpstreamError {
    /// Network failures and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Rejected before any network call was made.
    pub fn is_admission(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::BulkheadFull { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// HTTP method of an upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache directive attached to a request, mirroring fetch `cache` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

impl CacheMode {
    /// The `Cache-Control` request header value this directive implies, if any.
    pub fn cache_control(&self) -> Option<&'static str> {
        match self {
            CacheMode::NoStore => Some("no-store"),
            CacheMode::Reload | CacheMode::NoCache => Some("no-cache"),
            CacheMode::OnlyIfCached => Some("only-if-cached"),
            CacheMode::Default | CacheMode::ForceCache => None,
        }
    }
}

/// An outbound request to the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    /// Header names are stored lowercased; the map keeps them sorted.
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub cache: CacheMode,
}

impl UpstreamRequest {
    /// Create a request with no headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            cache: CacheMode::Default,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Set a header. The name is lowercased.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set the content type.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, UpstreamError> {
        let body = serde_json::to_string(value).map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(self.header("content-type", "application/json").body(body))
    }

    pub fn cache_mode(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }
}

/// A settled upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub trust: TrustMetadata,
}

impl UpstreamResponse {
    /// Build a response, deriving trust metadata from `headers`.
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: impl Into<String>) -> Self {
        let trust = TrustMetadata::from_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        Self {
            status,
            headers,
            body: body.into(),
            trust,
        }
    }

    /// 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 5xx status.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, UpstreamError> {
        serde_json::from_str(&self.body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Something that can execute an [`UpstreamRequest`].
///
/// Implementations report transport failures as errors and return every
/// HTTP status, including 4xx and 5xx, as a response. Deciding what a status
/// means is left to the resilience layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;

    /// Transport name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_names_lowercased() {
        let request = UpstreamRequest::get("http://api/x").header("X-Trace", "1");
        assert_eq!(request.headers.get("x-trace").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = UpstreamRequest::post("http://api/x")
            .json(&serde_json::json!({"week": 3}))
            .unwrap();

        assert_eq!(request.body.as_deref(), Some(r#"{"week":3}"#));
        assert_eq!(
            request.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_response_trust_and_status() {
        let mut headers = BTreeMap::new();
        headers.insert("x-request-id".to_string(), "r-1".to_string());
        headers.insert("x-stale".to_string(), "true".to_string());

        let response = UpstreamResponse::new(204, headers, "");

        assert!(response.is_ok());
        assert!(!response.is_server_error());
        assert_eq!(response.trust.request_id.as_deref(), Some("r-1"));
        assert!(response.trust.stale);
        assert_eq!(response.header("X-Request-Id"), Some("r-1"));
    }

    #[test]
    fn test_error_classification() {
        assert!(UpstreamError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(UpstreamError::Network("reset".into()).is_retryable());
        assert!(!UpstreamError::Cancelled.is_retryable());
        assert!(UpstreamError::Cancelled.is_cancelled());
        assert!(UpstreamError::CircuitOpen { service: "s".into() }.is_admission());
        assert!(!UpstreamError::Decode("bad".into()).is_admission());
    }

    #[test]
    fn test_cache_mode_directive() {
        assert_eq!(CacheMode::NoStore.cache_control(), Some("no-store"));
        assert_eq!(CacheMode::Default.cache_control(), None);
    }
}
