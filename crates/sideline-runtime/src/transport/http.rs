//! `reqwest`-backed transport for the Workers API.

use super::{ApiToken, Method, Transport, UpstreamError, UpstreamRequest, UpstreamResponse};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Request deadline when none is configured.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport over a pooled `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
    token: Option<ApiToken>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("token", &self.token)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport with its own connection pool.
    pub fn new(token: Option<ApiToken>) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .map_err(|e| UpstreamError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self::with_client(client, token))
    }

    /// Wrap an existing client, e.g. one shared with other subsystems.
    pub fn with_client(client: reqwest::Client, token: Option<ApiToken>) -> Self {
        Self {
            client,
            token,
            timeout: CLIENT_TIMEOUT,
        }
    }

    /// Per-request deadline. Reported in [`UpstreamError::Timeout`] when it fires.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_error(&self, error: reqwest::Error) -> UpstreamError {
        if error.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Network(error.to_string())
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url)
            .timeout(self.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(directive) = request.cache.cache_control() {
            if !request.headers.contains_key("cache-control") {
                builder = builder.header("cache-control", directive);
            }
        }

        // SECURITY: only expose the token here, at the point of use
        if let Some(token) = &self.token {
            if !request.headers.contains_key("authorization") {
                builder = builder.header("authorization", token.bearer());
            }
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| self.map_error(e))?;

        Ok(UpstreamResponse::new(status, headers, body))
    }

    fn name(&self) -> &str {
        "http"
    }
}
