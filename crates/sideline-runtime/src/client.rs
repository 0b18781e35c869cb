//! Client for the Workers API.
//!
//! Stacks the pieces the dashboard needs for every upstream call:
//!
//! ```text
//! WorkersClient::fetch
//!     → RequestCache        (share identical in-flight requests, abort by key)
//!     → GuardedTransport    (ResilienceManager: bulkhead, breaker, retry)
//!     → Transport           (HttpTransport in production)
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sideline_core::TrustMetadata;
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::request_cache::{FetchResult, RequestCache};
use crate::resilience::{ResilienceManager, RetryPolicy, ServiceHealth};
use crate::transport::{Transport, UpstreamError, UpstreamRequest, UpstreamResponse};

/// A transport that routes every call through a [`ResilienceManager`].
pub struct GuardedTransport {
    inner: Arc<dyn Transport>,
    resilience: Arc<ResilienceManager>,
    service: String,
    policy: RetryPolicy,
}

impl GuardedTransport {
    /// Guard `inner` under `resilience` as `service`.
    pub fn new(
        inner: Arc<dyn Transport>,
        resilience: Arc<ResilienceManager>,
        service: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            resilience,
            service: service.into(),
            policy,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

#[async_trait]
impl Transport for GuardedTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.resilience
            .execute(&self.service, self.inner.as_ref(), request, &self.policy)
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Decoded payload plus the trust metadata it arrived with.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub status: u16,
    pub trust: TrustMetadata,
}

/// High-level client used by the dashboard's data loaders.
pub struct WorkersClient {
    base_url: String,
    config: RuntimeConfig,
    guarded: Arc<GuardedTransport>,
    cache: RequestCache,
    resilience: Arc<ResilienceManager>,
}

impl WorkersClient {
    /// Build a client over an arbitrary transport.
    pub fn new(config: RuntimeConfig, transport: Arc<dyn Transport>) -> Self {
        let resilience = Arc::new(ResilienceManager::new(config.resilience.clone()));
        Self::with_resilience(config, transport, resilience)
    }

    /// Build a client sharing an existing [`ResilienceManager`] with other clients.
    pub fn with_resilience(
        config: RuntimeConfig,
        transport: Arc<dyn Transport>,
        resilience: Arc<ResilienceManager>,
    ) -> Self {
        let guarded = Arc::new(GuardedTransport::new(
            transport,
            Arc::clone(&resilience),
            config.upstream.service.clone(),
            config.upstream.retry_policy(),
        ));
        let cache = RequestCache::new(guarded.clone());

        Self {
            base_url: config.upstream.base_url.trim_end_matches('/').to_string(),
            config,
            guarded,
            cache,
            resilience,
        }
    }

    /// Build a client over HTTP from configuration.
    #[cfg(feature = "http")]
    pub fn from_config(config: RuntimeConfig) -> Result<Self, UpstreamError> {
        use crate::transport::{secrets::TOKEN_ENV, ApiToken, HttpTransport};

        let token = ApiToken::from_config_or_env(config.upstream.api_token.as_deref(), TOKEN_ENV);
        match &token {
            Some(token) => tracing::debug!(source = %token.source(), "Using API token"),
            None => tracing::debug!("No API token configured"),
        }
        let transport = HttpTransport::new(token)?.with_timeout(config.upstream.timeout);
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// A GET request for `path` with the configured default headers.
    pub fn request(&self, path: &str) -> UpstreamRequest {
        self.prepare(UpstreamRequest::get(self.url(path)))
    }

    fn prepare(&self, mut request: UpstreamRequest) -> UpstreamRequest {
        for (name, value) in &self.config.upstream.default_headers {
            let name = name.to_ascii_lowercase();
            request.headers.entry(name).or_insert_with(|| value.clone());
        }
        request
    }

    /// Issue `request`, de-duplicating identical in-flight calls when enabled.
    pub async fn fetch(&self, request: UpstreamRequest) -> FetchResult {
        let request = self.prepare(request);
        if self.config.request_cache.enabled {
            self.cache.fetch(request).await
        } else {
            self.guarded.send(&request).await.map(Arc::new)
        }
    }

    /// GET `path`, sharing any identical request already in flight.
    pub async fn get(&self, path: &str) -> FetchResult {
        self.fetch(UpstreamRequest::get(self.url(path))).await
    }

    /// GET `path` and decode a 2xx JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Envelope<T>, UpstreamError> {
        let response = self.get(path).await?;
        if !response.is_ok() {
            return Err(UpstreamError::Status {
                status: response.status,
                body: response.body.clone(),
            });
        }

        Ok(Envelope {
            data: response.json()?,
            status: response.status,
            trust: response.trust.clone(),
        })
    }

    /// Cancel a pending request previously passed to [`fetch`](Self::fetch).
    pub fn abort(&self, request: &UpstreamRequest) -> bool {
        self.cache.abort(&self.prepare(request.clone()))
    }

    /// Distinct requests currently pending.
    pub fn in_flight(&self) -> usize {
        self.cache.in_flight()
    }

    /// Breaker and bulkhead health for every service seen so far.
    pub fn health(&self) -> Vec<ServiceHealth> {
        self.resilience.snapshot()
    }

    /// The shared resilience manager.
    pub fn resilience(&self) -> &Arc<ResilienceManager> {
        &self.resilience
    }
}
