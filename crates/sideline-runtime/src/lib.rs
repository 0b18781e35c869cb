//! # sideline-runtime
//!
//! Bounded, failure-aware access to the upstream Workers API.
//!
//! This crate provides:
//! - [`RequestCache`]: identical in-flight requests share one call and can be
//!   cancelled by key
//! - [`ResilienceManager`]: per-service circuit breaker and bulkhead, with
//!   retry and per-attempt timeouts
//! - [`WorkersClient`]: both of the above stacked over a [`Transport`]
//!
//! State lives in these structs, constructed once at startup and shared by
//! reference. Nothing here is global.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sideline_runtime::{RuntimeConfig, WorkersClient};
//!
//! let config = RuntimeConfig::load("sideline.yaml".as_ref())?.apply_env();
//! let client = WorkersClient::from_config(config)?;
//!
//! let envelope = client.get_json::<serde_json::Value>("projections/week/3").await?;
//! if envelope.trust.stale {
//!     tracing::warn!("serving stale projections");
//! }
//! ```

pub mod client;
pub mod config;
pub mod request_cache;
pub mod resilience;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{Envelope, GuardedTransport, WorkersClient};
pub use config::{ConfigError, RequestCacheConfig, RuntimeConfig, UpstreamConfig};
pub use request_cache::{FetchResult, PendingFetch, RequestCache, RequestKey};
pub use resilience::{
    BulkheadPermit, CircuitState, ResilienceConfig, ResilienceManager, RetryPolicy, ServiceHealth,
};
pub use transport::{
    ApiToken, CacheMode, Method, TokenSource, Transport, UpstreamError, UpstreamRequest,
    UpstreamResponse,
};

#[cfg(feature = "http")]
pub use transport::HttpTransport;
