//! Runtime configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! stock behaviour: 2.5s attempt timeout, 2 retries, breaker opening after 5
//! failures with a 30s cooldown, 20 concurrent calls per service.
//!
//! ```yaml
//! upstream:
//!   base_url: https://workers.example.com
//!   timeout: 2500ms
//!   retries: 2
//! resilience:
//!   failure_threshold: 5
//!   cooldown: 30s
//!   max_concurrent: 20
//! request_cache:
//!   enabled: true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::{ResilienceConfig, RetryPolicy};

/// Overrides `upstream.base_url` when set.
pub const UPSTREAM_URL_ENV: &str = "SIDELINE_UPSTREAM_URL";

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Human-readable durations (`250ms`, `2.5s`, `30s`) for serde.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// `humantime` does not accept fractional units, so `2.5s` is handled here.
    pub(crate) fn parse(raw: &str) -> Result<Duration, String> {
        let raw = raw.trim();
        if let Some(secs) = raw.strip_suffix('s').filter(|s| s.contains('.')) {
            return secs
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| format!("invalid duration '{}'", raw));
        }
        humantime::parse_duration(raw).map_err(|e| format!("invalid duration '{}': {}", raw, e))
    }
}

/// Where and how to reach the Workers API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,

    /// Breaker and bulkhead key for this upstream
    pub service: String,

    #[serde(with = "duration_str")]
    pub timeout: Duration,

    pub retries: u32,

    #[serde(with = "duration_str")]
    pub retry_delay: Duration,

    #[serde(with = "duration_str")]
    pub max_retry_delay: Duration,

    pub jitter: bool,

    /// Headers added to every request
    pub default_headers: BTreeMap<String, String>,

    /// Bearer token; falls back to `SIDELINE_API_TOKEN`
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            service: "workers-api".to_string(),
            timeout: retry.timeout,
            retries: retry.retries,
            retry_delay: retry.retry_delay,
            max_retry_delay: retry.max_delay,
            jitter: retry.jitter,
            default_headers: BTreeMap::new(),
            api_token: None,
        }
    }
}

impl UpstreamConfig {
    /// Retry policy built from the upstream settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            retry_delay: self.retry_delay,
            max_delay: self.max_retry_delay,
            jitter: self.jitter,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestCacheConfig {
    /// De-duplicate identical in-flight requests
    pub enabled: bool,
}

impl Default for RequestCacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub upstream: UpstreamConfig,
    pub resilience: ResilienceConfig,
    pub request_cache: RequestCacheConfig,
}

impl RuntimeConfig {
    /// Parse YAML (JSON is valid YAML, so both work here).
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Parse strict JSON.
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load from disk, choosing the parser by extension, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&source)?,
            _ => Self::from_yaml(&source)?,
        };

        config.validate()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(UPSTREAM_URL_ENV) {
            self.upstream.base_url = url;
        }
        self
    }

    /// Semantic checks serde cannot express. All problems are reported at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let url = &self.upstream.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            problems.push(format!("upstream.base_url must start with http:// or https:// (got '{}')", url));
        }
        if self.upstream.service.trim().is_empty() {
            problems.push("upstream.service must not be empty".to_string());
        }
        if self.upstream.timeout.is_zero() {
            problems.push("upstream.timeout must be greater than zero".to_string());
        }
        if self.resilience.failure_threshold == 0 {
            problems.push("resilience.failure_threshold must be at least 1".to_string());
        }
        if self.resilience.max_concurrent == 0 {
            problems.push("resilience.max_concurrent must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}
