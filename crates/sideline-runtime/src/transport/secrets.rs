//! Secure handling of the upstream bearer token.
//!
//! - **No accidental logging**: the token never appears in Debug output
//! - **Zeroed on drop**: via the `secrecy` crate
//! - **Explicit exposure**: only at header construction
//!
//! ## Usage
//!
//! ```ignore
//! let token = ApiToken::from_config_or_env(config.upstream.api_token.as_deref(), TOKEN_ENV);
//! request.header("authorization", format!("Bearer {}", token.expose()));
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::UpstreamError;

/// Environment variable consulted when no token is configured.
pub const TOKEN_ENV: &str = "SIDELINE_API_TOKEN";

/// Where a token was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Config => write!(f, "config"),
            TokenSource::Environment => write!(f, "environment"),
            TokenSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A bearer token for the Workers API.
pub struct ApiToken {
    value: SecretString,
    source: TokenSource,
}

impl ApiToken {
    /// Wrap a token value.
    pub fn new(value: impl Into<String>, source: TokenSource) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
        }
    }

    /// Load from an environment variable.
    pub fn from_env(env_var: &str) -> Result<Self, UpstreamError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, TokenSource::Environment))
            .map_err(|_| {
                UpstreamError::NotConfigured(format!(
                    "API token not set: configure '{}' environment variable",
                    env_var
                ))
            })
    }

    /// Prefer the configured value, fall back to `env_var`.
    ///
    /// Empty values count as absent. Returns `None` when neither is present;
    /// the upstream may not require authentication.
    pub fn from_config_or_env(configured: Option<&str>, env_var: &str) -> Option<Self> {
        configured
            .map(|value| Self::new(value, TokenSource::Config))
            .filter(|token| !token.is_empty())
            .or_else(|| Self::from_env(env_var).ok())
            .filter(|token| !token.is_empty())
    }

    /// Expose the token at the point of use. Never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// Where this token came from.
    pub fn source(&self) -> TokenSource {
        self.source
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.expose())
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

impl Clone for ApiToken {
    fn clone(&self) -> Self {
        Self::new(self.expose(), self.source)
    }
}
