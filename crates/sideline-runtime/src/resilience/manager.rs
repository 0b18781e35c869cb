//! Guarded execution of upstream calls.
//!
//! The manager owns one [`CircuitBreaker`] and one [`Bulkhead`] and wraps
//! every call in both:
//!
//! ```text
//! execute(service, request)
//!     → bulkhead permit     (fail fast: BulkheadFull)
//!     → breaker admission   (fail fast: CircuitOpen)
//!     → send_with_retry     (timeout per attempt, backoff between attempts)
//!     → record outcome      (success only for a final 2xx)
//!     → permit dropped
//! ```
//!
//! The permit is taken before the breaker check so a half-open probe is never
//! admitted and then starved by a full bulkhead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::bulkhead::{Bulkhead, BulkheadPermit};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::retry::{send_with_retry, RetryPolicy};
use crate::config::duration_str;
use crate::transport::{Transport, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Limits applied to every service the manager guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Time after the last failure before a probe is allowed
    #[serde(with = "duration_str")]
    pub cooldown: Duration,

    /// Concurrent in-flight calls per service
    pub max_concurrent: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_concurrent: 20,
        }
    }
}

impl ResilienceConfig {
    fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: self.cooldown,
        }
    }
}

/// Health of one guarded service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub active: usize,
    pub max: usize,
}

/// Circuit breaker plus bulkhead for named upstream services.
///
/// Constructed once and shared (usually behind an `Arc`) by every caller.
pub struct ResilienceManager {
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
}

impl ResilienceManager {
    /// Create a manager with one breaker and one bulkhead.
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(config.breaker()),
            bulkhead: Bulkhead::new(config.max_concurrent),
        }
    }

    /// Breaker admission check. See [`CircuitBreaker::can_make_request`].
    pub fn can_make_request(&self, service: &str) -> bool {
        self.breaker.can_make_request(service)
    }

    pub fn record_success(&self, service: &str) {
        self.breaker.record_success(service);
    }

    pub fn record_failure(&self, service: &str) {
        self.breaker.record_failure(service);
    }

    /// Current breaker state for `service`.
    pub fn breaker_state(&self, service: &str) -> CircuitState {
        self.breaker.state(service)
    }

    /// Reserve a concurrency slot for `service`; released when the permit drops.
    pub fn acquire_bulkhead(&self, service: &str) -> Result<BulkheadPermit, UpstreamError> {
        self.bulkhead
            .try_acquire(service)
            .ok_or_else(|| UpstreamError::BulkheadFull {
                service: service.to_string(),
                max: self.bulkhead.max_concurrent(),
            })
    }

    /// Calls currently holding a bulkhead permit for `service`.
    pub fn in_flight(&self, service: &str) -> usize {
        self.bulkhead.active(service)
    }

    /// Operator reset of one service's circuit.
    pub fn reset(&self, service: &str) {
        self.breaker.reset(service);
    }

    /// Run `request` against `transport` under the breaker, bulkhead and
    /// retry policy for `service`.
    ///
    /// A final 4xx is returned as `Ok`; an exhausted 5xx comes back as
    /// [`UpstreamError::Status`]. Both count as breaker failures.
    pub async fn execute(
        &self,
        service: &str,
        transport: &dyn Transport,
        request: &UpstreamRequest,
        policy: &RetryPolicy,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let _permit = self.acquire_bulkhead(service)?;

        if !self.breaker.can_make_request(service) {
            tracing::debug!(service, url = %request.url, "Circuit open, failing fast");
            return Err(UpstreamError::CircuitOpen {
                service: service.to_string(),
            });
        }

        let outcome = send_with_retry(transport, request, policy).await;

        match &outcome {
            Ok(response) if response.is_ok() => self.breaker.record_success(service),
            Ok(response) => {
                tracing::debug!(service, status = response.status, "Upstream returned non-ok status");
                self.breaker.record_failure(service);
            }
            Err(error) => {
                tracing::debug!(service, %error, "Upstream call failed");
                self.breaker.record_failure(service);
            }
        }

        outcome
    }

    /// Per-service health, sorted by service name.
    pub fn snapshot(&self) -> Vec<ServiceHealth> {
        let mut services = self.breaker.services();
        services.extend(self.bulkhead.services());
        services.sort();
        services.dedup();

        services
            .into_iter()
            .map(|service| {
                let breaker = self.breaker.snapshot(&service);
                ServiceHealth {
                    state: breaker.state,
                    failures: breaker.failures,
                    last_failure_at: breaker.last_failure_at,
                    active: self.bulkhead.active(&service),
                    max: self.bulkhead.max_concurrent(),
                    service,
                }
            })
            .collect()
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}
