//! Per-service circuit breaker.
//!
//! When calls to a service fail repeatedly, the circuit opens and subsequent
//! calls are rejected immediately until a cooldown passes.
//!
//! ```text
//! Closed → Open:      failures >= failure_threshold
//! Open → Half-Open:   first admission check after cooldown (one probe)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open:   probe fails (failures are still >= threshold)
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::duration_str;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time after the last failure before a probe is allowed
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Externally visible state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Failing fast
    Open,

    /// One probe request allowed
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open,
    HalfOpen { probe_issued_at: Instant },
}

#[derive(Debug, Clone)]
struct Breaker {
    failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    phase: Phase,
}

impl Breaker {
    fn closed() -> Self {
        Self {
            failures: 0,
            last_failure: None,
            last_failure_at: None,
            phase: Phase::Closed,
        }
    }

    fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Circuit breakers keyed by service name.
///
/// Each service has its own circuit to allow independent recovery. Locks are
/// held only for the synchronous read-modify-write of a single service.
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, Breaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Admission check for one request to `service`.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and
    /// admits exactly this caller as the probe.
    pub fn can_make_request(&self, service: &str) -> bool {
        if matches!(
            self.states.read().get(service).map(|b| b.phase),
            None | Some(Phase::Closed)
        ) {
            return true;
        }

        let mut states = self.states.write();
        let Some(breaker) = states.get_mut(service) else {
            return true;
        };
        let now = Instant::now();

        match breaker.phase {
            Phase::Closed => true,
            Phase::Open => {
                let cooled = breaker
                    .last_failure
                    .map_or(true, |at| now.duration_since(at) >= self.config.cooldown);
                if cooled {
                    breaker.phase = Phase::HalfOpen { probe_issued_at: now };
                    tracing::info!(service, "Circuit half-open, admitting probe request");
                }
                cooled
            }
            Phase::HalfOpen { probe_issued_at } => {
                // A probe that never reported back is replaced after a full cooldown.
                if now.duration_since(probe_issued_at) >= self.config.cooldown {
                    breaker.phase = Phase::HalfOpen { probe_issued_at: now };
                    tracing::info!(service, "Stale probe replaced");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call. Closes the circuit and clears failures.
    pub fn record_success(&self, service: &str) {
        let mut states = self.states.write();
        let Some(breaker) = states.get_mut(service) else {
            return;
        };

        if !matches!(breaker.phase, Phase::Closed) {
            tracing::info!(service, "Circuit closed after successful probe");
        }
        breaker.failures = 0;
        breaker.phase = Phase::Closed;
    }

    /// Record a failed call.
    pub fn record_failure(&self, service: &str) {
        let mut states = self.states.write();
        let breaker = states
            .entry(service.to_string())
            .or_insert_with(Breaker::closed);

        breaker.failures = breaker.failures.saturating_add(1);
        breaker.last_failure = Some(Instant::now());
        breaker.last_failure_at = Some(Utc::now());

        if breaker.failures >= self.config.failure_threshold {
            match breaker.phase {
                Phase::Closed => tracing::warn!(
                    service,
                    failures = breaker.failures,
                    "Circuit opened after repeated failures"
                ),
                Phase::HalfOpen { .. } => {
                    tracing::warn!(service, "Circuit reopened after failed probe")
                }
                Phase::Open => {}
            }
            breaker.phase = Phase::Open;
        }
    }

    /// Current state; unknown services are closed.
    pub fn state(&self, service: &str) -> CircuitState {
        self.states
            .read()
            .get(service)
            .map_or(CircuitState::Closed, Breaker::state)
    }

    /// Failures recorded since the last success.
    pub fn failures(&self, service: &str) -> u32 {
        self.states.read().get(service).map_or(0, |b| b.failures)
    }

    /// Point-in-time view of one service's breaker.
    pub fn snapshot(&self, service: &str) -> BreakerSnapshot {
        let states = self.states.read();
        match states.get(service) {
            Some(breaker) => BreakerSnapshot {
                state: breaker.state(),
                failures: breaker.failures,
                last_failure_at: breaker.last_failure_at,
            },
            None => BreakerSnapshot {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_at: None,
            },
        }
    }

    /// Names of all services with breaker state.
    pub fn services(&self) -> Vec<String> {
        self.states.read().keys().cloned().collect()
    }

    /// Force one circuit back to closed.
    pub fn reset(&self, service: &str) {
        if self.states.write().remove(service).is_some() {
            tracing::info!(service, "Circuit reset");
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVC: &str = "workers-api";

    fn open(cb: &CircuitBreaker) {
        for _ in 0..cb.config().failure_threshold {
            cb.record_failure(SVC);
        }
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(cb.can_make_request(SVC));
        assert_eq!(cb.state(SVC), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_at_threshold() {
        let cb = CircuitBreaker::default();

        for _ in 0..4 {
            cb.record_failure(SVC);
        }
        assert!(cb.can_make_request(SVC));

        cb.record_failure(SVC);
        assert_eq!(cb.state(SVC), CircuitState::Open);
        assert!(!cb.can_make_request(SVC));
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::default();

        for _ in 0..4 {
            cb.record_failure(SVC);
        }
        cb.record_success(SVC);
        assert_eq!(cb.failures(SVC), 0);

        for _ in 0..4 {
            cb.record_failure(SVC);
        }
        assert!(cb.can_make_request(SVC));
    }

    #[test]
    fn test_success_on_clean_breaker_is_noop() {
        let cb = CircuitBreaker::default();
        cb.record_success(SVC);

        assert_eq!(cb.snapshot(SVC), BreakerSnapshot {
            state: CircuitState::Closed,
            failures: 0,
            last_failure_at: None,
        });
        assert!(cb.services().is_empty());
    }

    #[test]
    fn test_services_are_independent() {
        let cb = CircuitBreaker::default();
        open(&cb);

        assert!(!cb.can_make_request(SVC));
        assert!(cb.can_make_request("sleeper-api"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_admits_exactly_one_probe() {
        let cb = CircuitBreaker::default();
        open(&cb);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.can_make_request(SVC));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_make_request(SVC));
        assert_eq!(cb.state(SVC), CircuitState::HalfOpen);
        assert!(!cb.can_make_request(SVC));
        assert!(!cb.can_make_request(SVC));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes() {
        let cb = CircuitBreaker::default();
        open(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.can_make_request(SVC));

        cb.record_success(SVC);

        assert_eq!(cb.state(SVC), CircuitState::Closed);
        assert!(cb.can_make_request(SVC));
        assert!(cb.can_make_request(SVC));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let cb = CircuitBreaker::default();
        open(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.can_make_request(SVC));

        cb.record_failure(SVC);

        assert_eq!(cb.state(SVC), CircuitState::Open);
        assert_eq!(cb.failures(SVC), 6);
        assert!(!cb.can_make_request(SVC));

        // Cooldown restarts from the failed probe.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.can_make_request(SVC));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_is_replaced() {
        let cb = CircuitBreaker::default();
        open(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.can_make_request(SVC));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.can_make_request(SVC));
        assert!(!cb.can_make_request(SVC));
    }

    #[test]
    fn test_reset() {
        let cb = CircuitBreaker::default();
        open(&cb);
        cb.reset(SVC);
        assert!(cb.can_make_request(SVC));
        assert_eq!(cb.failures(SVC), 0);
    }

    #[test]
    fn test_config_roundtrips_human_durations() {
        let config: CircuitBreakerConfig =
            serde_yaml::from_str("failure_threshold: 3\ncooldown: 45s\n").unwrap();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.cooldown, Duration::from_secs(45));

        let defaulted: CircuitBreakerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(defaulted, CircuitBreakerConfig::default());
    }
}
