//! Resilience patterns for upstream calls.
//!
//! This module provides:
//! - Circuit breaker to stop calling a failing service for a cooldown
//! - Bulkhead to cap concurrent calls per service
//! - Retry with exponential backoff and per-attempt timeouts
//! - [`ResilienceManager`] combining all three

mod bulkhead;
mod circuit_breaker;
mod manager;
mod retry;

pub use bulkhead::{Bulkhead, BulkheadPermit};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use manager::{ResilienceConfig, ResilienceManager, ServiceHealth};
pub use retry::{send_with_retry, RetryPolicy};
