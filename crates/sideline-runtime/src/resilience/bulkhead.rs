//! Per-service concurrency caps.
//!
//! A bulkhead admits a request only while fewer than `max_concurrent` calls
//! to the same service are in flight. Admission hands out a
//! [`BulkheadPermit`]; dropping the permit releases the slot, so every
//! acquire is paired with exactly one release on every exit path.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Slot accounting for one service.
#[derive(Debug)]
struct Compartment {
    active: AtomicUsize,
    max: usize,
}

impl Compartment {
    fn try_acquire(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max).then_some(active + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        // Saturating: a release can never drive the count below zero.
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                Some(active.saturating_sub(1))
            });
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof of admission. Releases its slot on drop.
#[derive(Debug)]
#[must_use = "dropping the permit immediately releases the slot"]
pub struct BulkheadPermit {
    compartment: Arc<Compartment>,
    service: String,
}

impl BulkheadPermit {
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.compartment.release();
    }
}

/// Bulkheads keyed by service name, all sharing one capacity.
pub struct Bulkhead {
    compartments: Mutex<HashMap<String, Arc<Compartment>>>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a bulkhead admitting `max_concurrent` calls per service.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            compartments: Mutex::new(HashMap::new()),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn compartment(&self, service: &str) -> Arc<Compartment> {
        let mut compartments = self.compartments.lock();
        Arc::clone(
            compartments
                .entry(service.to_string())
                .or_insert_with(|| {
                    Arc::new(Compartment {
                        active: AtomicUsize::new(0),
                        max: self.max_concurrent,
                    })
                }),
        )
    }

    /// Admit one call to `service`, or `None` when the service is at capacity.
    pub fn try_acquire(&self, service: &str) -> Option<BulkheadPermit> {
        let compartment = self.compartment(service);
        if compartment.try_acquire() {
            Some(BulkheadPermit {
                compartment,
                service: service.to_string(),
            })
        } else {
            tracing::debug!(
                service,
                active = compartment.active(),
                max = compartment.max,
                "Bulkhead rejected request"
            );
            None
        }
    }

    /// Calls currently in flight for `service`.
    pub fn active(&self, service: &str) -> usize {
        self.compartments
            .lock()
            .get(service)
            .map_or(0, |c| c.active())
    }

    /// Names of all services that have requested a slot.
    pub fn services(&self) -> Vec<String> {
        self.compartments.lock().keys().cloned().collect()
    }
}

impl Default for Bulkhead {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_admits_up_to_capacity() {
        let bulkhead = Bulkhead::new(2);

        let a = bulkhead.try_acquire("svc").unwrap();
        let _b = bulkhead.try_acquire("svc").unwrap();
        assert!(bulkhead.try_acquire("svc").is_none());
        assert_eq!(bulkhead.active("svc"), 2);

        drop(a);
        assert_eq!(bulkhead.active("svc"), 1);
        assert!(bulkhead.try_acquire("svc").is_some());
    }

    #[test]
    fn test_services_have_separate_compartments() {
        let bulkhead = Bulkhead::new(1);

        let _a = bulkhead.try_acquire("projections").unwrap();
        assert!(bulkhead.try_acquire("projections").is_none());
        assert!(bulkhead.try_acquire("leagues").is_some());
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let compartment = Compartment {
            active: AtomicUsize::new(0),
            max: 1,
        };
        compartment.release();
        assert_eq!(compartment.active(), 0);
    }

    #[test]
    fn test_permit_released_on_panic_unwind() {
        let bulkhead = Bulkhead::new(1);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = bulkhead.try_acquire("svc").unwrap();
            panic!("handler blew up");
        }));

        assert!(result.is_err());
        assert_eq!(bulkhead.active("svc"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_never_exceeds_capacity() {
        let bulkhead = Arc::new(Bulkhead::new(3));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let bulkhead = Arc::clone(&bulkhead);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                if let Some(_permit) = bulkhead.try_acquire("svc") {
                    peak.fetch_max(bulkhead.active("svc"), Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(bulkhead.active("svc"), 0);
    }

    proptest! {
        #[test]
        fn prop_active_stays_in_bounds(
            max in 1usize..6,
            ops in prop::collection::vec(any::<bool>(), 0..64),
        ) {
            let bulkhead = Bulkhead::new(max);
            let mut held = Vec::new();

            for acquire in ops {
                if acquire {
                    if let Some(permit) = bulkhead.try_acquire("svc") {
                        held.push(permit);
                    } else {
                        prop_assert_eq!(held.len(), max);
                    }
                } else {
                    held.pop();
                }
                let active = bulkhead.active("svc");
                prop_assert!(active <= max);
                prop_assert_eq!(active, held.len());
            }
        }
    }
}
