//! In-flight request de-duplication with cooperative cancellation.
//!
//! Identical requests issued while one is already pending share that single
//! transport call and observe the same outcome. A pending call can be
//! cancelled by key; every sharer then sees [`UpstreamError::Cancelled`].
//!
//! Nothing is cached after a call settles: the next identical request goes
//! to the transport again.
//!
//! # Data Flow
//! ```text
//! dispatch(request)
//!     → RequestKey (method, url, body, sorted headers, cache mode)
//!     → existing entry?  yes: clone its shared future
//!                        no:  spawn one abortable transport call, register it
//! call settles (ok / error / abort / panic)
//!     → Deregister guard removes the entry it created
//! ```

use futures::future::{AbortHandle, Abortable, Aborted, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::transport::{CacheMode, Method, Transport, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Outcome shared by every caller of one de-duplicated request.
pub type FetchResult = Result<Arc<UpstreamResponse>, UpstreamError>;

/// A pending, cloneable handle to a de-duplicated request.
pub type PendingFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Identity of a request for de-duplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: String,
    body: Option<String>,
    headers: BTreeMap<String, String>,
    cache: CacheMode,
}

impl From<&UpstreamRequest> for RequestKey {
    fn from(request: &UpstreamRequest) -> Self {
        Self {
            method: request.method,
            url: request.url.clone(),
            body: request.body.clone(),
            headers: request.headers.clone(),
            cache: request.cache,
        }
    }
}

struct InFlight {
    id: u64,
    pending: PendingFetch,
    abort: AbortHandle,
}

type Registry = Arc<Mutex<HashMap<RequestKey, InFlight>>>;

/// Removes a registration when the call that created it ends, however it ends.
struct Deregister {
    registry: Registry,
    key: RequestKey,
    id: u64,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        // An abort followed by a fresh dispatch may have re-registered the key.
        if registry.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            registry.remove(&self.key);
        }
    }
}

/// De-duplicating front for a [`Transport`].
pub struct RequestCache {
    transport: Arc<dyn Transport>,
    inflight: Registry,
    next_id: AtomicU64,
}

impl RequestCache {
    /// Create a request cache in front of `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register `request` and return a handle to its pending outcome.
    ///
    /// Registration happens before this returns, so two back-to-back calls
    /// with the same key always share one transport call. The call itself
    /// runs on the Tokio runtime and settles even if every handle is dropped.
    pub fn dispatch(&self, request: UpstreamRequest) -> PendingFetch {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return futures::future::ready(Err(UpstreamError::NotConfigured(
                "request cache requires a Tokio runtime".to_string(),
            )))
            .boxed()
            .shared();
        };

        let key = RequestKey::from(&request);
        let mut inflight = self.inflight.lock();

        if let Some(entry) = inflight.get(&key) {
            tracing::debug!(method = %request.method, url = %request.url, "Joining in-flight request");
            return entry.pending.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (abort, registration) = AbortHandle::new_pair();
        let transport = Arc::clone(&self.transport);
        let guard = Deregister {
            registry: Arc::clone(&self.inflight),
            key: key.clone(),
            id,
        };

        let task = runtime.spawn(async move {
            let _guard = guard;
            let call = async { transport.send(&request).await };
            match Abortable::new(call, registration).await {
                Ok(result) => result.map(Arc::new),
                Err(Aborted) => Err(UpstreamError::Cancelled),
            }
        });

        let pending = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => Err(UpstreamError::Internal(format!(
                    "request task failed: {}",
                    join_error
                ))),
            }
        }
        .boxed()
        .shared();

        inflight.insert(
            key,
            InFlight {
                id,
                pending: pending.clone(),
                abort,
            },
        );

        pending
    }

    /// Issue `request`, sharing any identical call already in flight.
    pub async fn fetch(&self, request: UpstreamRequest) -> FetchResult {
        self.dispatch(request).await
    }

    /// Cancel the pending call matching `request`.
    ///
    /// Returns `false` when nothing matching is in flight. The registration
    /// is removed immediately, so the next identical request starts fresh.
    pub fn abort(&self, request: &UpstreamRequest) -> bool {
        let key = RequestKey::from(request);
        let removed = self.inflight.lock().remove(&key);

        match removed {
            Some(entry) => {
                entry.abort.abort();
                tracing::debug!(method = %request.method, url = %request.url, "Aborted in-flight request");
                true
            }
            None => false,
        }
    }

    /// Number of distinct requests currently pending.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}
