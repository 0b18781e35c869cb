//! In-process transports for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::transport::{Transport, UpstreamError, UpstreamRequest, UpstreamResponse};

pub(crate) fn ok(body: &str) -> UpstreamResponse {
    UpstreamResponse::new(200, BTreeMap::new(), body)
}

pub(crate) fn status(code: u16) -> UpstreamResponse {
    UpstreamResponse::new(code, BTreeMap::new(), format!("status {}", code))
}

/// One scripted reaction to a `send`.
#[derive(Clone)]
pub(crate) enum Step {
    Respond(UpstreamResponse),
    Fail(UpstreamError),
    /// Never completes.
    Hang,
    /// Completes with the response once the gate is notified.
    Gated(Arc<Notify>, UpstreamResponse),
}

/// Plays back a fixed script of outcomes, one per call.
pub(crate) struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    calls: AtomicUsize,
    seen: Mutex<Vec<UpstreamRequest>>,
    stamps: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            stamps: Mutex::new(Vec::new()),
        }
    }

    /// Every call gets the same step.
    pub(crate) fn always(step: Step) -> Self {
        Self {
            fallback: Some(step),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<UpstreamRequest> {
        self.seen.lock().clone()
    }

    /// Gaps between consecutive calls.
    pub(crate) fn gaps(&self) -> Vec<std::time::Duration> {
        self.stamps
            .lock()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        self.stamps.lock().push(Instant::now());

        let step = self
            .steps
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .expect("transport script exhausted");

        match step {
            Step::Respond(response) => Ok(response),
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
            Step::Gated(gate, response) => {
                gate.notified().await;
                Ok(response)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
