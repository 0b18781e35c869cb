//! Retry with exponential backoff for a single upstream call.
//!
//! Only transient outcomes are retried: responses with status >= 500,
//! network errors and per-attempt timeouts. Anything below 500 ends the loop,
//! including 4xx.

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_str;
use crate::transport::{Transport, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Retry and timeout policy for upstream calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,

    /// Delay before the first retry; doubles on every subsequent retry
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,

    /// Upper bound for a single backoff delay
    #[serde(with = "duration_str")]
    pub max_delay: Duration,

    /// Add random jitter to each delay
    pub jitter: bool,

    /// Deadline for each individual attempt
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: true,
            timeout: Duration::from_millis(2500),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.retry_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.retries as usize);

        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Outcome of one attempt that did not end the loop on its own.
#[derive(Debug)]
enum AttemptFailure {
    ServerError(UpstreamResponse),
    Failed(UpstreamError),
}

impl AttemptFailure {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptFailure::ServerError(_) => true,
            AttemptFailure::Failed(e) => e.is_retryable(),
        }
    }
}

/// Send `request` through `transport`, retrying transient failures.
///
/// A 4xx is returned as a non-ok response. When retries run out on a 5xx,
/// the last one is surfaced as [`UpstreamError::Status`]; when they run out
/// on an error, that error is returned.
pub async fn send_with_retry(
    transport: &dyn Transport,
    request: &UpstreamRequest,
    policy: &RetryPolicy,
) -> Result<UpstreamResponse, UpstreamError> {
    let timeout = policy.timeout;

    let attempt = move || async move {
        match tokio::time::timeout(timeout, transport.send(request)).await {
            Err(_) => Err(AttemptFailure::Failed(UpstreamError::Timeout(timeout))),
            Ok(Err(error)) => Err(AttemptFailure::Failed(error)),
            Ok(Ok(response)) if response.is_server_error() => {
                Err(AttemptFailure::ServerError(response))
            }
            Ok(Ok(response)) => Ok(response),
        }
    };

    let outcome = attempt
        .retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .when(AttemptFailure::is_retryable)
        .notify(|failure: &AttemptFailure, delay: Duration| match failure {
            AttemptFailure::ServerError(response) => tracing::debug!(
                url = %request.url,
                status = response.status,
                ?delay,
                "Retrying after server error"
            ),
            AttemptFailure::Failed(error) => tracing::debug!(
                url = %request.url,
                %error,
                ?delay,
                "Retrying after transport failure"
            ),
        })
        .await;

    match outcome {
        Ok(response) => Ok(response),
        Err(AttemptFailure::ServerError(response)) => Err(UpstreamError::Status {
            status: response.status,
            body: response.body,
        }),
        Err(AttemptFailure::Failed(error)) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok, status, ScriptedTransport, Step};

    fn request() -> UpstreamRequest {
        UpstreamRequest::get("http://workers.test/projections")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let transport = ScriptedTransport::new(vec![Step::Respond(ok("{}"))]);

        let response = send_with_retry(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond(status(503)),
            Step::Respond(status(502)),
            Step::Respond(ok("done")),
        ]);

        let response = send_with_retry(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(response.body, "done");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_server_errors_surface_as_error() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond(status(500)),
            Step::Respond(status(502)),
            Step::Respond(status(503)),
            Step::Respond(ok("never reached")),
        ]);

        let error = send_with_retry(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert_eq!(
            error,
            UpstreamError::Status {
                status: 503,
                body: "status 503".to_string(),
            }
        );
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_not_retried() {
        let transport = ScriptedTransport::new(vec![Step::Respond(status(404)), Step::Respond(ok(""))]);

        let response = send_with_retry(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_retried_then_surfaced() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(UpstreamError::Network("reset".into())),
            Step::Fail(UpstreamError::Network("reset".into())),
            Step::Fail(UpstreamError::Network("refused".into())),
        ]);

        let error = send_with_retry(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert_eq!(error, UpstreamError::Network("refused".into()));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(UpstreamError::Decode("bad body".into())),
            Step::Respond(ok("")),
        ]);

        let error = send_with_retry(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(error, UpstreamError::Decode(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let transport = ScriptedTransport::new(vec![Step::Hang, Step::Respond(ok("late but fine"))]);

        let started = tokio::time::Instant::now();
        let response = send_with_retry(&transport, &request(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(response.body, "late but fine");
        assert!(started.elapsed() >= Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_when_exhausted() {
        let transport = ScriptedTransport::new(vec![Step::Hang]);
        let policy = RetryPolicy::no_retry();

        let error = send_with_retry(&transport, &request(), &policy)
            .await
            .unwrap_err();

        assert_eq!(error, UpstreamError::Timeout(Duration::from_millis(2500)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_backoff_stays_within_one_delay() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond(status(500)),
            Step::Respond(status(500)),
            Step::Respond(ok("")),
        ]);
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };

        send_with_retry(&transport, &request(), &policy).await.unwrap();

        // Jitter adds up to one more of the current delay.
        let gaps = transport.gaps();
        assert_eq!(gaps.len(), 2);
        assert!(gaps[0] >= Duration::from_millis(250), "first delay {:?}", gaps[0]);
        assert!(gaps[0] < Duration::from_millis(500), "first delay {:?}", gaps[0]);
        assert!(gaps[1] >= Duration::from_millis(500), "second delay {:?}", gaps[1]);
        assert!(gaps[1] < Duration::from_millis(1000), "second delay {:?}", gaps[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_exponentially() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond(status(500)),
            Step::Respond(status(500)),
            Step::Respond(ok("")),
        ]);
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };

        let started = tokio::time::Instant::now();
        send_with_retry(&transport, &request(), &policy).await.unwrap();

        // 250ms then 500ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(750), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(800), "elapsed {:?}", elapsed);
    }
}
