//! Retry policies for the calls that make up an upload.
//!
//! The gateway calls (signed URL requests and finalize) and the direct-to-storage part uploads
//! have different notions of which failures are transient and how long to wait before trying
//! again, so each is described by its own [`RetryPolicy`] value in the [`crate::Config`].
use crate::transport::{loggable_url, HttpRequest, HttpResponse, HttpTransport};
use crate::Result;
use http::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Which HTTP status codes are considered transient and thus worth retrying
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetryableStatus {
    /// Only `429 Too Many Requests` and `500 Internal Server Error`.
    ///
    /// This is how the storage gateway endpoints report transient failures.
    RateLimitedOrInternalError,

    /// Any informational (1xx) status, `429 Too Many Requests`, or any server error (5xx).
    ///
    /// Used for PUTs to signed storage URLs.
    InformationalRateLimitedOrServerError,
}

impl RetryableStatus {
    pub fn is_retryable(&self, status: StatusCode) -> bool {
        match self {
            Self::RateLimitedOrInternalError => {
                status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::InformationalRateLimitedOrServerError => {
                status.is_informational()
                    || status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
            }
        }
    }
}

/// A bounded retry policy.
///
/// A request is attempted at most `max_attempts` times.  Before retry number `n` (starting from
/// 0) the policy waits `delays[n]`; if there are more retries than delays, the last delay is
/// repeated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
    pub retryable: RetryableStatus,
}

impl RetryPolicy {
    /// The policy the storage gateway calls use: 3 attempts, 1 minute apart, retrying only
    /// `429` and `500`.
    pub fn storage_gateway() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![Duration::from_secs(60)],
            retryable: RetryableStatus::RateLimitedOrInternalError,
        }
    }

    /// The policy signed URL part uploads use: the initial attempt plus one retry after each of
    /// 1, 3 and 10 seconds.
    pub fn signed_url_put() -> Self {
        Self {
            max_attempts: 4,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(10),
            ],
            retryable: RetryableStatus::InformationalRateLimitedOrServerError,
        }
    }

    /// How long to wait before the retry with the given zero-based index
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        self.delays
            .get(retry as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        snafu::ensure!(
            self.max_attempts > 0,
            crate::error::InvalidConfigSnafu {
                message: format!("the {name} retry policy must allow at least one attempt"),
            }
        );

        Ok(())
    }

    /// Send `request` with `transport`, retrying transient failures according to this policy.
    ///
    /// Transport-level failures (the request never produced an HTTP status) are not retried and
    /// are returned as errors immediately.  Otherwise the result reports either the successful
    /// response or the last unsuccessful one, along with how many attempts were made.
    pub(crate) async fn send(
        &self,
        transport: &dyn HttpTransport,
        request: HttpRequest,
    ) -> Result<RetryOutcome> {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let response = transport.send(request.clone()).await?;
            let status = response.status;

            if status.is_success() {
                return Ok(RetryOutcome::Success { response, attempts });
            }

            if attempts >= self.max_attempts || !self.retryable.is_retryable(status) {
                debug!(%status, attempts, url = %loggable_url(&request.url), "Request failed; not retrying");

                return Ok(RetryOutcome::Failed {
                    status,
                    body: response.body_text(),
                    attempts,
                });
            }

            let delay = self.delay_before_retry(attempts - 1);
            warn!(
                %status,
                attempts,
                max_attempts = self.max_attempts,
                delay_secs = delay.as_secs_f32(),
                url = %loggable_url(&request.url),
                "Transient failure; backing off before retrying"
            );

            tokio::time::sleep(delay).await;
        }
    }
}

/// The final outcome of a request sent with [`RetryPolicy::send`]
#[derive(Debug)]
pub(crate) enum RetryOutcome {
    Success {
        response: HttpResponse,
        attempts: u32,
    },
    Failed {
        status: StatusCode,
        body: String,
        attempts: u32,
    },
}
