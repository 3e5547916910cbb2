use std::collections::BTreeSet;
use std::time::Duration;

use crate::failure::{ECONNABORTED, ERR_NETWORK, ETIMEDOUT};

/// Configures retry behavior for [`retry_with_backoff`](crate::retry_with_backoff).
///
/// Unset fields keep their defaults: 5 retries, 1 s initial delay doubling up
/// to 30 s, retrying on 429/500/502/503/504 and on aborted, network and
/// timed-out transports.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryOptions {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any computed backoff delay.
    pub max_delay: Duration,
    /// Growth factor applied to the delay after every retry.
    pub multiplier: f64,
    /// HTTP status codes that trigger a retry.
    pub retryable_statuses: BTreeSet<u16>,
    /// Transport error codes that trigger a retry.
    pub retryable_errors: BTreeSet<String>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            retryable_statuses: [429, 500, 502, 503, 504].into_iter().collect(),
            retryable_errors: [ECONNABORTED, ERR_NETWORK, ETIMEDOUT]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl RetryOptions {
    /// Options that make exactly one attempt.
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor. Values below 1 or non-finite values become 1.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        self
    }

    pub fn with_retryable_statuses<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_retryable_errors<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_errors = codes.into_iter().map(Into::into).collect();
        self
    }
}

/// Configures HTTP timeout, retry and deduplication behavior of
/// [`ClinicClient`](crate::ClinicClient).
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Retry policy applied to each request.
    pub retry: RetryOptions,
    /// How long a settled read stays shareable with new callers.
    pub dedup_ttl: Duration,
    /// Share in-flight `GET`/`HEAD` requests with identical keys.
    pub deduplicate_reads: bool,
    /// Also retry `POST`/`PATCH`. Only enable when the backend accepts
    /// idempotency keys or the calls are otherwise safe to repeat.
    pub retry_non_idempotent: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            retry: RetryOptions::default(),
            dedup_ttl: Duration::from_millis(1_000),
            deduplicate_reads: true,
            retry_non_idempotent: false,
        }
    }
}
