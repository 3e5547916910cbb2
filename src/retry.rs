use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::{ClassifyFailure, FailureKind, RetryOptions};

/// Compounding exponential delay sequence.
///
/// Yields `initial_delay` first, then multiplies the previous delay by
/// `multiplier`, capping at `max_delay`.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(options: &RetryOptions) -> Self {
        Self {
            next: options.initial_delay.min(options.max_delay),
            max: options.max_delay,
            multiplier: options.multiplier.max(1.0),
        }
    }

    /// Returns the current delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        let grown = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.next = grown.min(self.max);
        current
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

fn is_retryable(kind: &FailureKind<'_>, options: &RetryOptions, attempt: u32) -> bool {
    match kind {
        FailureKind::Http { status, .. } => {
            options.retryable_statuses.contains(status)
                || (*status == 429 && attempt < options.max_retries)
        }
        FailureKind::Transport { code } => options.retryable_errors.contains(*code),
        FailureKind::Other => false,
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget in `options` is spent.
///
/// The error returned is always the last one produced by `operation`.
/// A numeric retry-after hint on the failure replaces the computed backoff
/// for that wait; the backoff still advances.
///
/// `operation` may run several times, so it must be safe to repeat.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ClassifyFailure,
{
    let mut backoff = Backoff::new(options);
    let mut attempt = 0u32;

    loop {
        let wait = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let kind = err.classify();
                if !is_retryable(&kind, options, attempt) {
                    return Err(err);
                }
                if attempt >= options.max_retries {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        attempts = attempt + 1,
                        status = kind.status(),
                        code = kind.code(),
                        "retry budget exhausted"
                    );
                    return Err(err);
                }

                let computed = backoff.next_delay();
                let wait = kind.retry_after().unwrap_or(computed);

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt = attempt + 1,
                    max_retries = options.max_retries,
                    wait_ms = wait.as_millis() as u64,
                    status = kind.status(),
                    code = kind.code(),
                    "retrying after transient failure"
                );

                wait
            }
        };

        sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{retry_with_backoff, Backoff};
    use crate::{ClassifyFailure, FailureKind, RetryOptions};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Status {
            status: u16,
            retry_after: Option<String>,
            call: usize,
        },
        Transport(&'static str),
        Fatal,
    }

    impl TestError {
        fn status(status: u16, call: usize) -> Self {
            Self::Status {
                status,
                retry_after: None,
                call,
            }
        }
    }

    impl ClassifyFailure for TestError {
        fn classify(&self) -> FailureKind<'_> {
            match self {
                Self::Status {
                    status,
                    retry_after,
                    ..
                } => FailureKind::Http {
                    status: *status,
                    retry_after: retry_after.as_deref(),
                },
                Self::Transport(code) => FailureKind::Transport { code },
                Self::Fatal => FailureKind::Other,
            }
        }
    }

    fn millis(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    fn gaps(times: &[Instant]) -> Vec<Duration> {
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn backoff_compounds_and_caps_at_max_delay() {
        let delays: Vec<_> = Backoff::new(&RetryOptions::default()).take(8).collect();
        assert_eq!(
            delays,
            millis(&[1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000])
        );
    }

    #[test]
    fn backoff_with_huge_multiplier_saturates_at_max() {
        let opts = RetryOptions::default()
            .with_multiplier(1e300)
            .with_max_delay(Duration::from_secs(5));
        let delays: Vec<_> = Backoff::new(&opts).take(3).collect();
        assert_eq!(delays, millis(&[1_000, 5_000, 5_000]));
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_without_delay() {
        let start = Instant::now();
        let result: Result<u32, TestError> =
            retry_with_backoff(|| async { Ok(7) }, &RetryOptions::default()).await;

        assert_eq!(result, Ok(7));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_allows_initial_attempt_plus_retries() {
        let calls = AtomicUsize::new(0);
        let opts = RetryOptions::default().with_max_retries(2);

        let result: Result<(), TestError> = retry_with_backoff(
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::status(503, call)) }
            },
            &opts,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(TestError::status(503, 3)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<(), TestError> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transport("ETIMEDOUT")) }
            },
            &RetryOptions::none(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result, Err(TestError::Transport("ETIMEDOUT")));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failures_short_circuit() {
        for failure in [
            TestError::status(404, 1),
            TestError::Transport("ERR_BAD_RESPONSE"),
            TestError::Fatal,
        ] {
            let calls = AtomicUsize::new(0);
            let start = Instant::now();
            let mut failure = Some(failure);

            let result: Result<(), TestError> = retry_with_backoff(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let err = failure.take().expect("operation must run once");
                    async move { Err(err) }
                },
                &RetryOptions::default(),
            )
            .await;

            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(start.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_codes_then_succeeds() {
        let calls = AtomicUsize::new(0);

        let result: Result<&str, TestError> = retry_with_backoff(
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match call {
                        0 => Err(TestError::Transport("ERR_NETWORK")),
                        1 => Err(TestError::Transport("ECONNABORTED")),
                        _ => Ok("done"),
                    }
                }
            },
            &RetryOptions::default(),
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_follow_backoff_sequence() {
        let seen = Mutex::new(Vec::new());
        let opts = RetryOptions::default().with_max_retries(7);

        let _: Result<(), TestError> = retry_with_backoff(
            || {
                seen.lock().expect("mutex must not be poisoned").push(Instant::now());
                async { Err(TestError::status(500, 0)) }
            },
            &opts,
        )
        .await;

        let seen = seen.into_inner().expect("mutex must not be poisoned");
        assert_eq!(
            gaps(&seen),
            millis(&[1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_overrides_backoff() {
        let seen = Mutex::new(Vec::new());
        let opts = RetryOptions::default().with_max_retries(2);

        let result: Result<(), TestError> = retry_with_backoff(
            || {
                let mut seen = seen.lock().expect("mutex must not be poisoned");
                seen.push(Instant::now());
                let retry_after = (seen.len() == 1).then(|| "3".to_owned());
                async move {
                    Err(TestError::Status {
                        status: 429,
                        retry_after,
                        call: 0,
                    })
                }
            },
            &opts,
        )
        .await;

        assert!(result.is_err());
        let seen = seen.into_inner().expect("mutex must not be poisoned");
        // The hint does not reset the progression: the second wait is the
        // second backoff step.
        assert_eq!(gaps(&seen), millis(&[3_000, 2_000]));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_after_retries_immediately() {
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<u8, TestError> = retry_with_backoff(
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(TestError::Status {
                            status: 503,
                            retry_after: Some("0".to_owned()),
                            call,
                        })
                    } else {
                        Ok(1)
                    }
                }
            },
            &RetryOptions::default(),
        )
        .await;

        assert_eq!(result, Ok(1));
        assert!(start.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_retry_after_falls_back_to_backoff() {
        let seen = Mutex::new(Vec::new());
        let opts = RetryOptions::default().with_max_retries(1);

        let _: Result<(), TestError> = retry_with_backoff(
            || {
                seen.lock().expect("mutex must not be poisoned").push(Instant::now());
                async {
                    Err(TestError::Status {
                        status: 503,
                        retry_after: Some("later".to_owned()),
                        call: 0,
                    })
                }
            },
            &opts,
        )
        .await;

        let seen = seen.into_inner().expect("mutex must not be poisoned");
        assert_eq!(gaps(&seen), millis(&[1_000]));
    }

    #[tokio::test(start_paused = true)]
    async fn too_many_requests_is_retried_even_when_not_configured() {
        let calls = AtomicUsize::new(0);
        let opts = RetryOptions::default()
            .with_max_retries(1)
            .with_retryable_statuses([503]);

        let result: Result<(), TestError> = retry_with_backoff(
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::status(429, call)) }
            },
            &opts,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result, Err(TestError::status(429, 2)));
    }
}
