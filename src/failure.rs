//! Classification of failed attempts into the shapes the retry loop acts on.

use std::time::Duration;

/// Request aborted mid-flight (connection reset, body interrupted).
pub const ECONNABORTED: &str = "ECONNABORTED";
/// Connection could not be established.
pub const ERR_NETWORK: &str = "ERR_NETWORK";
/// Request exceeded its timeout.
pub const ETIMEDOUT: &str = "ETIMEDOUT";
/// Response arrived but could not be read as expected.
pub const ERR_BAD_RESPONSE: &str = "ERR_BAD_RESPONSE";
/// Transport failure that fits none of the other codes.
pub const ERR_UNKNOWN: &str = "ERR_UNKNOWN";

/// What a failed attempt looked like on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind<'a> {
    /// The server answered with a non-success status.
    Http {
        status: u16,
        /// Raw `Retry-After` hint in seconds, from a header or the error body.
        retry_after: Option<&'a str>,
    },
    /// No usable response was received.
    Transport { code: &'a str },
    /// Anything else. Never retried.
    Other,
}

/// Implemented by error types that [`retry_with_backoff`](crate::retry_with_backoff)
/// can inspect.
pub trait ClassifyFailure {
    fn classify(&self) -> FailureKind<'_>;
}

impl FailureKind<'_> {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Transport { code } => Some(*code),
            _ => None,
        }
    }

    /// Parsed retry-after delay, if the hint is present and numeric.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http {
                retry_after: Some(hint),
                ..
            } => parse_retry_after(hint),
            _ => None,
        }
    }
}

/// Parses a retry-after hint given in seconds.
///
/// HTTP-date forms and negative or non-numeric values yield `None`.
pub fn parse_retry_after(hint: &str) -> Option<Duration> {
    let hint = hint.trim();
    if let Ok(seconds) = hint.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let seconds = hint.parse::<f64>().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}
