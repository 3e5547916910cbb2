use std::sync::Arc;

use crate::failure::{
    ClassifyFailure, FailureKind, ECONNABORTED, ERR_BAD_RESPONSE, ERR_NETWORK, ERR_UNKNOWN,
    ETIMEDOUT,
};

/// Error type returned by this crate.
///
/// Clone-able so that one failure can be handed to every caller sharing a
/// deduplicated request.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClinicError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error ({code}): {source}")]
    Transport {
        /// Stable classification such as `ETIMEDOUT` or `ERR_NETWORK`.
        code: &'static str,
        source: Arc<reqwest::Error>,
    },
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http {
        status: u16,
        /// `Retry-After` header, or the body's `retryAfter` field.
        retry_after: Option<String>,
        body: String,
    },
    /// Request body could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Base URL and path do not form a valid URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ClinicError {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ETIMEDOUT
        } else if err.is_connect() {
            ERR_NETWORK
        } else if err.is_request() || err.is_body() {
            ECONNABORTED
        } else if err.is_decode() {
            ERR_BAD_RESPONSE
        } else {
            ERR_UNKNOWN
        };
        Self::Transport {
            code,
            source: Arc::new(err),
        }
    }

    /// HTTP status of the failed response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl ClassifyFailure for ClinicError {
    fn classify(&self) -> FailureKind<'_> {
        match self {
            Self::Http {
                status,
                retry_after,
                ..
            } => FailureKind::Http {
                status: *status,
                retry_after: retry_after.as_deref(),
            },
            Self::Transport { code, .. } => FailureKind::Transport { code },
            Self::Encode(_) | Self::Decode(_) | Self::InvalidUrl(_) => FailureKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClinicError;
    use crate::{ClassifyFailure, FailureKind};

    #[test]
    fn http_error_exposes_status_and_hint() {
        let err = ClinicError::Http {
            status: 429,
            retry_after: Some("2".to_owned()),
            body: String::new(),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(
            err.classify(),
            FailureKind::Http {
                status: 429,
                retry_after: Some("2"),
            }
        );
    }

    #[test]
    fn local_errors_are_never_retryable() {
        for err in [
            ClinicError::Decode("bad".to_owned()),
            ClinicError::Encode("bad".to_owned()),
            ClinicError::InvalidUrl("bad".to_owned()),
        ] {
            assert_eq!(err.classify(), FailureKind::Other);
            assert_eq!(err.status(), None);
        }
    }
}
