//! `clinic-http` is the async HTTP plumbing behind the clinic management
//! front end.
//!
//! Two independent utilities do the work:
//! - [`retry_with_backoff`] re-runs a failed operation with compounding
//!   exponential backoff, honoring retry-after hints.
//! - [`RequestDeduplicator`] lets concurrent callers asking for the same
//!   request share one in-flight result.
//!
//! [`ClinicClient`] composes them over `reqwest` for JSON REST calls.

mod client;
mod dedup;
mod error;
mod failure;
mod options;
mod retry;
mod wire;

pub use client::{ClinicClient, BASE_URL_ENV, TOKEN_ENV};
pub use dedup::{generate_request_key, Clock, Deduplicated, RequestDeduplicator, TokioClock};
pub use error::ClinicError;
pub use failure::{
    parse_retry_after, ClassifyFailure, FailureKind, ECONNABORTED, ERR_BAD_RESPONSE, ERR_NETWORK,
    ERR_UNKNOWN, ETIMEDOUT,
};
pub use options::{ClientOptions, RetryOptions};
pub use retry::{retry_with_backoff, Backoff};

pub type Result<T> = std::result::Result<T, ClinicError>;
