use std::io;
use std::time::Duration;

use crate::ErrorKind;

/// An extension trait to help determine if a failed attempt is worth
/// repeating.
///
/// Modified from `Retryable` in [reqwest-middleware].
///
/// [reqwest-middleware]: https://github.com/TrueLayer/reqwest-middleware/blob/f854725791ccf4a02c401a26cab3d9db753f468c/reqwest-retry/src/retryable.rs
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for reqwest::Error {
    #[allow(clippy::if_same_then_else)]
    fn should_retry(&self) -> bool {
        if self.is_timeout() || self.is_connect() {
            true
        } else if self.is_decode() || self.is_builder() || self.is_redirect() {
            false
        } else if self.is_body() || self.is_request() {
            // A connection cut halfway through the response surfaces as an
            // I/O error somewhere down the source chain
            get_source_error_type::<io::Error>(self).is_none_or(should_retry_io)
        } else {
            false
        }
    }
}

impl RetryExt for ErrorKind {
    fn should_retry(&self) -> bool {
        match self {
            Self::NetworkRequest(e) => e.should_retry(),
            Self::Network { .. } => true,
            _ => false,
        }
    }
}

/// Classifies an `io::Error` into retryable or not.
fn should_retry_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
    )
}

/// Downcasts the given err source into T.
fn get_source_error_type<T: std::error::Error + 'static>(
    err: &dyn std::error::Error,
) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(inner) = err.downcast_ref::<T>() {
            return Some(inner);
        }

        source = err.source();
    }
    None
}

/// Pause before the attempt following attempt number `attempt` (zero based):
/// `min(cap, base * 2^attempt)`
#[must_use]
pub(crate) fn retry_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    base.checked_mul(2u32.saturating_pow(attempt))
        .map_or(cap, |delay| delay.min(cap))
}
