use serde::{Serialize, Serializer};
use std::hash::Hash;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::RouteKey;

/// Possible errors when issuing requests through `volley_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Network error while sending the request or reading the response body.
    /// These are retried by the executor before being surfaced.
    #[error("Network error while trying to connect to an endpoint via reqwest")]
    NetworkRequest(#[source] reqwest::Error),

    /// Network error reported by a non-reqwest [`crate::Transport`]
    #[error("Network error for {url}: {reason}")]
    Network {
        /// The URL that could not be reached
        url: String,
        /// Description of the failure
        reason: String,
    },

    /// The route is paused by its circuit breaker. Never retried.
    #[error("Circuit open for {route}, retry in {}ms", .retry_in.as_millis())]
    CircuitOpen {
        /// The paused route
        route: RouteKey,
        /// Remaining pause when the request was rejected
        retry_in: Duration,
    },

    /// The HTTP client could not be built
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// The given string can not be parsed into a valid URL
    #[error("Cannot parse '{0}' as URL: {1}")]
    InvalidUrl(String, #[source] url::ParseError),

    /// An URL without a host was passed to the executor
    #[error("URL is missing a host")]
    InvalidUrlHost,

    /// The given header could not be parsed.
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// The configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The configuration file could not be parsed as TOML
    #[error("Cannot parse configuration file: {0}")]
    ConfigFormat(#[from] toml::de::Error),

    /// Any form of I/O error occurred while reading from a given path.
    #[error("Failed to read from path: `{}`, reason: {}", match .0 {
        Some(p) => p.to_str().unwrap_or("<MALFORMED PATH>"),
        None => "<MALFORMED PATH>",
    }, .1)]
    IoError(Option<PathBuf>, std::io::Error),

    /// The executor was shut down and accepts no new requests
    #[error("Executor is shut down")]
    Shutdown,

    /// A login round failed
    #[error("Login for {domain} failed: {reason}")]
    LoginFailed {
        /// The domain the login was attempted for
        domain: String,
        /// Description of the failure
        reason: String,
    },

    /// The session store rejected an operation.
    /// Returned by [`crate::SessionStore`] implementations backed by external
    /// storage; the login breaker logs it and treats the round as failed.
    #[error("Session store error: {0}")]
    SessionStore(String),
}

impl ErrorKind {
    /// Return the underlying `reqwest::Error`, if any
    #[must_use]
    pub const fn reqwest_error(&self) -> Option<&reqwest::Error> {
        match self {
            Self::NetworkRequest(e) | Self::BuildRequestClient(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this error was raised by the network layer
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::NetworkRequest(_) | Self::Network { .. })
    }

    /// Whether this error was raised by an open circuit breaker
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NetworkRequest(e1), Self::NetworkRequest(e2))
            | (Self::BuildRequestClient(e1), Self::BuildRequestClient(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (
                Self::Network { url: u1, reason: r1 },
                Self::Network { url: u2, reason: r2 },
            ) => u1 == u2 && r1 == r2,
            (Self::CircuitOpen { route: r1, .. }, Self::CircuitOpen { route: r2, .. }) => r1 == r2,
            (Self::InvalidUrl(s1, e1), Self::InvalidUrl(s2, e2)) => s1 == s2 && e1 == e2,
            (Self::IoError(p1, e1), Self::IoError(p2, e2)) => p1 == p2 && e1.kind() == e2.kind(),
            (Self::Config(c1), Self::Config(c2))
            | (Self::SessionStore(c1), Self::SessionStore(c2)) => c1 == c2,
            (Self::ConfigFormat(e1), Self::ConfigFormat(e2)) => e1.to_string() == e2.to_string(),
            (
                Self::LoginFailed { domain: d1, reason: r1 },
                Self::LoginFailed { domain: d2, reason: r2 },
            ) => d1 == d2 && r1 == r2,
            (Self::InvalidHeader(_), Self::InvalidHeader(_))
            | (Self::InvalidUrlHost, Self::InvalidUrlHost)
            | (Self::Shutdown, Self::Shutdown) => true,
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        match self {
            Self::NetworkRequest(e) | Self::BuildRequestClient(e) => e.to_string().hash(state),
            Self::Network { url, reason } => (url, reason).hash(state),
            Self::CircuitOpen { route, .. } => route.hash(state),
            Self::InvalidUrl(s, e) => (s, e.to_string()).hash(state),
            Self::InvalidHeader(e) => e.to_string().hash(state),
            Self::Config(s) | Self::SessionStore(s) => s.hash(state),
            Self::ConfigFormat(e) => e.to_string().hash(state),
            Self::IoError(p, e) => (p, e.kind()).hash(state),
            Self::LoginFailed { domain, reason } => (domain, reason).hash(state),
            Self::InvalidUrlHost | Self::Shutdown => std::mem::discriminant(self).hash(state),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<(PathBuf, std::io::Error)> for ErrorKind {
    fn from(value: (PathBuf, std::io::Error)) -> Self {
        Self::IoError(Some(value.0), value.1)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(None, e)
    }
}

impl From<tokio::task::JoinError> for ErrorKind {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::IoError(None, e.into())
    }
}
