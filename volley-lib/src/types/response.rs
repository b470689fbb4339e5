use std::borrow::Cow;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, StatusCode};
use url::Url;

use crate::{ErrorKind, Result};

/// Number of body bytes handed to passive observers such as the WAF detector
pub const BODY_SAMPLE_LEN: usize = 4096;

/// A fully received HTTP response.
///
/// Unlike [`reqwest::Response`] this is plain data, so it can be cached and
/// shared between callers behind an [`Arc`]. Any status code is a valid
/// response, including 4xx and 5xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    elapsed: Duration,
}

impl Response {
    /// Create a response from its parts
    #[must_use]
    pub const fn new(
        url: Url,
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
        elapsed: Duration,
    ) -> Self {
        Self {
            url,
            status,
            headers,
            body,
            elapsed,
        }
    }

    /// Read a `reqwest` response to completion
    pub(crate) async fn from_reqwest(
        response: reqwest::Response,
        started: tokio::time::Instant,
    ) -> Result<Self> {
        let url = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(ErrorKind::NetworkRequest)?
            .to_vec();

        Ok(Self {
            url,
            status,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }

    /// The final URL of the response
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// The HTTP status code
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// All response headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the headers
    pub const fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Value of a single header, if present and valid UTF-8
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw response body
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Response body decoded lossily as UTF-8
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// The first [`BODY_SAMPLE_LEN`] bytes of the body
    #[must_use]
    pub fn body_sample(&self) -> &[u8] {
        &self.body[..self.body.len().min(BODY_SAMPLE_LEN)]
    }

    /// Body size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Time between sending the request and receiving the full body
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// `Retry-After` header value, if the server sent one we understand
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(http::header::RETRY_AFTER)
            .and_then(|value| crate::ratelimit::parse_retry_after(value).ok())
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({} bytes, {}ms)",
            self.status.as_u16(),
            self.url,
            self.body.len(),
            self.elapsed.as_millis()
        )
    }
}

/// Which cache layer answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheLayer {
    /// The full-URL TTL cache
    Ttl,
    /// The path-level deduplication cache
    Dedup,
}

/// Result of [`crate::RequestExecutor::request`]
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The request went over the network
    Fetched(Arc<Response>),
    /// The request was answered from a cache layer without network contact
    Cached(Arc<Response>, CacheLayer),
    /// An identical probe already ran; nothing was executed or returned
    Skipped,
}

impl Outcome {
    /// The response, unless the request was skipped
    #[must_use]
    pub const fn response(&self) -> Option<&Arc<Response>> {
        match self {
            Self::Fetched(r) | Self::Cached(r, _) => Some(r),
            Self::Skipped => None,
        }
    }

    /// Consume the outcome and return the response, unless skipped
    #[must_use]
    pub fn into_response(self) -> Option<Arc<Response>> {
        match self {
            Self::Fetched(r) | Self::Cached(r, _) => Some(r),
            Self::Skipped => None,
        }
    }

    /// Whether the request was answered from a cache
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(..))
    }

    /// Whether the request was skipped as a duplicate probe
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}
