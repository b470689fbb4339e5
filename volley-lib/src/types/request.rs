use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::{ErrorKind, Result};

/// Identity used when the caller does not name one
pub const DEFAULT_IDENTITY: &str = "anonymous";

/// A single probe handed to the [`crate::RequestExecutor`]
///
/// `identity` names the credential/header set the probe runs under. It bounds
/// per-identity concurrency and is part of the probe fingerprint. `context` is
/// an opaque tag that only widens or narrows fingerprint granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// HTTP method, e.g. `GET` or `POST`
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Extra headers sent with this request only
    pub headers: HeaderMap,
    /// Request body
    pub body: Option<Vec<u8>>,
    /// Opaque fingerprint context
    pub context: String,
    /// Identity tag
    pub identity: String,
}

impl ProbeRequest {
    /// Create a request from a parsed URL
    #[must_use]
    pub fn with_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            context: String::new(),
            identity: DEFAULT_IDENTITY.to_string(),
        }
    }

    /// Create a request, parsing the URL
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid absolute URL
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| ErrorKind::InvalidUrl(url.to_string(), e))?;
        Ok(Self::with_url(method, parsed))
    }

    /// Shorthand for a `GET` request
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid absolute URL
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// Set the fingerprint context
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Set the identity tag
    #[must_use]
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Set the request body
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a header
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a valid header value
    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    /// Whether the request carries credentials (`Authorization` or `Cookie`)
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.headers.contains_key(http::header::AUTHORIZATION)
            || self.headers.contains_key(http::header::COOKIE)
    }

    /// Authentication state as used in probe fingerprints
    #[must_use]
    pub fn auth_state(&self) -> &'static str {
        if self.is_authenticated() {
            "authenticated"
        } else {
            "anonymous"
        }
    }
}
