use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::ErrorKind;
use crate::types::Result;
use crate::utils::url::canonical_path;

/// A type-safe representation of a hostname for rate limiting purposes.
///
/// This extracts and normalizes hostnames from URLs to ensure consistent
/// rate limiting across requests to the same host (domain or IP address).
///
/// # Examples
///
/// ```
/// use volley_lib::ratelimit::HostKey;
/// use url::Url;
///
/// let url = Url::parse("https://API.example.com/users/1").unwrap();
/// let host_key = HostKey::try_from(&url).unwrap();
/// assert_eq!(host_key.as_str(), "api.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostKey(String);

impl HostKey {
    /// Get the hostname as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the hostname as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<&Url> for HostKey {
    type Error = ErrorKind;

    fn try_from(url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or(ErrorKind::InvalidUrlHost)?;

        // Normalize to lowercase for consistent lookup
        Ok(HostKey(host.to_lowercase()))
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HostKey {
    fn from(host: String) -> Self {
        HostKey(host.to_lowercase())
    }
}

impl From<&str> for HostKey {
    fn from(host: &str) -> Self {
        HostKey(host.to_lowercase())
    }
}

/// Identifies a route for circuit breaking: `(host, canonical_path)`.
///
/// The path is slash-collapsed and has no trailing slash (except `/`).
/// Query strings are not part of the route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    host: HostKey,
    path: String,
}

impl RouteKey {
    /// Build a route key from a host and a raw path
    #[must_use]
    pub fn new(host: impl Into<HostKey>, path: &str) -> Self {
        Self {
            host: host.into(),
            path: canonical_path(path),
        }
    }

    /// The host part
    #[must_use]
    pub const fn host(&self) -> &HostKey {
        &self.host
    }

    /// The canonical path part
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl TryFrom<&Url> for RouteKey {
    type Error = ErrorKind;

    fn try_from(url: &Url) -> Result<Self> {
        Ok(Self {
            host: HostKey::try_from(url)?,
            path: canonical_path(url.path()),
        })
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_normalization() {
        let url = Url::parse("https://API.GITHUB.COM/repos/user/repo").unwrap();
        let host_key = HostKey::try_from(&url).unwrap();
        assert_eq!(host_key.as_str(), "api.github.com");
    }

    #[test]
    fn test_host_key_subdomain_separation() {
        let api = HostKey::try_from(&Url::parse("https://api.example.com/").unwrap()).unwrap();
        let www = HostKey::try_from(&Url::parse("https://www.example.com/").unwrap()).unwrap();
        assert_ne!(api, www);
    }

    #[test]
    fn test_host_key_no_host() {
        let url = Url::parse("file:///path/to/file").unwrap();
        assert!(HostKey::try_from(&url).is_err());
    }

    #[test]
    fn test_route_key_ignores_query_and_slashes() {
        let a = RouteKey::try_from(&Url::parse("http://h.com//api/users/?id=1").unwrap()).unwrap();
        let b = RouteKey::try_from(&Url::parse("http://H.com/api/users?id=2").unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.path(), "/api/users");
        assert_eq!(a.to_string(), "h.com/api/users");
    }

    #[test]
    fn test_route_key_distinguishes_paths() {
        assert_ne!(RouteKey::new("h.com", "/a"), RouteKey::new("h.com", "/b"));
        assert_eq!(RouteKey::new("h.com", "/a/"), RouteKey::new("H.COM", "/a"));
    }
}
