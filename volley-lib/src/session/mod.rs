//! Authenticated sessions and bounded login retries.
//!
//! Session persistence and the actual login (usually a browser flow) are
//! provided by the caller through [`SessionStore`] and [`LoginDriver`].
//! [`LoginCircuitBreaker`] decides when a login may be attempted at all.

mod breaker;

pub use breaker::LoginCircuitBreaker;

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::Result;

/// Credentials obtained by a login
#[derive(Debug, Default)]
pub struct Session {
    /// Cookies by name
    pub cookies: HashMap<String, String>,
    /// Bearer token, if the application uses one
    pub bearer: Option<SecretString>,
    /// The session is no longer valid after this instant
    pub expires_at: Option<Instant>,
}

impl Session {
    /// A session consisting of cookies only
    #[must_use]
    pub fn with_cookies(cookies: HashMap<String, String>) -> Self {
        Self {
            cookies,
            ..Self::default()
        }
    }

    /// A session consisting of a bearer token only
    #[must_use]
    pub fn with_bearer(token: &str) -> Self {
        Self {
            bearer: Some(SecretString::from(token.to_string())),
            ..Self::default()
        }
    }

    /// Limit the lifetime of the session
    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(Instant::now() + ttl);
        self
    }

    /// Whether the session has credentials and is not expired
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let has_credentials = !self.cookies.is_empty()
            || self
                .bearer
                .as_ref()
                .is_some_and(|token| !token.expose_secret().is_empty());
        has_credentials && self.expires_at.is_none_or(|at| at > Instant::now())
    }

    /// Value for a `Cookie` request header
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<_> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        pairs.sort();
        Some(pairs.join("; "))
    }
}

/// Stores sessions per domain
#[async_trait]
pub trait SessionStore: Send + Sync + Debug {
    /// Whether a usable session exists for `domain`
    async fn has_valid_session(&self, domain: &str) -> bool;

    /// Persist a freshly obtained session
    async fn save_session(&self, domain: &str, session: Session) -> Result<()>;
}

/// Performs one interactive login
#[async_trait]
pub trait LoginDriver: Send + Sync + Debug {
    /// Log into `domain` and return the obtained session
    async fn login(&self, domain: &str) -> Result<Session>;
}

/// Process-local [`SessionStore`]
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `Cookie` header of the stored session for `domain`
    #[must_use]
    pub fn cookie_header(&self, domain: &str) -> Option<String> {
        self.sessions.get(domain).and_then(|s| s.cookie_header())
    }

    /// Drop the session of `domain`
    pub fn invalidate(&self, domain: &str) {
        self.sessions.remove(domain);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn has_valid_session(&self, domain: &str) -> bool {
        self.sessions.get(domain).is_some_and(|s| s.is_valid())
    }

    async fn save_session(&self, domain: &str, session: Session) -> Result<()> {
        self.sessions.insert(domain.to_string(), session);
        Ok(())
    }
}

/// Runs a synchronous login function (for example a browser automation
/// driver) on tokio's blocking thread pool
pub struct BlockingLoginDriver<F> {
    login: Arc<F>,
}

impl<F> BlockingLoginDriver<F>
where
    F: Fn(&str) -> Result<Session> + Send + Sync + 'static,
{
    /// Wrap `login`
    pub fn new(login: F) -> Self {
        Self {
            login: Arc::new(login),
        }
    }
}

impl<F> Debug for BlockingLoginDriver<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingLoginDriver").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> LoginDriver for BlockingLoginDriver<F>
where
    F: Fn(&str) -> Result<Session> + Send + Sync + 'static,
{
    async fn login(&self, domain: &str) -> Result<Session> {
        let login = self.login.clone();
        let domain = domain.to_string();
        tokio::task::spawn_blocking(move || (*login)(&domain)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn test_session_validity() {
        assert!(!Session::default().is_valid());
        assert!(!Session::with_bearer("").is_valid());
        assert!(Session::with_bearer("token").is_valid());

        let session = Session::with_bearer("token").expires_in(Duration::from_secs(10));
        assert!(session.is_valid());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!session.is_valid());
    }

    #[test]
    fn test_bearer_is_redacted() {
        let session = Session::with_bearer("hunter2");
        assert!(!format!("{session:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemorySessionStore::new();
        assert!(!store.has_valid_session("a.example").await);

        let cookies = HashMap::from([
            ("sid".to_string(), "1".to_string()),
            ("csrf".to_string(), "x".to_string()),
        ]);
        store
            .save_session("a.example", Session::with_cookies(cookies))
            .await
            .unwrap();
        assert!(store.has_valid_session("a.example").await);
        assert_eq!(
            store.cookie_header("a.example").as_deref(),
            Some("csrf=x; sid=1")
        );

        store.invalidate("a.example");
        assert!(!store.has_valid_session("a.example").await);
    }

    #[tokio::test]
    async fn test_blocking_driver() {
        let driver = BlockingLoginDriver::new(|domain: &str| {
            if domain == "ok.example" {
                Ok(Session::with_bearer("t"))
            } else {
                Err(ErrorKind::LoginFailed {
                    domain: domain.to_string(),
                    reason: "bad credentials".into(),
                })
            }
        });
        assert!(driver.login("ok.example").await.unwrap().is_valid());
        assert!(matches!(
            driver.login("bad.example").await,
            Err(ErrorKind::LoginFailed { .. })
        ));
    }
}
