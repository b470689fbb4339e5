use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{LoginDriver, SessionStore};
use crate::backoff::{BackoffPolicy, BackoffState, FailureBackoff};
use crate::config::ExecutorConfig;
use crate::{ErrorKind, Result};

/// Upper bound for the pause between two login rounds
const MAX_ROUND_DELAY: Duration = Duration::from_secs(10);

/// Bounds interactive login attempts per domain.
///
/// Every failed round counts against the domain. After three failures in a
/// row the domain backs off for 1, 5, 15 and finally 30 minutes, and
/// `ensure_logged_in` answers `false` without touching the [`LoginDriver`]
/// until the pause is over. A valid session clears the backoff.
///
/// Logins for the same domain are serialized; callers waiting for a running
/// login reuse its session.
#[derive(Debug)]
pub struct LoginCircuitBreaker {
    store: Arc<dyn SessionStore>,
    driver: Arc<dyn LoginDriver>,
    backoff: FailureBackoff<String>,
    in_progress: DashMap<String, Arc<Mutex<()>>>,
    max_rounds: u32,
    round_timeout: Duration,
    overall_timeout: Duration,
    round_delay: Duration,
}

impl LoginCircuitBreaker {
    /// Create a breaker using the login settings of `config`
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        driver: Arc<dyn LoginDriver>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            store,
            driver,
            backoff: FailureBackoff::new(BackoffPolicy::login()),
            in_progress: DashMap::new(),
            max_rounds: config.max_login_retries.max(1),
            round_timeout: config.login_timeout(),
            overall_timeout: config.overall_login_timeout(),
            round_delay: config.login_round_delay,
        }
    }

    /// Make sure a valid session exists for `domain`, logging in if needed.
    ///
    /// Never fails: driver errors, timeouts and store errors are logged and
    /// reported as `false`.
    pub async fn ensure_logged_in(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        if self.has_session(&domain).await {
            return true;
        }

        let lock = self
            .in_progress
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // A login that finished while we waited counts for us as well
        if self.has_session(&domain).await {
            return true;
        }

        if let Err(until) = self.backoff.check(&domain) {
            log::info!(
                "Login for {domain} is backing off for another {}s",
                until.saturating_duration_since(Instant::now()).as_secs()
            );
            return false;
        }

        if let Ok(logged_in) =
            tokio::time::timeout(self.overall_timeout, self.login_rounds(&domain)).await
        {
            logged_in
        } else {
            log::warn!(
                "Login for {domain} did not finish within {}s",
                self.overall_timeout.as_secs()
            );
            self.backoff.record_failure(&domain);
            false
        }
    }

    async fn has_session(&self, domain: &str) -> bool {
        let valid = self.store.has_valid_session(domain).await;
        if valid {
            self.backoff.record_success(&domain.to_string());
        }
        valid
    }

    async fn login_rounds(&self, domain: &str) -> bool {
        let key = domain.to_string();
        for round in 1..=self.max_rounds {
            match self.login_round(domain).await {
                Ok(()) => {
                    log::info!("Logged into {domain} in round {round}");
                    self.backoff.record_success(&key);
                    return true;
                }
                Err(e) => {
                    log::warn!("Login round {round}/{} for {domain} failed: {e}", self.max_rounds);
                    if self.backoff.record_failure(&key).is_some() {
                        return false;
                    }
                }
            }
            if round < self.max_rounds {
                let delay = self.round_delay.saturating_mul(round).min(MAX_ROUND_DELAY);
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    async fn login_round(&self, domain: &str) -> Result<()> {
        let session = tokio::time::timeout(self.round_timeout, self.driver.login(domain))
            .await
            .map_err(|_| ErrorKind::LoginFailed {
                domain: domain.to_string(),
                reason: format!("timed out after {}s", self.round_timeout.as_secs()),
            })??;

        self.store.save_session(domain, session).await?;

        if self.store.has_valid_session(domain).await {
            Ok(())
        } else {
            Err(ErrorKind::LoginFailed {
                domain: domain.to_string(),
                reason: "session not valid after login".into(),
            })
        }
    }

    /// Backoff bookkeeping of `domain`
    #[must_use]
    pub fn backoff_state(&self, domain: &str) -> BackoffState {
        self.backoff.state(&domain.to_lowercase())
    }
}
