//! Configuration of the executor and the login circuit breaker.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Durations of the tuning knobs use humantime syntax
//! (`"500ms"`, `"10s"`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::transport::DEFAULT_USER_AGENT;
use crate::{ErrorKind, Result};

/// Default global request rate
pub const DEFAULT_GLOBAL_RPS: f64 = 10.0;
/// Default per-host request rate
pub const DEFAULT_PER_HOST_RPS: f64 = 2.0;
/// Default number of retries after the first attempt
pub const DEFAULT_RETRY_TIMES: u32 = 2;
/// Default per-attempt timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default upper bound of the random jitter in milliseconds
pub const DEFAULT_JITTER_MS: u64 = 200;
/// Default TTL of the response cache in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
/// Default capacity of the response cache
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
/// Default number of concurrent requests
pub const DEFAULT_MAX_CONCURRENCY: usize = 20;
/// Default number of concurrent requests per identity
pub const DEFAULT_IDENTITY_MAX_CONCURRENCY: usize = 5;
/// Default timeout of one login round in seconds
pub const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 60;
/// Default number of login rounds per `ensure_logged_in` call
pub const DEFAULT_MAX_LOGIN_RETRIES: u32 = 3;
/// Default timeout of a whole `ensure_logged_in` call in seconds
pub const DEFAULT_OVERALL_LOGIN_TIMEOUT_SECS: u64 = 180;

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

default_function! {
    global_rps: f64 = DEFAULT_GLOBAL_RPS;
    per_host_rps: f64 = DEFAULT_PER_HOST_RPS;
    retry_times: u32 = DEFAULT_RETRY_TIMES;
    timeout_seconds: u64 = DEFAULT_TIMEOUT_SECS;
    jitter_ms: u64 = DEFAULT_JITTER_MS;
    cache_ttl_seconds: u64 = DEFAULT_CACHE_TTL_SECS;
    cache_max_entries: usize = DEFAULT_CACHE_MAX_ENTRIES;
    max_concurrency: usize = DEFAULT_MAX_CONCURRENCY;
    identity_max_concurrency: usize = DEFAULT_IDENTITY_MAX_CONCURRENCY;
    login_timeout_seconds: u64 = DEFAULT_LOGIN_TIMEOUT_SECS;
    max_login_retries: u32 = DEFAULT_MAX_LOGIN_RETRIES;
    overall_login_timeout_seconds: u64 = DEFAULT_OVERALL_LOGIN_TIMEOUT_SECS;
    retry_backoff_base: Duration = Duration::from_millis(500);
    retry_backoff_cap: Duration = Duration::from_secs(10);
    login_round_delay: Duration = Duration::from_secs(2);
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    enabled: bool = true;
}

/// Settings for [`crate::RequestExecutor`] and [`crate::LoginCircuitBreaker`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Requests per second across all hosts
    #[serde(default = "global_rps")]
    pub global_rps: f64,
    /// Requests per second per host
    #[serde(default = "per_host_rps")]
    pub per_host_rps: f64,
    /// Retries after the first attempt on retryable network errors
    #[serde(default = "retry_times")]
    pub retry_times: u32,
    /// Timeout of one HTTP attempt
    #[serde(default = "timeout_seconds")]
    pub timeout_seconds: u64,
    /// Upper bound of the random delay added before each request
    #[serde(default = "jitter_ms")]
    pub jitter_ms: u64,
    /// Reuse `GET` responses for the same URL within `cache_ttl_seconds`
    #[serde(default = "enabled")]
    pub cache_enabled: bool,
    /// Lifetime of a cached response
    #[serde(default = "cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Capacity of the response cache
    #[serde(default = "cache_max_entries")]
    pub cache_max_entries: usize,
    /// Reuse the first `GET` response seen for a path, whatever the query
    #[serde(default)]
    pub dedup_enabled: bool,
    /// Skip `GET` probes whose fingerprint already ran
    #[serde(default)]
    pub context_aware_dedup: bool,
    /// Honor `Retry-After` on 429 responses
    #[serde(default = "enabled")]
    pub smart_backoff_enabled: bool,
    /// Let a [`crate::ThrottleCalibrator`] drive the rate limits
    #[serde(default = "enabled")]
    pub adaptive_throttle_enabled: bool,
    /// Feed responses to the [`crate::WafDetector`]
    #[serde(default = "enabled")]
    pub waf_detection_enabled: bool,
    /// Concurrent requests across all identities
    #[serde(default = "max_concurrency")]
    pub max_concurrency: usize,
    /// Concurrent requests per identity
    #[serde(default = "identity_max_concurrency")]
    pub identity_max_concurrency: usize,
    /// Timeout of one login round
    #[serde(default = "login_timeout_seconds")]
    pub login_timeout_seconds: u64,
    /// Login rounds per `ensure_logged_in` call
    #[serde(default = "max_login_retries")]
    pub max_login_retries: u32,
    /// Timeout of a whole `ensure_logged_in` call
    #[serde(default = "overall_login_timeout_seconds")]
    pub overall_login_timeout_seconds: u64,
    /// Base of the exponential retry backoff
    #[serde(default = "retry_backoff_base", with = "humantime_serde")]
    pub retry_backoff_base: Duration,
    /// Cap of the exponential retry backoff
    #[serde(default = "retry_backoff_cap", with = "humantime_serde")]
    pub retry_backoff_cap: Duration,
    /// Base delay between login rounds, multiplied by the round number
    #[serde(default = "login_round_delay", with = "humantime_serde")]
    pub login_round_delay: Duration,
    /// User agent sent with every request
    #[serde(default = "user_agent")]
    pub user_agent: String,
    /// Accept invalid TLS certificates
    #[serde(default)]
    pub allow_insecure: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            global_rps: global_rps(),
            per_host_rps: per_host_rps(),
            retry_times: retry_times(),
            timeout_seconds: timeout_seconds(),
            jitter_ms: jitter_ms(),
            cache_enabled: true,
            cache_ttl_seconds: cache_ttl_seconds(),
            cache_max_entries: cache_max_entries(),
            dedup_enabled: false,
            context_aware_dedup: false,
            smart_backoff_enabled: true,
            adaptive_throttle_enabled: true,
            waf_detection_enabled: true,
            max_concurrency: max_concurrency(),
            identity_max_concurrency: identity_max_concurrency(),
            login_timeout_seconds: login_timeout_seconds(),
            max_login_retries: max_login_retries(),
            overall_login_timeout_seconds: overall_login_timeout_seconds(),
            retry_backoff_base: retry_backoff_base(),
            retry_backoff_cap: retry_backoff_cap(),
            login_round_delay: login_round_delay(),
            user_agent: user_agent(),
            allow_insecure: false,
        }
    }
}

impl ExecutorConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`ExecutorConfig::validate`]
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ErrorKind::from((path.to_path_buf(), e)))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not valid TOML or fails
    /// [`ExecutorConfig::validate`]
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or disable the executor
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Config`] naming the offending field
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ErrorKind::Config(format!("`{name}` must be positive, got {value}")))
            }
        };
        positive("global_rps", self.global_rps)?;
        positive("per_host_rps", self.per_host_rps)?;

        if self.max_concurrency == 0 {
            return Err(ErrorKind::Config("`max_concurrency` must be at least 1".into()));
        }
        if self.identity_max_concurrency == 0 {
            return Err(ErrorKind::Config(
                "`identity_max_concurrency` must be at least 1".into(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(ErrorKind::Config("`timeout_seconds` must be at least 1".into()));
        }
        if self.retry_backoff_cap < self.retry_backoff_base {
            return Err(ErrorKind::Config(
                "`retry_backoff_cap` must not be below `retry_backoff_base`".into(),
            ));
        }
        Ok(())
    }

    /// Per-attempt timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// TTL of the response cache
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Timeout of one login round
    #[must_use]
    pub const fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_seconds)
    }

    /// Timeout of a whole `ensure_logged_in` call
    #[must_use]
    pub const fn overall_login_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_login_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        assert_eq!(ExecutorConfig::from_toml("").unwrap(), ExecutorConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = ExecutorConfig::from_toml(
            r#"
            global_rps = 3.5
            dedup_enabled = true
            retry_backoff_base = "250ms"
            retry_backoff_cap = "4s"
            "#,
        )
        .unwrap();
        assert!((config.global_rps - 3.5).abs() < f64::EPSILON);
        assert!(config.dedup_enabled);
        assert_eq!(config.retry_backoff_base, Duration::from_millis(250));
        assert_eq!(config.retry_backoff_cap, Duration::from_secs(4));
        assert_eq!(config.retry_times, DEFAULT_RETRY_TIMES);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = ExecutorConfig::from_toml("global_rsp = 1.0").unwrap_err();
        assert!(matches!(err, ErrorKind::ConfigFormat(_)));
    }

    #[test]
    fn test_validation() {
        let err = ExecutorConfig::from_toml("per_host_rps = 0.0").unwrap_err();
        assert_eq!(
            err,
            ErrorKind::Config("`per_host_rps` must be positive, got 0".into())
        );
        assert!(ExecutorConfig::from_toml("max_concurrency = 0").is_err());
        assert!(
            ExecutorConfig::from_toml("retry_backoff_base = \"5s\"\nretry_backoff_cap = \"1s\"")
                .is_err()
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "jitter_ms = 0\nwaf_detection_enabled = false").unwrap();
        let config = ExecutorConfig::load(file.path()).unwrap();
        assert_eq!(config.jitter_ms, 0);
        assert!(!config.waf_detection_enabled);

        let err = ExecutorConfig::load(Path::new("/nonexistent/volley.toml")).unwrap_err();
        assert!(matches!(err, ErrorKind::IoError(Some(_), _)));
    }
}
