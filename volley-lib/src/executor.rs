//! The request executor.
//!
//! Every request passes the same fixed sequence:
//!
//! 1. URL normalization
//! 2. cache lookups (`GET` only): fingerprint set, dedup cache, TTL cache
//! 3. global and per-identity concurrency permits
//! 4. route circuit breaker
//! 5. rate limiter, calibrator delay and jitter
//! 6. the HTTP attempt(s) with capped exponential retry backoff
//! 7. bookkeeping: stats, calibrator, WAF detector, breaker, caches
//! 8. reactive pause on 429
//!
//! Use [`ExecutorBuilder`] to create a [`RequestExecutor`]:
//!
//! ```no_run
//! # use volley_lib::{ExecutorBuilder, ExecutorConfig, Result};
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let executor = ExecutorBuilder::builder()
//!     .config(ExecutorConfig::default())
//!     .build()
//!     .executor()?;
//! let outcome = executor.get("https://example.com/login").await?;
//! println!("{:?}", outcome.response().map(|r| r.status()));
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use http::{Method, StatusCode};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::backoff::{BackoffPolicy, BackoffState, CircuitBreaker, PausedKey};
use crate::cache::{ContextFingerprintSet, DedupCache, ResponseCache};
use crate::calibrator::ThrottleCalibrator;
use crate::config::ExecutorConfig;
use crate::ratelimit::{AdaptiveRateLimiter, RateLimiter, RouteKey};
use crate::retry::{RetryExt, retry_backoff};
use crate::stats::{DEFAULT_RECORD_CAPACITY, RequestRecord, StatsCollector};
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{CacheLayer, Outcome};
use crate::utils::url::normalize_url;
use crate::waf::WafDetector;
use crate::{ErrorKind, ProbeRequest, Response, Result};

/// Upper bound for honoring a `Retry-After` header
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Range of the randomized pause after a 429 without `Retry-After`, in
/// milliseconds
const RATE_LIMIT_PAUSE_MS: (u64, u64) = (1000, 3000);

/// Whether `status` counts against the route circuit breaker
#[must_use]
pub fn is_route_failure(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Builder for [`RequestExecutor`].
///
/// Without an explicit transport a [`ReqwestTransport`] is created from the
/// configuration.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ExecutorBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ExecutorBuilder`.
"))]
pub struct ExecutorBuilder {
    /// Limits, retries and cache settings
    config: ExecutorConfig,
    /// Performs the HTTP attempts
    transport: Option<Arc<dyn Transport>>,
    /// Calibrator to share with other components; a fresh one starting at
    /// `global_rps` is created otherwise
    calibrator: Option<Arc<ThrottleCalibrator>>,
    /// Number of [`RequestRecord`]s retained by the stats collector
    #[builder(default = DEFAULT_RECORD_CAPACITY)]
    record_capacity: usize,
}

impl Default for ExecutorBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExecutorBuilder {
    /// Instantiates a [`RequestExecutor`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The configuration is invalid.
    /// - The default transport cannot be created (for example because of an
    ///   invalid user agent).
    pub fn executor(self) -> Result<RequestExecutor> {
        let Self {
            config,
            transport,
            calibrator,
            record_capacity,
        } = self;
        config.validate()?;

        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                config.timeout(),
                &config.user_agent,
                config.allow_insecure,
            )?),
        };
        let calibrator =
            calibrator.unwrap_or_else(|| Arc::new(ThrottleCalibrator::new(config.global_rps)));

        let rate_limiter = RateLimiter::new(config.global_rps, config.per_host_rps);
        let limiter = if config.adaptive_throttle_enabled {
            Limiter::Adaptive(AdaptiveRateLimiter::new(rate_limiter, calibrator.clone()))
        } else {
            Limiter::Fixed(rate_limiter)
        };

        Ok(RequestExecutor {
            transport,
            limiter,
            calibrator,
            breaker: CircuitBreaker::new(BackoffPolicy::route()),
            ttl_cache: ResponseCache::new(config.cache_ttl(), config.cache_max_entries),
            dedup: DedupCache::new(),
            fingerprints: ContextFingerprintSet::new(),
            waf: WafDetector::new(),
            stats: StatsCollector::new(record_capacity),
            permits: Semaphore::new(config.max_concurrency),
            identity_permits: DashMap::new(),
            closed: AtomicBool::new(false),
            config,
        })
    }
}

#[derive(Debug)]
enum Limiter {
    Fixed(RateLimiter),
    Adaptive(AdaptiveRateLimiter),
}

impl Limiter {
    const fn rate_limiter(&self) -> &RateLimiter {
        match self {
            Self::Fixed(limiter) => limiter,
            Self::Adaptive(adaptive) => adaptive.limiter(),
        }
    }
}

/// Executes probes under rate limits, circuit breakers and caches.
///
/// One executor is shared by all tasks of a scan, usually behind an
/// [`Arc`]. HTTP error statuses are returned as responses; only network
/// failures, open circuits and shutdown are errors.
#[derive(Debug)]
pub struct RequestExecutor {
    config: ExecutorConfig,
    transport: Arc<dyn Transport>,
    limiter: Limiter,
    calibrator: Arc<ThrottleCalibrator>,
    breaker: CircuitBreaker,
    ttl_cache: ResponseCache,
    dedup: DedupCache,
    fingerprints: ContextFingerprintSet,
    waf: WafDetector,
    stats: StatsCollector,
    permits: Semaphore,
    identity_permits: DashMap<String, Arc<Semaphore>>,
    closed: AtomicBool,
}

impl RequestExecutor {
    /// Execute one probe.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::CircuitOpen`] if the route is paused; nothing is sent
    /// - a network error once all retries are used up
    /// - [`ErrorKind::Shutdown`] after [`RequestExecutor::shutdown`]
    /// - [`ErrorKind::InvalidUrlHost`] for URLs without a host
    pub async fn request(&self, mut request: ProbeRequest) -> Result<Outcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ErrorKind::Shutdown);
        }

        request.url = normalize_url(&request.url);
        let route = RouteKey::try_from(&request.url)?;
        let is_get = request.method == Method::GET;

        if is_get && let Some(outcome) = self.lookup(&request) {
            return Ok(outcome);
        }

        // Identity permit first, so waiting on a busy identity holds no global slot
        let _identity_permit = self
            .identity_semaphore(&request.identity)
            .acquire_owned()
            .await
            .map_err(|_| ErrorKind::Shutdown)?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ErrorKind::Shutdown)?;

        if let Err(paused_until) = self.breaker.check(&route) {
            let retry_in = paused_until.saturating_duration_since(Instant::now());
            log::debug!("Circuit open for {route}, rejecting {}", request.url);
            return Err(ErrorKind::CircuitOpen { route, retry_in });
        }

        self.pace(&route).await;

        let started = Instant::now();
        let response = match self.send_with_retries(&request).await {
            Ok(response) => Arc::new(response),
            Err(e) => {
                self.stats.record(
                    route.host(),
                    RequestRecord::network_error(
                        request.url.as_str(),
                        &request.method,
                        started.elapsed(),
                        &request.identity,
                    ),
                );
                self.breaker.record_failure(&route);
                return Err(e);
            }
        };

        self.observe(&request, &route, &response);
        // Transient failures are not remembered, so the probe can run again
        if is_get && !is_route_failure(response.status()) {
            self.store(&request, &response);
        }

        if response.status() == StatusCode::TOO_MANY_REQUESTS && self.config.smart_backoff_enabled
        {
            let pause = Self::rate_limit_pause(&response);
            log::info!(
                "Rate limited by {}, pausing {}ms",
                route.host(),
                pause.as_millis()
            );
            tokio::time::sleep(pause).await;
        }

        Ok(Outcome::Fetched(response))
    }

    /// Shorthand for a `GET` probe without context or identity
    ///
    /// # Errors
    ///
    /// Returns an error if `url` cannot be parsed or the request fails, see
    /// [`RequestExecutor::request`]
    pub async fn get(&self, url: &str) -> Result<Outcome> {
        self.request(ProbeRequest::get(url)?).await
    }

    fn lookup(&self, request: &ProbeRequest) -> Option<Outcome> {
        if self.config.context_aware_dedup && self.fingerprints.contains(request) {
            log::debug!("Skipping already executed probe {}", request.url);
            self.stats.record_skip();
            return Some(Outcome::Skipped);
        }
        if self.config.dedup_enabled
            && let Some(response) = self.dedup.get(&request.url)
        {
            self.stats.record_dedup_hit();
            return Some(Outcome::Cached(response, CacheLayer::Dedup));
        }
        if self.config.cache_enabled
            && let Some(response) = self.ttl_cache.get(request.url.as_str())
        {
            self.stats.record_cache_hit();
            return Some(Outcome::Cached(response, CacheLayer::Ttl));
        }
        None
    }

    fn identity_semaphore(&self, identity: &str) -> Arc<Semaphore> {
        if let Some(semaphore) = self.identity_permits.get(identity) {
            return semaphore.clone();
        }
        self.identity_permits
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.identity_max_concurrency)))
            .clone()
    }

    async fn pace(&self, route: &RouteKey) {
        match &self.limiter {
            Limiter::Fixed(limiter) => limiter.acquire(route).await,
            Limiter::Adaptive(limiter) => {
                limiter.acquire(route).await;
                let delay = self.calibrator.get_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if self.config.jitter_ms > 0 {
            let jitter = rand::thread_rng().gen_range(0..=self.config.jitter_ms);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }
    }

    /// Up to `retry_times + 1` attempts
    async fn send_with_retries(&self, request: &ProbeRequest) -> Result<Response> {
        let mut attempt = 0;
        loop {
            match self.transport.send(request).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.retry_times && e.should_retry() => {
                    let wait = retry_backoff(
                        attempt,
                        self.config.retry_backoff_base,
                        self.config.retry_backoff_cap,
                    );
                    log::debug!(
                        "Attempt {} for {} failed: {e}. Retrying in {}ms",
                        attempt + 1,
                        request.url,
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Request to {} failed after {} attempt(s): {e}",
                        request.url,
                        attempt + 1
                    );
                    return Err(e);
                }
            }
        }
    }

    fn observe(&self, request: &ProbeRequest, route: &RouteKey, response: &Response) {
        let status = response.status();
        self.stats.record(
            route.host(),
            RequestRecord::new(
                request.url.as_str(),
                &request.method,
                status,
                response.elapsed(),
                response.size(),
                &request.identity,
            ),
        );

        self.calibrator.record_response(status, response.elapsed());
        self.calibrator.record_rate_limit_headers(response.headers());

        if self.config.waf_detection_enabled {
            self.waf.analyze_response(
                &request.url,
                status,
                response.headers(),
                response.body_sample(),
            );
        }

        if is_route_failure(status) {
            self.breaker.record_failure(route);
        } else {
            self.breaker.record_success(route);
        }
    }

    fn store(&self, request: &ProbeRequest, response: &Arc<Response>) {
        if self.config.cache_enabled {
            self.ttl_cache.put(request.url.as_str(), response.clone());
        }
        if self.config.dedup_enabled {
            self.dedup.insert(&request.url, response.clone());
        }
        if self.config.context_aware_dedup {
            self.fingerprints.insert(request);
        }
    }

    fn rate_limit_pause(response: &Response) -> Duration {
        response.retry_after().map_or_else(
            || {
                let (low, high) = RATE_LIMIT_PAUSE_MS;
                Duration::from_millis(rand::thread_rng().gen_range(low..=high))
            },
            |retry_after| retry_after.min(MAX_RETRY_AFTER),
        )
    }

    /// Stop accepting requests and wait for in-flight requests to finish.
    ///
    /// Requests started afterwards fail with [`ErrorKind::Shutdown`].
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Shutting down executor, draining in-flight requests");
        let permits = u32::try_from(self.config.max_concurrency).unwrap_or(u32::MAX);
        if let Ok(all) = self.permits.acquire_many(permits).await {
            drop(all);
        }
        self.permits.close();
    }

    /// Whether [`RequestExecutor::shutdown`] was called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Circuit breaker state of `route`
    #[must_use]
    pub fn circuit_state(&self, route: &RouteKey) -> BackoffState {
        self.breaker.state(route)
    }

    /// All routes whose circuit is open right now
    #[must_use]
    pub fn open_circuits(&self) -> Vec<PausedKey<RouteKey>> {
        self.breaker.open_keys()
    }

    /// Request statistics
    #[must_use]
    pub const fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// WAF detections
    #[must_use]
    pub const fn waf(&self) -> &WafDetector {
        &self.waf
    }

    /// The calibrator feeding the adaptive limiter
    #[must_use]
    pub const fn calibrator(&self) -> &Arc<ThrottleCalibrator> {
        &self.calibrator
    }

    /// The underlying rate limiter
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        self.limiter.rate_limiter()
    }

    /// The active configuration
    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}
