use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::bucket::TokenBucket;
use super::key::{HostKey, RouteKey};
use crate::calibrator::ThrottleCalibrator;

/// How often the adaptive limiter re-reads the calibrator
pub const ADAPTIVE_SYNC_INTERVAL: Duration = Duration::from_millis(500);

/// Bounds for the adaptive global rate, in requests per second
pub const ADAPTIVE_GLOBAL_RPS: (f64, f64) = (0.5, 50.0);

/// Bounds for the adaptive per-host rate, in requests per second
pub const ADAPTIVE_PER_HOST_RPS: (f64, f64) = (0.25, 10.0);

/// Combines a global token bucket with lazily created per-host buckets.
///
/// A request needs a token from *both* buckets. The global bucket is taken
/// first, then the host bucket; either one alone can hold the caller back.
#[derive(Debug)]
pub struct RateLimiter {
    global: TokenBucket,
    hosts: DashMap<HostKey, Arc<TokenBucket>>,
    /// Rate used for newly created host buckets
    per_host_rps: Mutex<f64>,
    /// Rates the limiter was created with
    configured: (f64, f64),
}

impl RateLimiter {
    /// Create a limiter with the given global and per-host rates
    #[must_use]
    pub fn new(global_rps: f64, per_host_rps: f64) -> Self {
        Self {
            global: TokenBucket::with_rate(global_rps),
            hosts: DashMap::new(),
            per_host_rps: Mutex::new(per_host_rps),
            configured: (global_rps, per_host_rps),
        }
    }

    /// The `(global, per_host)` rates passed to [`RateLimiter::new`]
    #[must_use]
    pub const fn configured_rates(&self) -> (f64, f64) {
        self.configured
    }

    /// Wait until both the global and the per-host bucket grant a token
    pub async fn acquire(&self, route: &RouteKey) {
        self.global.acquire(1.0).await;
        let host = self.host_bucket(route.host());
        host.acquire(1.0).await;
    }

    /// Get the bucket for `host`, creating it on first use
    ///
    /// # Panics
    ///
    /// Panics if the rate mutex is poisoned
    fn host_bucket(&self, host: &HostKey) -> Arc<TokenBucket> {
        if let Some(bucket) = self.hosts.get(host) {
            return bucket.clone();
        }
        let rate = *self.per_host_rps.lock().unwrap();
        self.hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(TokenBucket::with_rate(rate)))
            .clone()
    }

    /// Update the global rate and the rate of every host bucket
    ///
    /// # Panics
    ///
    /// Panics if the rate mutex is poisoned
    pub fn set_rates(&self, global_rps: f64, per_host_rps: f64) {
        self.global.set_rate(global_rps);
        *self.per_host_rps.lock().unwrap() = per_host_rps;
        for bucket in &self.hosts {
            bucket.value().set_rate(per_host_rps);
        }
    }

    /// Current global rate
    #[must_use]
    pub fn global_rate(&self) -> f64 {
        self.global.rate()
    }

    /// Current rate of the bucket for `host`, if one was created
    #[must_use]
    pub fn host_rate(&self, host: &HostKey) -> Option<f64> {
        self.hosts.get(host).map(|bucket| bucket.rate())
    }

    /// Number of hosts with a bucket
    #[must_use]
    pub fn active_host_count(&self) -> usize {
        self.hosts.len()
    }
}

/// A [`RateLimiter`] whose rates follow a [`ThrottleCalibrator`].
///
/// On `acquire`, at most once per [`ADAPTIVE_SYNC_INTERVAL`], the calibrator's
/// `current_rps` becomes the global rate, clamped into [`ADAPTIVE_GLOBAL_RPS`].
/// Host buckets are scaled by the same factor relative to the configured
/// global rate, clamped into [`ADAPTIVE_PER_HOST_RPS`] and never above the
/// configured per-host rate.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    calibrator: Arc<ThrottleCalibrator>,
    last_sync: Mutex<Option<Instant>>,
}

impl AdaptiveRateLimiter {
    /// Attach `calibrator` to `limiter`
    #[must_use]
    pub const fn new(limiter: RateLimiter, calibrator: Arc<ThrottleCalibrator>) -> Self {
        Self {
            limiter,
            calibrator,
            last_sync: Mutex::new(None),
        }
    }

    /// Sync rates if due, then wait for tokens
    pub async fn acquire(&self, route: &RouteKey) {
        self.sync();
        self.limiter.acquire(route).await;
    }

    /// Re-read the calibrator if the last sync is older than the interval.
    /// Returns `true` if the rates were updated.
    ///
    /// # Panics
    ///
    /// Panics if the sync mutex is poisoned
    pub fn sync(&self) -> bool {
        let now = Instant::now();
        {
            let mut last = self.last_sync.lock().unwrap();
            if let Some(last) = *last
                && now.duration_since(last) < ADAPTIVE_SYNC_INTERVAL
            {
                return false;
            }
            *last = Some(now);
        }

        let rps = self.calibrator.current_rps();
        let (configured_global, configured_per_host) = self.limiter.configured_rates();
        let global = rps.clamp(ADAPTIVE_GLOBAL_RPS.0, ADAPTIVE_GLOBAL_RPS.1);
        let ratio = if configured_global > 0.0 {
            rps / configured_global
        } else {
            1.0
        };
        let per_host = (configured_per_host * ratio)
            .clamp(ADAPTIVE_PER_HOST_RPS.0, ADAPTIVE_PER_HOST_RPS.1)
            .min(configured_per_host);
        log::debug!("Adaptive rate sync: global {global:.2} rps, per host {per_host:.2} rps");
        self.limiter.set_rates(global, per_host);
        true
    }

    /// The wrapped limiter
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
