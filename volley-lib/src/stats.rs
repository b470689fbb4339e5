//! Request statistics for monitoring and safety gates.
//!
//! A request counts as *failed* when it produced no response (network error
//! after all retries), was rate limited (429), or hit a server error (5xx).
//! The same definition drives the route circuit breaker.

use http::{Method, StatusCode};
use serde::Serialize;
use serde::ser::SerializeStruct;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::ratelimit::{HostKey, Window};

/// Number of [`RequestRecord`]s retained by default
pub const DEFAULT_RECORD_CAPACITY: usize = 1000;

/// Number of latency samples kept per host
const LATENCY_SAMPLES: usize = 100;

/// One executed request, as handed to observability consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    /// Requested URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Response status, `None` for network errors
    pub status: Option<u16>,
    /// Time until the full response was received
    pub latency_ms: u64,
    /// Body size in bytes
    pub size: usize,
    /// Identity the request ran under
    pub identity: String,
}

impl RequestRecord {
    /// Build a record for a request that received a response
    #[must_use]
    pub fn new(
        url: &str,
        method: &Method,
        status: StatusCode,
        latency: Duration,
        size: usize,
        identity: &str,
    ) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            status: Some(status.as_u16()),
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            size,
            identity: identity.to_string(),
        }
    }

    /// Build a record for a request that failed without a response
    #[must_use]
    pub fn network_error(url: &str, method: &Method, latency: Duration, identity: &str) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            status: None,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            size: 0,
            identity: identity.to_string(),
        }
    }

    /// Whether this request counts as failed
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_none_or(|status| status == 429 || status >= 500)
    }
}

/// Per-host response statistics
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    /// Total number of requests made to this host
    pub total_requests: u64,
    /// Number of successful requests (2xx status)
    pub successful_requests: u64,
    /// Number of requests that received rate limit responses (429)
    pub rate_limited: u64,
    /// Number of server error responses (5xx)
    pub server_errors: u64,
    /// Number of client error responses (4xx, excluding 429)
    pub client_errors: u64,
    /// Number of requests without any response
    pub network_errors: u64,
    /// Timestamp of the last rate limit response
    pub last_rate_limit: Option<Instant>,
    /// Recent request times
    pub request_times: Window<Duration>,
    /// Status code counts
    pub status_codes: HashMap<u16, u64>,
}

impl HostStats {
    fn new() -> Self {
        Self {
            request_times: Window::new(LATENCY_SAMPLES),
            ..Self::default()
        }
    }

    /// Record a response with status code and request duration
    pub fn record_response(&mut self, status_code: u16, request_time: Duration) {
        self.total_requests += 1;
        *self.status_codes.entry(status_code).or_insert(0) += 1;

        match status_code {
            200..=299 => self.successful_requests += 1,
            429 => {
                self.rate_limited += 1;
                self.last_rate_limit = Some(Instant::now());
            }
            400..=499 => self.client_errors += 1,
            500..=599 => self.server_errors += 1,
            _ => {}
        }

        self.request_times.push(request_time);
    }

    /// Record a request that ended in a network error
    pub fn record_network_error(&mut self) {
        self.total_requests += 1;
        self.network_errors += 1;
    }

    /// Get median request time
    #[must_use]
    pub fn median_request_time(&self) -> Option<Duration> {
        if self.request_times.is_empty() {
            return None;
        }

        let mut times = self.request_times.to_vec();
        times.sort();
        let mid = times.len() / 2;

        if times.len().is_multiple_of(2) {
            Some((times[mid - 1] + times[mid]) / 2)
        } else {
            Some(times[mid])
        }
    }

    /// Share of failed requests (0.0 to 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let failures = self.rate_limited + self.server_errors + self.network_errors;
        #[allow(clippy::cast_precision_loss)]
        let rate = failures as f64 / self.total_requests as f64;
        rate
    }

    /// Check if this host has been experiencing rate limiting recently
    #[must_use]
    pub fn is_currently_rate_limited(&self) -> bool {
        self.last_rate_limit
            .is_some_and(|last| last.elapsed() < Duration::from_secs(60))
    }
}

impl Serialize for HostStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let median_request_time_ms = self.median_request_time().map(|d| d.as_millis());

        let mut s = serializer.serialize_struct("HostStats", 9)?;
        s.serialize_field("total_requests", &self.total_requests)?;
        s.serialize_field("successful_requests", &self.successful_requests)?;
        s.serialize_field("rate_limited", &self.rate_limited)?;
        s.serialize_field("client_errors", &self.client_errors)?;
        s.serialize_field("server_errors", &self.server_errors)?;
        s.serialize_field("network_errors", &self.network_errors)?;
        s.serialize_field("failure_rate", &self.failure_rate())?;
        s.serialize_field("median_request_time_ms", &median_request_time_ms)?;
        s.serialize_field("status_codes", &self.status_codes)?;
        s.end()
    }
}

/// Aggregate counters of one executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Requests that reached the network stage
    pub total_requests: u64,
    /// Requests counted as failed
    pub failed_requests: u64,
    /// Requests answered by the TTL cache
    pub cache_hits: u64,
    /// Requests answered by the dedup cache
    pub dedup_hits: u64,
    /// Requests skipped by the fingerprint set
    pub skipped: u64,
}

#[derive(Debug)]
struct StatsInner {
    totals: StatsSnapshot,
    hosts: HashMap<HostKey, HostStats>,
    records: Window<RequestRecord>,
}

/// Collects counters, per-host statistics and a bounded request log
#[derive(Debug)]
pub struct StatsCollector {
    inner: Mutex<StatsInner>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_RECORD_CAPACITY)
    }
}

impl StatsCollector {
    /// Create a collector retaining the latest `record_capacity` records
    #[must_use]
    pub fn new(record_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                totals: StatsSnapshot::default(),
                hosts: HashMap::new(),
                records: Window::new(record_capacity),
            }),
        }
    }

    /// Record an executed request
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned
    pub fn record(&self, host: &HostKey, record: RequestRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.totals.total_requests += 1;
        if record.is_failure() {
            inner.totals.failed_requests += 1;
        }

        let host_stats = inner.hosts.entry(host.clone()).or_insert_with(HostStats::new);
        match record.status {
            Some(status) => {
                host_stats.record_response(status, Duration::from_millis(record.latency_ms));
            }
            None => host_stats.record_network_error(),
        }
        inner.records.push(record);
    }

    /// Count a TTL cache hit
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned
    pub fn record_cache_hit(&self) {
        self.inner.lock().unwrap().totals.cache_hits += 1;
    }

    /// Count a dedup cache hit
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned
    pub fn record_dedup_hit(&self) {
        self.inner.lock().unwrap().totals.dedup_hits += 1;
    }

    /// Count a skipped duplicate probe
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned
    pub fn record_skip(&self) {
        self.inner.lock().unwrap().totals.skipped += 1;
    }

    /// Aggregate counters
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().unwrap().totals
    }

    /// Share of failed requests among all executed requests (0.0 to 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let totals = self.snapshot();
        if totals.total_requests == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = totals.failed_requests as f64 / totals.total_requests as f64;
        rate
    }

    /// Safety gate: whether the failure rate is above `threshold`, once at
    /// least `min_requests` requests were executed
    #[must_use]
    pub fn exceeds_failure_rate(&self, threshold: f64, min_requests: u64) -> bool {
        self.snapshot().total_requests >= min_requests && self.failure_rate() > threshold
    }

    /// Statistics of one host
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned
    #[must_use]
    pub fn host_stats(&self, host: &HostKey) -> Option<HostStats> {
        self.inner.lock().unwrap().hosts.get(host).cloned()
    }

    /// Statistics of all hosts, sorted by request count (descending)
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned
    #[must_use]
    pub fn all_host_stats(&self) -> Vec<(HostKey, HostStats)> {
        let inner = self.inner.lock().unwrap();
        let mut hosts: Vec<_> = inner
            .hosts
            .iter()
            .map(|(host, stats)| (host.clone(), stats.clone()))
            .collect();
        hosts.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.total_requests));
        hosts
    }

    /// The retained request records, oldest first
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex is poisoned
    #[must_use]
    pub fn records(&self) -> Vec<RequestRecord> {
        self.inner.lock().unwrap().records.to_vec()
    }
}
