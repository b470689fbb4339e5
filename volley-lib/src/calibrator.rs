//! Feedback controller for request pacing.
//!
//! The [`ThrottleCalibrator`] watches status codes and latencies and derives
//! two signals from them:
//!
//! - `current_rps`: the target request rate, read periodically by the
//!   [`crate::ratelimit::AdaptiveRateLimiter`]
//! - `get_delay()`: an extra sleep applied on top of the token buckets.
//!   It reacts on the very next request, faster than a bucket rate change.

use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::ratelimit::{Window, quota_usage};

/// Consecutive fast successes needed before the rate is raised
const RECOVERY_STREAK: u32 = 10;

/// Samples needed before the latency trend is evaluated
const MIN_TREND_SAMPLES: usize = 10;

/// Tuning knobs of the [`ThrottleCalibrator`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratorConfig {
    /// Lowest target rate
    pub min_rps: f64,
    /// Highest target rate
    pub max_rps: f64,
    /// Number of `(status, latency)` samples kept
    pub window: usize,
    /// Successes slower than this do not count towards recovery
    pub slow_threshold: Duration,
    /// Upper bound for the extra delay
    pub max_delay: Duration,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            min_rps: 0.5,
            max_rps: 50.0,
            window: 50,
            slow_threshold: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct CalibratorState {
    history: Window<(u16, Duration)>,
    current_rps: f64,
    extra_delay: Duration,
    success_streak: u32,
    /// Samples to record before the latency trend is evaluated again
    trend_cooldown: usize,
}

/// Point-in-time view of the calibrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibratorSnapshot {
    /// Target request rate
    pub current_rps: f64,
    /// Extra delay in milliseconds
    pub extra_delay_ms: u128,
    /// Number of samples in the window
    pub samples: usize,
}

/// Observes responses and adjusts the target rate and an extra delay.
///
/// - 429 halves the rate and adds 500ms of delay
/// - 5xx cuts the rate by a quarter and adds 200ms of delay
/// - fast 2xx halve the delay; every [`RECOVERY_STREAK`] in a row raise
///   the rate by 10%
/// - a rising latency trend (newer half of the window 1.5x slower than the
///   older half) cuts the rate by 10%, at most once per window of samples
#[derive(Debug)]
pub struct ThrottleCalibrator {
    config: CalibratorConfig,
    state: Mutex<CalibratorState>,
}

impl ThrottleCalibrator {
    /// Create a calibrator starting at `initial_rps` with default bounds
    #[must_use]
    pub fn new(initial_rps: f64) -> Self {
        Self::with_config(initial_rps, CalibratorConfig::default())
    }

    /// Create a calibrator with custom tuning
    #[must_use]
    pub fn with_config(initial_rps: f64, config: CalibratorConfig) -> Self {
        Self {
            state: Mutex::new(CalibratorState {
                history: Window::new(config.window),
                current_rps: initial_rps.clamp(config.min_rps, config.max_rps),
                extra_delay: Duration::ZERO,
                success_streak: 0,
                trend_cooldown: 0,
            }),
            config,
        }
    }

    /// Feed one observed response
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned
    pub fn record_response(&self, status: StatusCode, elapsed: Duration) {
        let mut state = self.state.lock().unwrap();
        state.history.push((status.as_u16(), elapsed));

        if status == StatusCode::TOO_MANY_REQUESTS {
            state.current_rps *= 0.5;
            state.extra_delay += Duration::from_millis(500);
            state.success_streak = 0;
            log::debug!(
                "Calibrator: 429 observed, rate down to {:.2} rps",
                state.current_rps.max(self.config.min_rps)
            );
        } else if status.is_server_error() {
            state.current_rps *= 0.75;
            state.extra_delay += Duration::from_millis(200);
            state.success_streak = 0;
        } else if status.is_success() && elapsed < self.config.slow_threshold {
            state.extra_delay /= 2;
            if state.extra_delay < Duration::from_millis(10) {
                state.extra_delay = Duration::ZERO;
            }
            state.success_streak += 1;
            if state.success_streak >= RECOVERY_STREAK {
                state.success_streak = 0;
                state.current_rps *= 1.1;
            }
        }

        state.trend_cooldown = state.trend_cooldown.saturating_sub(1);
        if state.trend_cooldown == 0 && Self::latency_rising(&state.history) {
            state.current_rps *= 0.9;
            state.trend_cooldown = state.history.capacity();
            log::debug!(
                "Calibrator: latency rising, rate down to {:.2} rps",
                state.current_rps.max(self.config.min_rps)
            );
        }

        state.current_rps = state
            .current_rps
            .clamp(self.config.min_rps, self.config.max_rps);
        state.extra_delay = state.extra_delay.min(self.config.max_delay);
    }

    /// Apply a preventive delay when the server reports that most of its
    /// quota is used up (`X-RateLimit-Remaining` / `X-RateLimit-Limit`)
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned
    pub fn record_rate_limit_headers(&self, headers: &HeaderMap) {
        let Some(usage) = quota_usage(headers) else {
            return;
        };
        if usage > 0.8 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let preventive =
                Duration::from_millis((200.0 * ((usage - 0.8) / 0.2).min(1.0)).round() as u64);
            let mut state = self.state.lock().unwrap();
            state.extra_delay = state.extra_delay.max(preventive).min(self.config.max_delay);
        }
    }

    fn latency_rising(history: &Window<(u16, Duration)>) -> bool {
        if history.len() < MIN_TREND_SAMPLES {
            return false;
        }
        let (older, newer) = history.halves();
        let mean = |samples: &[&(u16, Duration)]| {
            #[allow(clippy::cast_precision_loss)]
            let n = samples.len() as f64;
            samples.iter().map(|(_, d)| d.as_secs_f64()).sum::<f64>() / n
        };
        mean(&newer) > mean(&older) * 1.5
    }

    /// Target request rate
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned
    #[must_use]
    pub fn current_rps(&self) -> f64 {
        self.state.lock().unwrap().current_rps
    }

    /// Extra delay to sleep before the next request. Never negative.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned
    #[must_use]
    pub fn get_delay(&self) -> Duration {
        self.state.lock().unwrap().extra_delay
    }

    /// Current state for monitoring
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned
    #[must_use]
    pub fn snapshot(&self) -> CalibratorSnapshot {
        let state = self.state.lock().unwrap();
        CalibratorSnapshot {
            current_rps: state.current_rps,
            extra_delay_ms: state.extra_delay.as_millis(),
            samples: state.history.len(),
        }
    }
}
