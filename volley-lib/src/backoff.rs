//! Failure-windowed backoff shared by the route circuit breaker and the
//! login circuit breaker.
//!
//! Both count consecutive failures per key. Once the count reaches the
//! policy threshold the key is paused for a duration taken from a stepped
//! schedule; every further failure moves one step along the schedule, the
//! last step repeats. A single success resets the key.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

use crate::ratelimit::RouteKey;

/// Threshold and pause schedule of a [`FailureBackoff`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Consecutive failures before the first pause
    pub threshold: u32,
    /// Pause per step; step index is `failure_count - threshold`
    pub schedule: Vec<Duration>,
}

impl BackoffPolicy {
    /// Route circuit breaker: 5 failures, then 30s, 60s, 2m, 5m
    #[must_use]
    pub fn route() -> Self {
        Self {
            threshold: 5,
            schedule: vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(300),
            ],
        }
    }

    /// Login backoff: 3 failures, then 1m, 5m, 15m, 30m
    #[must_use]
    pub fn login() -> Self {
        Self {
            threshold: 3,
            schedule: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
                Duration::from_secs(1800),
            ],
        }
    }

    /// Pause after `failure_count` consecutive failures, if any
    #[must_use]
    pub fn pause_for(&self, failure_count: u32) -> Option<Duration> {
        if failure_count < self.threshold.max(1) {
            return None;
        }
        let step = (failure_count - self.threshold.max(1)) as usize;
        self.schedule
            .get(step)
            .or_else(|| self.schedule.last())
            .copied()
    }
}

/// Backoff bookkeeping for one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    /// Consecutive failures since the last success
    pub failure_count: u32,
    /// The key is paused until this instant
    pub paused_until: Option<Instant>,
}

impl BackoffState {
    /// Whether the key is paused at `now`
    #[must_use]
    pub fn is_paused(&self, now: Instant) -> bool {
        self.paused_until.is_some_and(|until| until > now)
    }

    /// Time left until the pause ends
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.paused_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// Serializable view of a paused key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PausedKey<K> {
    /// The paused key
    pub key: K,
    /// Consecutive failures
    pub failure_count: u32,
    /// Remaining pause in milliseconds
    pub remaining_ms: u128,
}

/// Per-key consecutive failure counter with a stepped pause schedule
#[derive(Debug)]
pub struct FailureBackoff<K: Eq + Hash> {
    policy: BackoffPolicy,
    states: DashMap<K, BackoffState>,
}

/// Route-level circuit breaker
pub type CircuitBreaker = FailureBackoff<RouteKey>;

impl<K> FailureBackoff<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create an empty backoff table
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            states: DashMap::new(),
        }
    }

    /// The policy in use
    #[must_use]
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// `Err(paused_until)` while `key` is paused.
    ///
    /// Once a pause has elapsed the next call is allowed through as a probe;
    /// its outcome decides whether the key resets or pauses again.
    pub fn check(&self, key: &K) -> Result<(), Instant> {
        let now = Instant::now();
        match self.states.get(key) {
            Some(state) if state.is_paused(now) => Err(state.paused_until.unwrap_or(now)),
            _ => Ok(()),
        }
    }

    /// Count a failure for `key` and return the new pause end, if the key
    /// is now paused
    pub fn record_failure(&self, key: &K) -> Option<Instant> {
        let now = Instant::now();
        let mut state = self.states.entry(key.clone()).or_default();
        state.failure_count = state.failure_count.saturating_add(1);
        let pause = self.policy.pause_for(state.failure_count)?;
        let until = now + pause;
        state.paused_until = Some(until);
        log::warn!(
            "Backing off {key:?} for {}s after {} consecutive failures",
            pause.as_secs(),
            state.failure_count
        );
        Some(until)
    }

    /// Reset `key` after a success
    pub fn record_success(&self, key: &K) {
        if let Some(mut state) = self.states.get_mut(key)
            && *state != BackoffState::default()
        {
            log::debug!("Resetting backoff for {key:?}");
            *state = BackoffState::default();
        }
    }

    /// Current state of `key`
    #[must_use]
    pub fn state(&self, key: &K) -> BackoffState {
        self.states.get(key).map(|s| *s).unwrap_or_default()
    }

    /// All keys that are paused right now
    #[must_use]
    pub fn open_keys(&self) -> Vec<PausedKey<K>> {
        let now = Instant::now();
        self.states
            .iter()
            .filter_map(|entry| {
                entry.remaining(now).map(|remaining| PausedKey {
                    key: entry.key().clone(),
                    failure_count: entry.failure_count,
                    remaining_ms: remaining.as_millis(),
                })
            })
            .collect()
    }

    /// Number of tracked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no key has been tracked yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
