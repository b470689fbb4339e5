use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound for a single sleep while waiting for tokens.
/// Waiting in slices lets a concurrent [`TokenBucket::set_rate`] take effect
/// promptly.
pub const MAX_WAIT_SLICE: Duration = Duration::from_millis(500);

/// Rates are never allowed to reach zero, otherwise waiters could block
/// forever
const MIN_RATE: f64 = 0.01;

#[derive(Debug)]
struct BucketState {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token bucket rate limiter.
///
/// Tokens refill continuously at `rate` per second up to `capacity`, and the
/// bucket starts full. Over any window of length `T` at most
/// `rate * T + capacity` tokens are granted.
///
/// Waiters are not ordered; whoever re-checks first after a refill wins.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a new bucket granting `rate` tokens per second with a burst of
    /// `capacity` tokens
    #[must_use]
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                rate: rate.max(MIN_RATE),
                capacity: capacity.max(1.0),
                tokens: capacity.max(1.0),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Create a bucket whose burst equals its rate (at least one token)
    #[must_use]
    pub fn with_rate(rate: f64) -> Self {
        Self::new(rate, rate.max(1.0))
    }

    /// Wait until `amount` tokens are available and take them.
    ///
    /// Requests larger than the capacity are clamped to the capacity.
    ///
    /// # Panics
    ///
    /// Panics if the bucket mutex is poisoned
    pub async fn acquire(&self, amount: f64) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                state.refill(Instant::now());
                let amount = amount.min(state.capacity);
                if state.tokens >= amount {
                    state.tokens -= amount;
                    return;
                }
                let deficit = amount - state.tokens;
                Duration::from_secs_f64(deficit / state.rate).min(MAX_WAIT_SLICE)
            };
            // Never sleep for zero, otherwise float rounding could spin
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Take `amount` tokens if they are available right now
    ///
    /// # Panics
    ///
    /// Panics if the bucket mutex is poisoned
    pub fn try_acquire(&self, amount: f64) -> bool {
        let mut state = self.state.lock().unwrap();
        state.refill(Instant::now());
        if state.tokens >= amount {
            state.tokens -= amount;
            true
        } else {
            false
        }
    }

    /// Change the refill rate without resetting accumulated tokens
    ///
    /// # Panics
    ///
    /// Panics if the bucket mutex is poisoned
    pub fn set_rate(&self, rate: f64) {
        let mut state = self.state.lock().unwrap();
        // Tokens accrued so far are credited at the old rate
        state.refill(Instant::now());
        state.rate = rate.max(MIN_RATE);
    }

    /// Current refill rate in tokens per second
    ///
    /// # Panics
    ///
    /// Panics if the bucket mutex is poisoned
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.state.lock().unwrap().rate
    }

    /// Maximum number of stored tokens
    ///
    /// # Panics
    ///
    /// Panics if the bucket mutex is poisoned
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.state.lock().unwrap().capacity
    }

    /// Tokens available right now
    ///
    /// # Panics
    ///
    /// Panics if the bucket mutex is poisoned
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        state.refill(Instant::now());
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_starts_full_and_drains() {
        let bucket = TokenBucket::new(1.0, 3.0);
        assert!(bucket.try_acquire(1.0));
        assert!(bucket.try_acquire(1.0));
        assert!(bucket.try_acquire(1.0));
        assert!(!bucket.try_acquire(1.0));
        assert!(bucket.available() >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let bucket = TokenBucket::new(10.0, 2.0);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((bucket.available() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(2.0, 1.0);
        let start = Instant::now();
        bucket.acquire(1.0).await;
        bucket.acquire(1.0).await;
        bucket.acquire(1.0).await;
        // Two refills at 2 tokens/s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(990), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_grants_never_exceed_rate_times_window_plus_burst() {
        let rate = 5.0;
        let burst = 3.0;
        let bucket = Arc::new(TokenBucket::new(rate, burst));
        let start = Instant::now();
        let window = Duration::from_secs(4);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move {
                let mut granted = 0u32;
                while start.elapsed() < window {
                    bucket.acquire(1.0).await;
                    if start.elapsed() <= window {
                        granted += 1;
                    }
                }
                granted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        let bound = rate * window.as_secs_f64() + burst;
        assert!(f64::from(total) <= bound, "{total} > {bound}");
        assert!(f64::from(total) >= bound - 2.0, "{total} too low");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rate_keeps_tokens() {
        let bucket = TokenBucket::new(1.0, 5.0);
        assert!(bucket.try_acquire(2.0));
        bucket.set_rate(100.0);
        assert!((bucket.rate() - 100.0).abs() < f64::EPSILON);
        assert!(bucket.available() >= 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rate_speeds_up_waiters() {
        let bucket = Arc::new(TokenBucket::new(0.1, 1.0));
        assert!(bucket.try_acquire(1.0));

        let waiter = {
            let bucket = bucket.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                bucket.acquire(1.0).await;
                start.elapsed()
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        bucket.set_rate(10.0);

        // At 0.1 tokens/s the waiter would need ~10s
        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(1), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_is_clamped() {
        let bucket = TokenBucket::new(1.0, 2.0);
        tokio::time::timeout(Duration::from_secs(5), bucket.acquire(10.0))
            .await
            .expect("oversized acquire should terminate");
    }

    #[test]
    fn test_zero_rate_is_floored() {
        let bucket = TokenBucket::new(0.0, 0.0);
        assert!(bucket.rate() > 0.0);
        assert!((bucket.capacity() - 1.0).abs() < f64::EPSILON);
    }
}
