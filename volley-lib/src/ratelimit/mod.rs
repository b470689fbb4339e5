//! Global and per-host rate limiting.
//!
//! # Architecture
//!
//! - [`TokenBucket`]: the single rate limiting primitive
//! - [`RateLimiter`]: one global bucket AND one bucket per host
//! - [`AdaptiveRateLimiter`]: a [`RateLimiter`] whose rates follow a
//!   [`crate::ThrottleCalibrator`]
//! - [`HostKey`] / [`RouteKey`]: normalized keys for hosts and routes
//! - [`Window`]: bounded rolling window used for response history

mod bucket;
mod headers;
mod key;
mod limiter;
mod window;

pub use bucket::{MAX_WAIT_SLICE, TokenBucket};
pub(crate) use headers::quota_usage;
pub use headers::{RetryAfterParseError, parse_retry_after};
pub use key::{HostKey, RouteKey};
pub use limiter::{
    ADAPTIVE_GLOBAL_RPS, ADAPTIVE_PER_HOST_RPS, ADAPTIVE_SYNC_INTERVAL, AdaptiveRateLimiter,
    RateLimiter,
};
pub use window::Window;
