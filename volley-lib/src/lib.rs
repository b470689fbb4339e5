//! `volley` is the request core of a web security scanner.
//!
//! Scanner plugins hand their probes to a [`RequestExecutor`], which runs
//! them under global and per-host rate limits, adaptive throttling, per-route
//! circuit breakers, response caches and per-identity concurrency limits.
//! A [`LoginCircuitBreaker`] applies the same failure backoff to interactive
//! logins.
//!
//! ```no_run
//! use volley_lib::{ExecutorBuilder, ExecutorConfig, ProbeRequest, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let config = ExecutorConfig::from_toml("global_rps = 5.0\ndedup_enabled = true")?;
//!   let executor = ExecutorBuilder::builder().config(config).build().executor()?;
//!
//!   let probe = ProbeRequest::get("https://example.com/search?q=%27")?
//!       .context("sqli")
//!       .identity("anonymous");
//!   if let Some(response) = executor.request(probe).await?.response() {
//!       println!("{response}");
//!   }
//!
//!   executor.shutdown().await;
//!   Ok(())
//! }
//! ```
#![warn(missing_docs)]

mod backoff;
mod calibrator;
mod executor;
mod retry;
mod stats;
mod transport;
mod types;
mod utils;
mod waf;

pub mod cache;
pub mod config;
pub mod ratelimit;
pub mod session;
#[cfg(test)]
pub(crate) mod test_utils;

pub use backoff::{BackoffPolicy, BackoffState, CircuitBreaker, FailureBackoff, PausedKey};
pub use calibrator::{CalibratorConfig, CalibratorSnapshot, ThrottleCalibrator};
pub use config::ExecutorConfig;
pub use executor::{ExecutorBuilder, MAX_RETRY_AFTER, RequestExecutor, is_route_failure};
pub use ratelimit::{HostKey, RouteKey};
pub use session::{
    BlockingLoginDriver, InMemorySessionStore, LoginCircuitBreaker, LoginDriver, Session,
    SessionStore,
};
pub use stats::{HostStats, RequestRecord, StatsCollector, StatsSnapshot};
pub use transport::{DEFAULT_USER_AGENT, ReqwestTransport, Transport};
pub use types::*;
pub use utils::url::{dedup_key, normalize_url};
pub use waf::{WafDetection, WafDetector, WafVendor};
