//! Response reuse layers consulted by the executor for `GET` requests, in
//! this order:
//!
//! 1. [`ContextFingerprintSet`]: skip a probe that already ran
//! 2. [`DedupCache`]: reuse the first response seen for the same path
//! 3. [`ResponseCache`]: reuse a response for the same full URL within a TTL
//!
//! All layers share responses as `Arc<Response>`.

mod dedup;
mod fingerprint;
mod ttl;

pub use dedup::DedupCache;
pub use fingerprint::{ContextFingerprintSet, fingerprint};
pub use ttl::ResponseCache;
