#![allow(unreachable_pub)]

mod error;
mod request;
mod response;

pub use error::ErrorKind;
pub use request::{DEFAULT_IDENTITY, ProbeRequest};
pub use response::{BODY_SAMPLE_LEN, CacheLayer, Outcome, Response};

/// The volley `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
