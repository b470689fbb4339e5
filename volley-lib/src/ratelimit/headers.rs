//! Rate limiting hints sent by servers: `Retry-After` and the quota headers.

use http::{HeaderMap, HeaderValue};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Names under which servers advertise the remaining quota
const REMAINING_HEADERS: [&str; 3] = [
    "x-ratelimit-remaining",
    "x-rate-limit-remaining",
    "ratelimit-remaining",
];

/// Names under which servers advertise the total quota
const LIMIT_HEADERS: [&str; 3] = ["x-ratelimit-limit", "x-rate-limit-limit", "ratelimit-limit"];

/// A `Retry-After` value volley cannot act on
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryAfterParseError {
    /// Neither a number of seconds nor an HTTP date
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    /// Contains bytes outside visible ASCII
    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// How long a server asks clients to wait.
///
/// Accepts both forms of RFC 7231 section 7.1.3: delay-seconds (`"120"`) and
/// an HTTP date. Dates in the past mean no wait. Surrounding whitespace is
/// ignored.
pub fn parse_retry_after(value: &HeaderValue) -> Result<Duration, RetryAfterParseError> {
    let raw = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?
        .trim();

    if let Ok(seconds) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    match httpdate::parse_http_date(raw) {
        Ok(at) => Ok(at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)),
        Err(_) => Err(RetryAfterParseError::ValueError(raw.to_string())),
    }
}

/// Share of the advertised quota already used, in `[0, 1]`.
///
/// `None` unless both the remaining and the total quota are present and the
/// total is non-zero. The header names are not standardised; the common
/// variants of the IETF `ratelimit-headers` draft are understood.
pub(crate) fn quota_usage(headers: &HeaderMap) -> Option<f64> {
    let remaining = first_number(headers, &REMAINING_HEADERS)?;
    let limit = first_number(headers, &LIMIT_HEADERS).filter(|&limit| limit > 0)?;
    #[allow(clippy::cast_precision_loss)]
    let used = limit.saturating_sub(remaining) as f64 / limit as f64;
    Some(used)
}

fn first_number(headers: &HeaderMap, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn value(v: &str) -> HeaderValue {
        HeaderValue::from_str(v).unwrap()
    }

    #[rstest]
    #[case("7", Duration::from_secs(7))]
    #[case(" 30 ", Duration::from_secs(30))]
    #[case("0", Duration::ZERO)]
    #[case("Fri, 15 May 2015 15:34:21 GMT", Duration::ZERO)]
    fn test_retry_after(#[case] header: &str, #[case] expected: Duration) {
        assert_eq!(parse_retry_after(&value(header)), Ok(expected));
    }

    #[rstest]
    #[case("-1")]
    #[case("soon")]
    #[case("1.5")]
    fn test_retry_after_rejects(#[case] header: &str) {
        assert_eq!(
            parse_retry_after(&value(header)),
            Err(RetryAfterParseError::ValueError(header.into()))
        );
    }

    #[test]
    fn test_retry_after_future_date() {
        let wait = parse_retry_after(&value("Fri, 15 May 4099 15:34:21 GMT")).unwrap();
        assert!(wait > Duration::from_secs(3600 * 24 * 365));
    }

    #[test]
    fn test_retry_after_non_ascii() {
        let header = HeaderValue::from_bytes(b"\xff").unwrap();
        assert_eq!(
            parse_retry_after(&header),
            Err(RetryAfterParseError::HeaderValueError)
        );
    }

    #[test]
    fn test_quota_usage() {
        let mut headers = HeaderMap::new();
        assert_eq!(quota_usage(&headers), None);

        headers.insert("ratelimit-limit", value("100"));
        assert_eq!(quota_usage(&headers), None);

        headers.insert("x-rate-limit-remaining", value("10"));
        assert_eq!(quota_usage(&headers), Some(0.9));

        // More remaining than the limit counts as nothing used
        headers.insert("x-rate-limit-remaining", value("500"));
        assert_eq!(quota_usage(&headers), Some(0.0));

        headers.insert("ratelimit-limit", value("0"));
        assert_eq!(quota_usage(&headers), None);
    }
}
