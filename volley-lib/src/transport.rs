//! The single-attempt HTTP layer below the executor.
//!
//! The executor owns every policy (limits, retries, caching). A [`Transport`]
//! only performs one attempt and reports either a complete [`Response`] of
//! any status, or an error for failures below HTTP.

use async_trait::async_trait;
use http::{HeaderValue, header};
use std::fmt::Debug;
use std::time::Duration;

use crate::{ErrorKind, ProbeRequest, Response, Result};

/// Default user agent sent by [`ReqwestTransport`]
pub const DEFAULT_USER_AGENT: &str = concat!("volley/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed by [`ReqwestTransport`]
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Performs a single HTTP attempt
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send `request` once and read the full response.
    ///
    /// HTTP error statuses are valid responses, not errors.
    async fn send(&self, request: &ProbeRequest) -> Result<Response>;
}

/// [`Transport`] over one shared `reqwest` connection pool
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with a per-attempt `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The user-agent is invalid.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn new(timeout: Duration, user_agent: &str, allow_insecure: bool) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(user_agent).map_err(ErrorKind::InvalidHeader)?,
        );

        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .danger_accept_invalid_certs(allow_insecure)
            .redirect(reqwest::redirect::Policy::limited(DEFAULT_MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(ErrorKind::BuildRequestClient)?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub const fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ProbeRequest) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = tokio::time::Instant::now();
        let response = builder.send().await.map_err(ErrorKind::NetworkRequest)?;
        Response::from_reqwest(response, started).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use wiremock::matchers::{body_string, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let transport =
            ReqwestTransport::new(Duration::from_secs(5), DEFAULT_USER_AGENT, false).unwrap();
        let request = ProbeRequest::get(&format!("{}/missing", server.uri())).unwrap();
        let response = transport.send(&request).await.unwrap();

        assert_eq!(response.status().as_u16(), 404);
        assert_eq!(response.body(), b"nope");
    }

    #[tokio::test]
    async fn test_headers_body_and_user_agent_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/form"))
            .and(header_matcher("user-agent", "probe/1.0"))
            .and(header_matcher("x-probe", "1"))
            .and(body_string("a=b"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5), "probe/1.0", false).unwrap();
        let request = ProbeRequest::new(Method::POST, &format!("{}/form", server.uri()))
            .unwrap()
            .header(http::HeaderName::from_static("x-probe"), "1")
            .unwrap()
            .body("a=b");
        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status().as_u16(), 201);
    }

    #[tokio::test]
    async fn test_timeout_is_a_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport =
            ReqwestTransport::new(Duration::from_millis(50), DEFAULT_USER_AGENT, false).unwrap();
        let request = ProbeRequest::get(&server.uri()).unwrap();
        let err = transport.send(&request).await.unwrap_err();
        assert!(err.is_network());
        assert!(err.reqwest_error().unwrap().is_timeout());
    }

    #[test]
    fn test_invalid_user_agent() {
        let err = ReqwestTransport::new(Duration::from_secs(1), "bad\nagent", false).unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidHeader(_)));
    }
}
