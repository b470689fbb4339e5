//! `test-utils` is used for testing `volley-lib`.
//! This crate does not depend on `volley-lib`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Mount a `GET` route on an existing mock server which must be hit exactly
/// `$times` times before the server is dropped
#[macro_export]
macro_rules! mount_route {
    ($server:expr, $path:expr, $status:expr, $times:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path($path))
            .respond_with(template)
            .expect($times)
            .mount(&$server)
            .await;
    }};
}

/// Executor configuration without throttling, so tests only wait where
/// they mean to
#[macro_export]
macro_rules! fast_config {
    () => {
        volley_lib::ExecutorConfig {
            global_rps: 1000.0,
            per_host_rps: 1000.0,
            jitter_ms: 0,
            adaptive_throttle_enabled: false,
            ..volley_lib::ExecutorConfig::default()
        }
    };
    ($($field:ident : $value:expr),+ $(,)?) => {
        volley_lib::ExecutorConfig {
            $($field: $value,)+
            ..$crate::fast_config!()
        }
    };
}

/// Build an executor from a configuration, talking to real servers
#[macro_export]
macro_rules! executor {
    ($config:expr) => {
        volley_lib::ExecutorBuilder::builder()
            .config($config)
            .build()
            .executor()
            .unwrap()
    };
}
