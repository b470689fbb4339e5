#[cfg(test)]
mod executor {
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};
    use test_utils::{executor, fast_config, mock_server, mount_route};
    use url::Url;
    use volley_lib::{CacheLayer, ErrorKind, HostKey, Outcome, ProbeRequest, WafVendor};

    /// A local URL nothing listens on
    fn unreachable_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/")
    }

    #[tokio::test]
    async fn test_fetch_then_serve_from_cache() {
        let mock_server = mock_server!(StatusCode::OK, set_body_string("hello"));
        let executor = executor!(fast_config!());

        let first = executor.get(&mock_server.uri()).await.unwrap();
        assert!(matches!(first, Outcome::Fetched(_)));
        let response = first.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text(), "hello");

        let second = executor.get(&mock_server.uri()).await.unwrap();
        assert!(matches!(second, Outcome::Cached(_, CacheLayer::Ttl)));

        let stats = executor.stats().snapshot();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_sends_nothing() {
        let mock_server = wiremock::MockServer::start().await;
        mount_route!(mock_server, "/down", StatusCode::SERVICE_UNAVAILABLE, 5);
        let executor = executor!(fast_config!(retry_times: 0));
        let url = format!("{}/down", mock_server.uri());

        for _ in 0..5 {
            let outcome = executor.get(&url).await.unwrap();
            assert_eq!(
                outcome.response().unwrap().status(),
                StatusCode::SERVICE_UNAVAILABLE
            );
        }

        let err = executor.get(&url).await.unwrap_err();
        assert!(err.is_circuit_open(), "{err}");
        assert_eq!(executor.open_circuits().len(), 1);
        assert_eq!(executor.stats().snapshot().failed_requests, 5);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_retried_then_surfaced() {
        let executor = executor!(fast_config!(
            retry_times: 2,
            retry_backoff_base: Duration::from_millis(50),
        ));

        let start = Instant::now();
        let err = executor.get(&unreachable_url()).await.unwrap_err();

        assert!(err.is_network(), "{err}");
        // Waits of 50ms and 100ms between the three attempts
        assert!(start.elapsed() >= Duration::from_millis(150));
        let stats = executor.stats().snapshot();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_retry_after_is_honored() {
        let mock_server = mock_server!(
            StatusCode::TOO_MANY_REQUESTS,
            insert_header("Retry-After", "1")
        );
        let executor = executor!(fast_config!());

        let start = Instant::now();
        let outcome = executor.get(&mock_server.uri()).await.unwrap();

        assert_eq!(
            outcome.response().unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dedup_ignores_query() {
        let mock_server = wiremock::MockServer::start().await;
        mount_route!(mock_server, "/item", StatusCode::OK, 1);
        let executor = executor!(fast_config!(
            dedup_enabled: true,
            cache_enabled: false,
        ));

        let first = executor
            .get(&format!("{}/item?id=1", mock_server.uri()))
            .await
            .unwrap();
        let second = executor
            .get(&format!("{}//item/?id=2", mock_server.uri()))
            .await
            .unwrap();

        assert!(!first.is_cached());
        assert!(matches!(second, Outcome::Cached(_, CacheLayer::Dedup)));
        assert_eq!(executor.stats().snapshot().dedup_hits, 1);
    }

    #[tokio::test]
    async fn test_repeated_probe_is_skipped() {
        let mock_server = wiremock::MockServer::start().await;
        mount_route!(mock_server, "/search", StatusCode::OK, 2);
        let executor = executor!(fast_config!(
            context_aware_dedup: true,
            cache_enabled: false,
        ));
        let url = format!("{}/search?q=%27", mock_server.uri());

        let probe = || ProbeRequest::get(&url).unwrap().context("sqli");
        assert!(!executor.request(probe()).await.unwrap().is_skipped());
        assert!(executor.request(probe()).await.unwrap().is_skipped());
        // Another payload class on the same URL still runs
        let xss = ProbeRequest::get(&url).unwrap().context("xss");
        assert!(!executor.request(xss).await.unwrap().is_skipped());
    }

    #[tokio::test]
    async fn test_waf_block_page_is_detected() {
        let mock_server = mock_server!(
            StatusCode::FORBIDDEN,
            insert_header("cf-ray", "8a1b2c3d4e5f-FRA")
        );
        let executor = executor!(fast_config!());

        executor.get(&mock_server.uri()).await.unwrap();

        let host = HostKey::try_from(&Url::parse(&mock_server.uri()).unwrap()).unwrap();
        let detection = executor.waf().detection_for(&host).unwrap();
        assert_eq!(detection.vendor, WafVendor::Cloudflare);
        assert_eq!(detection.status, 403);
    }

    #[tokio::test]
    async fn test_identity_concurrency_is_bounded() {
        let mock_server = mock_server!(StatusCode::OK, set_delay(Duration::from_millis(200)));
        let executor = executor!(fast_config!(
            identity_max_concurrency: 1,
            cache_enabled: false,
        ));

        let start = Instant::now();
        let requests = (0..3).map(|i| {
            let probe = ProbeRequest::get(&format!("{}/p{i}", mock_server.uri()))
                .unwrap()
                .identity("admin");
            executor.request(probe)
        });
        let outcomes = futures::future::join_all(requests).await;

        assert!(outcomes.iter().all(Result::is_ok));
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let mock_server = mock_server!(StatusCode::OK);
        let executor = executor!(fast_config!());

        executor.get(&mock_server.uri()).await.unwrap();
        executor.shutdown().await;

        assert!(executor.is_shut_down());
        assert!(matches!(
            executor.get(&mock_server.uri()).await,
            Err(ErrorKind::Shutdown)
        ));
    }
}
