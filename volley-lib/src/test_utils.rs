use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use crate::config::ExecutorConfig;
use crate::transport::Transport;
use crate::{ErrorKind, ProbeRequest, Response, Result};

/// A response with an empty body and a fixed latency of 10ms
pub(crate) fn response(url: &str, status: u16) -> Response {
    Response::new(
        Url::parse(url).unwrap(),
        StatusCode::from_u16(status).unwrap(),
        HeaderMap::new(),
        Vec::new(),
        Duration::from_millis(10),
    )
}

/// Configuration without pacing so that only the behavior under test
/// consumes (paused) time
pub(crate) fn quiet_config() -> ExecutorConfig {
    ExecutorConfig {
        global_rps: 1000.0,
        per_host_rps: 1000.0,
        jitter_ms: 0,
        adaptive_throttle_enabled: false,
        ..ExecutorConfig::default()
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Status(u16),
    Response(Response),
    NetworkError,
}

/// In-memory [`Transport`] replaying scripted results.
///
/// Queued results are returned first, then the default result forever.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    queue: Mutex<VecDeque<Scripted>>,
    default: Mutex<Scripted>,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn with_default(default: Scripted) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default: Mutex::new(default),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn always(status: u16) -> Self {
        Self::with_default(Scripted::Status(status))
    }

    pub(crate) fn always_network_error() -> Self {
        Self::with_default(Scripted::NetworkError)
    }

    /// Every attempt takes `latency` before it resolves
    pub(crate) fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn set_default(&self, status: u16) {
        *self.default.lock().unwrap() = Scripted::Status(status);
    }

    pub(crate) fn push_response(&self, response: Response) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Scripted::Response(response));
    }

    pub(crate) fn push_network_error(&self) {
        self.queue.lock().unwrap().push_back(Scripted::NetworkError);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ProbeRequest) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.lock().unwrap().clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match next {
            Scripted::Status(status) => Ok(response(request.url.as_str(), status)),
            Scripted::Response(response) => Ok(response),
            Scripted::NetworkError => Err(ErrorKind::Network {
                url: request.url.to_string(),
                reason: "connection reset by peer".into(),
            }),
        }
    }
}
