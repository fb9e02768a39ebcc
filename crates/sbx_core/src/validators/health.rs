//! HTTP liveness probing of a sandbox URL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::HealthSettings;
use crate::types::HealthCheckResult;

/// A single HTTP probe. Never fails; problems land in the result.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> HealthCheckResult;
}

/// `reqwest` GET probe. 2xx and 3xx count as healthy.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> HealthCheckResult {
        let started = Instant::now();
        let timeout_error = || format!("Timeout after {}ms", timeout.as_millis());

        let response = tokio::time::timeout(timeout, self.client.get(url).timeout(timeout).send()).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match response {
            Err(_) => HealthCheckResult {
                passed: false,
                response_time_ms,
                error: Some(timeout_error()),
                attempts: 1,
                ..Default::default()
            },
            Ok(Err(e)) => HealthCheckResult {
                passed: false,
                response_time_ms,
                error: Some(if e.is_timeout() { timeout_error() } else { e.to_string() }),
                attempts: 1,
                ..Default::default()
            },
            Ok(Ok(resp)) => {
                let status = resp.status();
                let passed = status.is_success() || status.is_redirection();
                HealthCheckResult {
                    passed,
                    status_code: Some(status.as_u16()),
                    response_time_ms,
                    error: (!passed).then(|| format!("HTTP {}", status)),
                    attempts: 1,
                }
            }
        }
    }
}

/// Bounded retrying health check.
#[derive(Clone)]
pub struct HealthChecker {
    probe: Arc<dyn HealthProbe>,
    settings: HealthSettings,
}

impl HealthChecker {
    pub fn new(probe: Arc<dyn HealthProbe>, settings: HealthSettings) -> Self {
        Self { probe, settings }
    }

    pub fn http(settings: HealthSettings) -> Self {
        Self::new(Arc::new(HttpProbe::new()), settings)
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// One probe with the configured per-request timeout.
    pub async fn check(&self, url: &str) -> HealthCheckResult {
        self.probe.probe(url, self.settings.timeout()).await
    }

    /// Probe up to `attempts` times, sleeping `interval_ms` between attempts.
    ///
    /// Returns the last result; worst case `attempts * (interval + timeout)`.
    pub async fn wait_for_healthy(&self, url: &str) -> HealthCheckResult {
        let attempts = self.settings.attempts.max(1);
        let mut last = HealthCheckResult::default();

        for attempt in 1..=attempts {
            last = self.check(url).await;
            last.attempts = attempt;
            if last.passed {
                info!("Health check passed for {} after {} attempt(s)", url, attempt);
                return last;
            }
            debug!(
                "Health check attempt {}/{} for {} failed: {}",
                attempt,
                attempts,
                url,
                last.error.as_deref().unwrap_or("unknown")
            );
            if attempt < attempts {
                tokio::time::sleep(self.settings.interval()).await;
            }
        }

        warn!("Sandbox at {} never became healthy", url);
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings(attempts: u32, interval_ms: u64, timeout_ms: u64) -> HealthSettings {
        HealthSettings {
            attempts,
            interval_ms,
            timeout_ms,
        }
    }

    /// Serve `status` to every connection.
    async fn serve(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!("HTTP/1.1 {}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok", status);
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    /// Accept connections and never answer.
    async fn black_hole() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_healthy_server() {
        let url = serve("200 OK").await;
        let result = HealthChecker::http(settings(3, 10, 1000)).wait_for_healthy(&url).await;
        assert!(result.passed);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_redirect_is_healthy_and_5xx_is_not() {
        let checker = HealthChecker::http(settings(1, 10, 1000));
        let redirect = checker.check(&serve("302 Found").await).await;
        assert!(redirect.passed);

        let broken = checker.check(&serve("503 Service Unavailable").await).await;
        assert!(!broken.passed);
        assert_eq!(broken.status_code, Some(503));
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        let url = black_hole().await;
        let checker = HealthChecker::http(settings(5, 20, 100));

        let started = Instant::now();
        let result = checker.wait_for_healthy(&url).await;
        assert!(!result.passed);
        assert_eq!(result.attempts, 5);
        assert!(result.error.unwrap().contains("Timeout"));
        // 5 * (20ms + 100ms) plus scheduling slack.
        assert!(started.elapsed() < Duration::from_millis(2000));
    }

    struct CountingProbe {
        calls: AtomicU32,
        healthy_from: u32,
    }

    #[async_trait]
    impl HealthProbe for CountingProbe {
        async fn probe(&self, _url: &str, _timeout: Duration) -> HealthCheckResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            HealthCheckResult {
                passed: call >= self.healthy_from,
                error: (call < self.healthy_from).then(|| "connection refused".to_string()),
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            healthy_from: 3,
        });
        let checker = HealthChecker::new(probe.clone(), settings(5, 1, 10));
        let result = checker.wait_for_healthy("http://sandbox").await;
        assert!(result.passed);
        assert_eq!(result.attempts, 3);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_exceeds_attempts() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            healthy_from: u32::MAX,
        });
        let checker = HealthChecker::new(probe.clone(), settings(4, 1, 10));
        let result = checker.wait_for_healthy("http://sandbox").await;
        assert!(!result.passed);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }
}
