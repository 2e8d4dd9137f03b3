// HTTP health probe implementation

use crate::probe::HealthProbe;
use crate::{HealthCheckError, HealthCheckResult, HealthProbeResult};
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;
use wsv_common::HealthEndpoint;

/// HTTP probe configuration
#[derive(Debug, Clone)]
pub struct HttpProbeConfig {
    /// Bound on the whole request, body included
    pub timeout: Duration,
    pub user_agent: String,
    /// Keep the body of successful responses
    pub capture_body: bool,
    /// Bodies larger than this are dropped; the probe still counts as alive
    pub max_body_bytes: usize,
}

impl Default for HttpProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            user_agent: "WSV-Supervisor/1.0".to_string(),
            capture_body: true,
            max_body_bytes: 256 * 1024,
        }
    }
}

impl HttpProbeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// GETs the health endpoint; any 2xx status means alive.
///
/// The underlying client (and its connection pool) lives as long as the
/// probe, so repeated polls reuse connections.
pub struct HttpHealthProbe {
    client: Client<HttpConnector, Empty<Bytes>>,
    config: HttpProbeConfig,
}

impl HttpHealthProbe {
    pub fn new(config: HttpProbeConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, config }
    }

    pub fn config(&self) -> &HttpProbeConfig {
        &self.config
    }

    async fn fetch(&self, url: &str) -> HealthCheckResult<Option<String>> {
        let uri: Uri = url.parse().map_err(|e| HealthCheckError::InvalidResponse {
            url: url.to_string(),
            reason: format!("Invalid URI: {}", e),
        })?;

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("User-Agent", self.config.user_agent.as_str())
            .body(Empty::<Bytes>::new())
            .map_err(|e| HealthCheckError::InvalidResponse {
                url: url.to_string(),
                reason: format!("Failed to build request: {}", e),
            })?;

        let response = self.client.request(request).await.map_err(|e| {
            HealthCheckError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HealthCheckError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if !self.config.capture_body {
            return Ok(None);
        }

        let limit = self.config.max_body_bytes;
        let body_bytes = match Limited::new(response.into_body(), limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                debug!(url, limit, "Health response body over limit; not captured");
                return Ok(None);
            }
            Err(e) => {
                return Err(HealthCheckError::InvalidResponse {
                    url: url.to_string(),
                    reason: format!("Failed to read body: {}", e),
                })
            }
        };

        Ok(Some(String::from_utf8_lossy(&body_bytes).into_owned()))
    }

    /// Single check with the error kept visible.
    pub async fn check(&self, endpoint: &HealthEndpoint) -> HealthCheckResult<Option<String>> {
        let url = endpoint.url();
        match timeout(self.config.timeout, self.fetch(&url)).await {
            Ok(result) => result,
            Err(_) => Err(HealthCheckError::Timeout {
                url,
                timeout: self.config.timeout,
            }),
        }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(HttpProbeConfig::default())
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, endpoint: &HealthEndpoint) -> HealthProbeResult {
        let started = Instant::now();
        let result = self.check(endpoint).await;
        let elapsed = started.elapsed();

        match result {
            Ok(body) => {
                debug!(url = %endpoint, latency_ms = elapsed.as_millis() as u64, "Health probe succeeded");
                HealthProbeResult::alive(elapsed, body)
            }
            Err(e) => {
                debug!(url = %endpoint, error = %e, "Health probe failed");
                HealthProbeResult::dead(e.to_string(), Some(elapsed))
            }
        }
    }
}
