//! Client for the live analytics backend.
//!
//! The backend is an opaque HTTP JSON service. Every failure mode here is a
//! reason to fall back to local data, never a fault reported to the caller.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::cache::Clock;

/// Default per-request ceiling for backend calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a health verdict is trusted before the next probe.
pub const AVAILABILITY_TTL: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("learner-insights/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend returned {0}")]
    Status(u16),

    #[error("Could not decode backend response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LiveBackend: Send + Sync {
    /// Probes `/health`.
    async fn health(&self) -> Result<(), BackendError>;

    /// GET of one metric family's endpoint.
    async fn fetch(&self, endpoint: &str) -> Result<Value, BackendError>;

    /// POST of a custom query body.
    async fn query(&self, body: &Value) -> Result<Value, BackendError>;
}

pub struct HttpBackend {
    base_url: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn map_send_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Network(err.to_string())
        }
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, BackendError> {
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl LiveBackend for HttpBackend {
    async fn health(&self) -> Result<(), BackendError> {
        let response = self
            .http_client
            .get(self.url("health"))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BackendError::Status(status.as_u16()))
        }
    }

    async fn fetch(&self, endpoint: &str) -> Result<Value, BackendError> {
        let url = self.url(&format!("api/{endpoint}"));
        tracing::debug!(url = %url, "querying analytics backend");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.read_json(response).await
    }

    async fn query(&self, body: &Value) -> Result<Value, BackendError> {
        let response = self
            .http_client
            .post(self.url("api/query"))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.read_json(response).await
    }
}

#[derive(Debug, Clone, Copy)]
struct Verdict {
    available: bool,
    checked_at: Instant,
}

/// Process-wide memo of whether the backend answered its last health probe.
///
/// Races between requests are tolerated: any writer's verdict is as good as
/// another's within the window.
pub struct Availability {
    verdict: Mutex<Option<Verdict>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Availability {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            verdict: Mutex::new(None),
            ttl,
            clock,
        }
    }

    /// The remembered verdict, if still within the window.
    pub fn cached(&self) -> Option<bool> {
        let now = self.clock.now();
        let verdict = self.verdict.lock().unwrap_or_else(|e| e.into_inner());
        (*verdict)
            .filter(|v| now.saturating_duration_since(v.checked_at) < self.ttl)
            .map(|v| v.available)
    }

    pub fn record(&self, available: bool) {
        let mut verdict = self.verdict.lock().unwrap_or_else(|e| e.into_inner());
        *verdict = Some(Verdict {
            available,
            checked_at: self.clock.now(),
        });
    }

    /// Uses the remembered verdict or probes `/health` and remembers the answer.
    pub async fn check(&self, backend: &dyn LiveBackend) -> bool {
        if let Some(available) = self.cached() {
            return available;
        }

        let available = match backend.health().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "analytics backend unavailable");
                false
            }
        };
        self.record(available);
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        healthy: bool,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl LiveBackend for CountingBackend {
        async fn health(&self) -> Result<(), BackendError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.healthy {
                Ok(())
            } else {
                Err(BackendError::Status(503))
            }
        }

        async fn fetch(&self, _endpoint: &str) -> Result<Value, BackendError> {
            Err(BackendError::Status(404))
        }

        async fn query(&self, _body: &Value) -> Result<Value, BackendError> {
            Err(BackendError::Status(404))
        }
    }

    #[test]
    fn client_creation() {
        let backend = HttpBackend::new("http://localhost:8080/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(backend.url("/health"), "http://localhost:8080/health");
        assert_eq!(backend.url("api/metrics"), "http://localhost:8080/api/metrics");
    }

    #[tokio::test]
    async fn availability_is_remembered_for_thirty_seconds() {
        let clock = Arc::new(ManualClock::new());
        let availability = Availability::new(AVAILABILITY_TTL, clock.clone());
        let backend = CountingBackend {
            healthy: false,
            probes: AtomicUsize::new(0),
        };

        assert!(!availability.check(&backend).await);
        clock.advance(Duration::from_secs(29));
        assert!(!availability.check(&backend).await);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        assert!(!availability.check(&backend).await);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_backend_reports_network_error() {
        let backend = HttpBackend::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let result = backend.health().await;
        assert!(matches!(
            result,
            Err(BackendError::Network(_)) | Err(BackendError::Timeout(_))
        ));
    }
}
