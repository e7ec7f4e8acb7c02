//! Delivery of snapshots to the ingest endpoint.
//!
//! [`Transport`] is one attempt. [`send_with_retry`] wraps any transport in
//! a bounded retry loop with quadratic backoff that yields to shutdown.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use tracing::{Span, debug, warn};

use crate::error::{Error, Result};
use crate::model::Snapshot;
use crate::shutdown::Shutdown;

/// Response bodies are echoed into errors up to this many bytes.
const MAX_ERROR_BODY: usize = 512;

/// A single delivery attempt for one snapshot.
///
/// Every failure is reported as [`Error::Transport`]; there is no
/// distinction between retryable and permanent failures.
pub trait Transport: Send + Sync {
    fn send(&self, payload: &Snapshot) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ingest_url: String,
    /// Bound on each attempt, connect through body.
    pub timeout: Duration,
    pub bearer_token: Option<SecretString>,
    pub user_agent: String,
}

impl TransportConfig {
    pub fn new(ingest_url: impl Into<String>) -> Self {
        Self {
            ingest_url: ingest_url.into(),
            timeout: Duration::from_secs(10),
            bearer_token: None,
            user_agent: format!("posture-agent/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// POSTs each snapshot as JSON. Any 2xx is success.
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
    span: Span,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let span = tracing::info_span!("transport", url = %config.ingest_url);
        Ok(Self {
            client,
            config,
            span,
        })
    }

    /// Replace the span this transport logs under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn ingest_url(&self) -> &str {
        &self.config.ingest_url
    }
}

impl Transport for HttpTransport {
    async fn send(&self, payload: &Snapshot) -> Result<()> {
        let body = serde_json::to_vec(payload)?;

        let mut request = self
            .client
            .post(&self.config.ingest_url)
            .timeout(self.config.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.config.user_agent)
            .body(body);
        if let Some(ref token) = self.config.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_utf8(&mut body, MAX_ERROR_BODY);
            return Err(Error::Transport(format!("HTTP {status}: {body}")));
        }

        debug!(parent: &self.span, status = status.as_u16(), "snapshot delivered");
        Ok(())
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded retry settings for [`send_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Base unit of the backoff; the wait before attempt `n` is `n² × unit`.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Wait before the zero-based attempt `attempt`.
///
/// Quadratic, not exponential: 0, 1, 4, 9, 16 … units.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit.saturating_mul(attempt.saturating_mul(attempt))
}

/// Try `transport.send` up to `policy.max_attempts` times.
///
/// Returns the last error once attempts are exhausted, or
/// [`Error::Cancelled`] as soon as `shutdown` fires during a send or a wait.
pub async fn send_with_retry<T: Transport>(
    transport: &T,
    payload: &Snapshot,
    policy: &RetryPolicy,
    shutdown: &Shutdown,
) -> Result<()> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = Error::Transport("no delivery attempt made".to_string());

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = backoff_delay(attempt, policy.backoff_unit);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
            tokio::select! {
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let result = tokio::select! {
            _ = shutdown.cancelled() => return Err(Error::Cancelled),
            result = transport.send(payload) => result,
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt = attempt + 1, max_attempts, error = %e, "delivery attempt failed");
                last_err = e;
            }
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_quadratic() {
        let unit = Duration::from_secs(1);
        let delays: Vec<u64> = (0..5).map(|n| backoff_delay(n, unit).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 4, 9, 16]);

        let unit = Duration::from_millis(10);
        assert_eq!(backoff_delay(3, unit), Duration::from_millis(90));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        assert_eq!(backoff_delay(u32::MAX, Duration::MAX), Duration::MAX);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut s = "ééééé".to_string();
        truncate_utf8(&mut s, 3);
        assert_eq!(s, "é");

        let mut short = "ok".to_string();
        truncate_utf8(&mut short, 10);
        assert_eq!(short, "ok");
    }

    #[test]
    fn default_policy_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff_unit, Duration::from_secs(1));
    }
}
