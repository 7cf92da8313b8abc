//! Polls the forwarded port until the remote helper answers.
//!
//! Any HTTP response counts as ready; the status code is not inspected.
//! Connection refused/reset means "not yet".

use std::time::{Duration, Instant};

use crate::error::SessionError;

/// Timeout for a single health probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause after a failed probe so the loop does not spin.
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Default limit for the whole readiness wait.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Health prober for the forwarded helper.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    client: reqwest::Client,
    retry_delay: Duration,
}

impl ReadinessProber {
    pub fn new() -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            // The helper is on loopback; a proxy from the environment would only get in the way.
            .no_proxy()
            .build()
            .map_err(|e| SessionError::Io(std::io::Error::other(e)))?;
        Ok(Self {
            client,
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// One GET against `url`; `true` if anything answered.
    pub async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) => {
                tracing::debug!(url, status = %resp.status(), "health probe answered");
                true
            }
            Err(e) => {
                tracing::trace!(url, error = %e, "health probe failed");
                false
            }
        }
    }

    /// Probe until one attempt succeeds or `timeout` elapses.
    pub async fn wait_until_ready(&self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let start = Instant::now();
        let mut attempts: u64 = 0;
        let poll = async {
            loop {
                attempts += 1;
                if self.probe(url).await {
                    return;
                }
                tokio::time::sleep(self.retry_delay).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(()) => {
                tracing::info!(
                    url,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "code-server is ready"
                );
                Ok(())
            }
            Err(_) => Err(SessionError::ReadinessTimeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }
}
