//! HTTP transport shared by remote sources
//!
//! Retries live here rather than in the sources: a source issues one logical
//! request per cycle and the transport decides how many attempts that takes.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace};

use crate::config::RetryConfig;
use crate::error::{CollectionError, ConfigurationError};

/// Retry behaviour for a single logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    /// Delay before attempt `n` (1-based) is `backoff * (n - 1)`
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * attempt.saturating_sub(1)
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// HTTP client (reused across requests) plus retry policy and auth token
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        timeout: Duration,
        retry: RetryPolicy,
        token: Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            retry,
            token,
        })
    }

    /// GET `url` and decode the JSON body, retrying per the policy.
    ///
    /// Permission errors and undecodable bodies are returned immediately since
    /// another attempt would not change the outcome.
    #[instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CollectionError> {
        let mut attempt = 1;

        loop {
            let result = self.try_get_json(url).await;

            match result {
                Ok(body) => return Ok(body),
                Err(
                    e @ (CollectionError::PermissionDenied(_) | CollectionError::InvalidResponse(_)),
                ) => return Err(e),
                Err(e) if attempt >= self.retry.max_attempts => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let delay = self.retry.delay_before(attempt);
                    debug!(
                        "attempt {}/{} for {url} failed: {e}, retrying in {delay:?}",
                        attempt - 1,
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CollectionError> {
        trace!("requesting {url}");

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.header("X-MONITORING-SECRET", token);
        }

        let response = request.send().await?;

        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            return Err(CollectionError::PermissionDenied(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(CollectionError::Unreachable(format!("HTTP {status}")));
        }

        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|e| CollectionError::InvalidResponse(e.to_string()))
    }
}
