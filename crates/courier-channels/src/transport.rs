//! Provider HTTP transport
//!
//! Every outbound provider call goes through [`HttpTransport::execute`]:
//! a hard per-request timeout, then retries with exponential backoff on
//! 429/5xx/connection failures, honoring `Retry-After`.

use crate::error::{Error, Result};
use courier_core::utils::{retry_with_backoff, RetryConfig};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum characters of an error body kept in [`Error::Status`]
const MAX_ERROR_BODY: usize = 512;

/// Per-adapter delivery settings
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverySettings {
    /// Hard timeout for a single provider request
    pub request_timeout: Duration,
    /// Retry policy for transient provider failures
    pub retry: RetryConfig,
    /// How long a successful send is remembered for idempotency
    pub idempotency_ttl: Duration,
    /// Maximum remembered sends
    pub idempotency_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            idempotency_ttl: Duration::from_secs(300),
            idempotency_capacity: 10_000,
        }
    }
}

impl DeliverySettings {
    /// Set the request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the idempotency window
    #[must_use]
    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    /// Set the idempotency capacity
    #[must_use]
    pub fn with_idempotency_capacity(mut self, capacity: usize) -> Self {
        self.idempotency_capacity = capacity;
        self
    }
}

/// Shared HTTP client with timeout and retry
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpTransport {
    /// Build a transport from delivery settings
    ///
    /// # Errors
    /// [`Error::Config`] when the HTTP client cannot be built.
    pub fn new(settings: &DeliverySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            retry: settings.retry.clone(),
        })
    }

    /// Underlying client
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request, retrying transient failures.
    ///
    /// `build` is called once per attempt since request bodies are consumed.
    ///
    /// # Errors
    /// The last attempt's error once retries are exhausted.
    pub async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        retry_with_backoff(&self.retry, || {
            let request = build(&self.client);
            async move { check_status(request.send().await?).await }
        })
        .await
        .map_err(|e| {
            if e.attempts > 1 {
                warn!(attempts = e.attempts, error = %e.last_error, "Provider request failed after retries");
            }
            e.last_error
        })
    }

    /// Send a request exactly once (used for non-replayable bodies such as
    /// multipart uploads)
    ///
    /// # Errors
    /// [`Error::Http`] or [`Error::Status`].
    pub async fn execute_once(&self, request: RequestBuilder) -> Result<Response> {
        check_status(request.send().await?).await
    }

    /// [`HttpTransport::execute`] and decode a JSON body
    ///
    /// # Errors
    /// Transport errors, or [`Error::Decode`] for an unexpected body.
    pub async fn execute_json<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let response = self.execute(build).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Turn a non-success response into [`Error::Status`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY)
        .collect();

    if status == StatusCode::TOO_MANY_REQUESTS {
        debug!(retry_after = ?retry_after, "Provider rate limited the request");
    }
    Err(Error::Status {
        status: status.as_u16(),
        body,
        retry_after,
    })
}

/// Parse a `Retry-After` value: delta seconds or an HTTP date
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.signed_duration_since(chrono::Utc::now());
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        // Dates in the past mean "now"
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_default_settings() {
        let settings = DeliverySettings::default();
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.idempotency_ttl, Duration::from_secs(300));
        assert!(HttpTransport::new(&settings).is_ok());
    }
}
