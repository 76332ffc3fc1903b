//! Error types for courier-channels
//!
//! Provider transport failures. They never leave an adapter's
//! `send_message`: the delivery pipeline converts them into a `failed`
//! [`courier_core::MessageDeliveryResult`] through the `From` impl below.

use courier_core::utils::Retryable;
use std::time::Duration;
use thiserror::Error;

/// Channel transport error type
#[derive(Debug, Error)]
pub enum Error {
    /// Request never produced a response (connect, timeout, TLS...)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
        /// Parsed `Retry-After` header
        retry_after: Option<Duration>,
    },

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Adapter misconfiguration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the provider throttled the request
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Config(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<Error> for courier_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Status {
                status: 429,
                retry_after,
                ..
            } => courier_core::Error::RateLimited {
                retry_after: retry_after.map(|d| d.as_secs()),
            },
            Error::Config(msg) => courier_core::Error::Configuration(msg),
            other => courier_core::Error::DeliveryFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::ErrorCode;

    fn status(code: u16) -> Error {
        Error::Status {
            status: code,
            body: String::new(),
            retry_after: Some(Duration::from_secs(3)),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!Error::Decode("bad json".into()).is_retryable());
        assert_eq!(status(429).retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_conversion_to_core() {
        let core: courier_core::Error = status(429).into();
        assert!(matches!(
            core,
            courier_core::Error::RateLimited {
                retry_after: Some(3)
            }
        ));

        let core: courier_core::Error = status(500).into();
        assert_eq!(core.code(), ErrorCode::DeliveryFailed);
        assert!(core.to_string().contains("500"));

        let core: courier_core::Error = Error::Config("missing token".into()).into();
        assert_eq!(core.code(), ErrorCode::Configuration);
    }
}
