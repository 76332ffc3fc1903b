//! Error types for courier-core
//!
//! This module provides the error taxonomy shared by adapters and the
//! orchestrator, plus the structured `{success, error: {code, message}}`
//! envelope surfaced to API callers.

use crate::capabilities::ValidationResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Inbound webhook payload does not match the provider shape
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Channel message is structurally incomplete
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// No adapter, or no active tenant channel, for this channel type
    #[error("channel not configured: {0}")]
    ChannelNotConfigured(String),

    /// Outbound message violates channel constraints
    #[error("validation failed: {}", summarize(.0))]
    ValidationFailed(Vec<ValidationResult>),

    /// Template is not approved for the requested language
    #[error("template '{name}' ({language}) is not approved")]
    TemplateNotApproved {
        /// Template name
        name: String,
        /// Template language code
        language: String,
    },

    /// Provider kept answering 429 until retries were exhausted
    #[error("rate limited by provider")]
    RateLimited {
        /// Seconds the provider asked us to wait, if it said
        retry_after: Option<u64>,
    },

    /// Any other provider or network failure
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Optional adapter operation not supported by this channel
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Entity not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence layer failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Media upload/download failure
    #[error("media error: {0}")]
    Media(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Provider event intentionally skipped (echoes, read receipts, ...)
    #[error("ignored: {0}")]
    Ignored(String),

    /// Internal error (serialization, invariants)
    #[error("internal error: {0}")]
    Internal(String),
}

fn summarize(results: &[ValidationResult]) -> String {
    results
        .iter()
        .filter(|r| r.is_error())
        .map(|r| format!("{}: {}", r.field, r.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Stable machine-readable error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// See [`Error::InvalidPayload`]
    InvalidPayload,
    /// See [`Error::InvalidMessage`]
    InvalidMessage,
    /// See [`Error::ChannelNotConfigured`]
    ChannelNotConfigured,
    /// See [`Error::ValidationFailed`]
    ValidationFailed,
    /// See [`Error::TemplateNotApproved`]
    TemplateNotApproved,
    /// See [`Error::RateLimited`]
    RateLimited,
    /// See [`Error::DeliveryFailed`]
    DeliveryFailed,
    /// See [`Error::Unsupported`]
    Unsupported,
    /// See [`Error::NotFound`]
    NotFound,
    /// See [`Error::Storage`]
    Storage,
    /// See [`Error::Media`]
    Media,
    /// See [`Error::Configuration`]
    Configuration,
    /// See [`Error::Ignored`]
    Ignored,
    /// See [`Error::Internal`]
    Internal,
}

impl ErrorCode {
    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::ChannelNotConfigured => "CHANNEL_NOT_CONFIGURED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::TemplateNotApproved => "TEMPLATE_NOT_APPROVED",
            Self::RateLimited => "RATE_LIMITED",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::Unsupported => "UNSUPPORTED",
            Self::NotFound => "NOT_FOUND",
            Self::Storage => "STORAGE",
            Self::Media => "MEDIA",
            Self::Configuration => "CONFIGURATION",
            Self::Ignored => "IGNORED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Machine-readable code for this error
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Error::InvalidMessage(_) => ErrorCode::InvalidMessage,
            Error::ChannelNotConfigured(_) => ErrorCode::ChannelNotConfigured,
            Error::ValidationFailed(_) => ErrorCode::ValidationFailed,
            Error::TemplateNotApproved { .. } => ErrorCode::TemplateNotApproved,
            Error::RateLimited { .. } => ErrorCode::RateLimited,
            Error::DeliveryFailed(_) => ErrorCode::DeliveryFailed,
            Error::Unsupported(_) => ErrorCode::Unsupported,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Storage(_) => ErrorCode::Storage,
            Error::Media(_) => ErrorCode::Media,
            Error::Configuration(_) => ErrorCode::Configuration,
            Error::Ignored(_) => ErrorCode::Ignored,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Convert into the structured API error body
    #[must_use]
    pub fn to_api_error(&self) -> ApiError {
        ApiError {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {e}"))
    }
}

/// Structured error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
}

/// `{success, data?, error?}` envelope returned to API callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded
    pub success: bool,
    /// Payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Successful response
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response
    pub fn err(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_api_error()),
        }
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ValidationResult;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::InvalidPayload("x".into()).code(),
            ErrorCode::InvalidPayload
        );
        assert_eq!(
            Error::RateLimited { retry_after: None }.code().as_str(),
            "RATE_LIMITED"
        );
        assert_eq!(
            Error::TemplateNotApproved {
                name: "welcome".into(),
                language: "en_US".into()
            }
            .code(),
            ErrorCode::TemplateNotApproved
        );
    }

    #[test]
    fn test_validation_failed_message_lists_errors_only() {
        let err = Error::ValidationFailed(vec![
            ValidationResult::error("content", "too long", "MAX_LENGTH"),
            ValidationResult::warning("content", "many segments", "SEGMENTS"),
        ]);
        let text = err.to_string();
        assert!(text.contains("content: too long"));
        assert!(!text.contains("segments"));
    }

    #[test]
    fn test_api_response_serialization() {
        let resp: ApiResponse<()> =
            ApiResponse::err(&Error::ChannelNotConfigured("sms".to_string()));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "CHANNEL_NOT_CONFIGURED");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not configured"));
        assert!(json.get("data").is_none());
    }
}
