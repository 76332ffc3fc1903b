//! Common utilities for channel adapters
//!
//! Helpers shared by several adapters: log masking, phone/e-mail recipient
//! checks and provider timestamp parsing.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of text to log (to prevent sensitive data exposure)
pub const MAX_LOG_TEXT_LENGTH: usize = 50;

/// Patterns that indicate potentially sensitive content
pub const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "api-key",
    "bearer",
    "authorization",
    "credential",
    "private",
    "-----begin",
];

static EMAIL_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9._%+'-]+@[a-z0-9.-]+\.[a-z]{2,}$")
        .expect("EMAIL_ADDRESS is a compile-time constant")
});

static E164: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+[1-9]\d{7,14}$").expect("E164 is a compile-time constant")
});

/// Mask potentially sensitive text for logging
///
/// Checks for sensitive patterns and truncates long messages
/// to prevent accidental exposure of sensitive data in logs.
///
/// # Examples
/// ```
/// use courier_channels::util::mask_for_logging;
///
/// assert!(mask_for_logging("my password is secret123").contains("REDACTED"));
/// assert_eq!(mask_for_logging("Hello"), "Hello");
/// ```
#[must_use]
pub fn mask_for_logging(text: &str) -> String {
    let lower = text.to_lowercase();

    for pattern in SENSITIVE_PATTERNS {
        if lower.contains(pattern) {
            return "[REDACTED - potentially sensitive content]".to_string();
        }
    }

    if text.chars().count() > MAX_LOG_TEXT_LENGTH {
        let head: String = text.chars().take(MAX_LOG_TEXT_LENGTH).collect();
        format!("{head}...[truncated]")
    } else {
        text.to_string()
    }
}

/// Whether `value` looks like a single e-mail address
#[must_use]
pub fn is_email_address(value: &str) -> bool {
    EMAIL_ADDRESS.is_match(value.trim())
}

/// Whether `value` is an E.164 phone number (`+` and 8-15 digits)
#[must_use]
pub fn is_e164(value: &str) -> bool {
    E164.is_match(value.trim())
}

/// Parse a provider timestamp: unix seconds as string or number, or RFC 3339.
/// Falls back to now.
#[must_use]
pub fn parse_timestamp(value: Option<&serde_json::Value>) -> DateTime<Utc> {
    let parsed = match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(from_unix),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok().map_or_else(
            || {
                DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            },
            from_unix,
        ),
        _ => None,
    };
    parsed.unwrap_or_else(Utc::now)
}

/// Unix seconds, or milliseconds for values too large to be seconds
fn from_unix(value: i64) -> Option<DateTime<Utc>> {
    if value > 100_000_000_000 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}
