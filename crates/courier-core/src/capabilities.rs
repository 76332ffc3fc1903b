//! Channel capabilities and outbound validation
//!
//! Each adapter reports a [`ChannelCapabilities`] describing what it can
//! deliver. [`ChannelCapabilities::validate`] runs the checks that are the
//! same for every channel; adapters append their own (recipient format,
//! template rules) on top.

use crate::message::{AttachmentType, MessageType, OutgoingMessage};
use serde::{Deserialize, Serialize};

/// Provider rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimits {
    /// Messages per minute
    pub per_minute: Option<u32>,
    /// Messages per hour
    pub per_hour: Option<u32>,
    /// Messages per day
    pub per_day: Option<u32>,
}

/// Feature flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelFeatures {
    /// Pre-approved templates
    pub templates: bool,
    /// Location pins
    pub location: bool,
    /// Contact cards
    pub contacts: bool,
    /// Rich media / interactive content
    pub rich_media: bool,
    /// Voice notes
    pub voice: bool,
    /// Video
    pub video: bool,
    /// Read receipts
    pub read_receipts: bool,
    /// Typing indicators
    pub typing_indicators: bool,
}

/// What a channel can deliver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    /// Attachment types accepted
    pub supported_attachment_types: Vec<AttachmentType>,
    /// Maximum text length in characters
    pub max_message_length: usize,
    /// Maximum attachment size in bytes
    pub max_attachment_size: u64,
    /// Maximum attachments per message
    pub max_attachments: usize,
    /// Provider rate limits
    pub rate_limits: RateLimits,
    /// Feature flags
    pub features: ChannelFeatures,
}

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks the send
    Error,
    /// Informational; the send proceeds
    Warning,
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Offending field
    pub field: String,
    /// Human-readable explanation
    pub message: String,
    /// Machine-readable code
    pub code: String,
    /// Severity
    pub severity: Severity,
}

impl ValidationResult {
    /// An error finding
    #[must_use]
    pub fn error(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
            severity: Severity::Error,
        }
    }

    /// A warning finding
    #[must_use]
    pub fn warning(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
            severity: Severity::Warning,
        }
    }

    /// Whether this finding blocks the send
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Whether any finding is an error
#[must_use]
pub fn has_errors(results: &[ValidationResult]) -> bool {
    results.iter().any(ValidationResult::is_error)
}

impl ChannelCapabilities {
    /// Whether an attachment type is accepted
    #[must_use]
    pub fn supports_attachment(&self, attachment_type: AttachmentType) -> bool {
        self.supported_attachment_types.contains(&attachment_type)
    }

    /// Run the channel-independent checks
    #[must_use]
    pub fn validate(&self, message: &OutgoingMessage) -> Vec<ValidationResult> {
        let mut results = Vec::new();

        if message.recipient_id.trim().is_empty() {
            results.push(ValidationResult::error(
                "recipient_id",
                "recipient is required",
                "RECIPIENT_REQUIRED",
            ));
        }

        let length = message.content.chars().count();
        if length > self.max_message_length {
            results.push(ValidationResult::error(
                "content",
                format!(
                    "message is {length} characters, limit is {}",
                    self.max_message_length
                ),
                "MAX_LENGTH_EXCEEDED",
            ));
        }

        let has_body = !message.content.trim().is_empty()
            || !message.attachments.is_empty()
            || message.template.is_some()
            || message.options.location.is_some()
            || !message.options.contacts.is_empty()
            || message.options.interactive.is_some();
        if !has_body {
            results.push(ValidationResult::error(
                "content",
                "message must carry content, an attachment or a template",
                "EMPTY_MESSAGE",
            ));
        }

        if message.attachments.len() > self.max_attachments {
            results.push(ValidationResult::error(
                "attachments",
                format!(
                    "{} attachments, limit is {}",
                    message.attachments.len(),
                    self.max_attachments
                ),
                "TOO_MANY_ATTACHMENTS",
            ));
        }

        for (i, attachment) in message.attachments.iter().enumerate() {
            if !self.supports_attachment(attachment.attachment_type) {
                results.push(ValidationResult::error(
                    format!("attachments[{i}]"),
                    format!(
                        "attachment type '{}' is not supported",
                        attachment.attachment_type.as_str()
                    ),
                    "UNSUPPORTED_ATTACHMENT",
                ));
            }
            if let Some(size) = attachment.size {
                if size > self.max_attachment_size {
                    results.push(ValidationResult::error(
                        format!("attachments[{i}]"),
                        format!(
                            "attachment is {size} bytes, limit is {}",
                            self.max_attachment_size
                        ),
                        "ATTACHMENT_TOO_LARGE",
                    ));
                }
            }
            if attachment.url.is_none() && attachment.provider_media_id.is_none() {
                results.push(ValidationResult::error(
                    format!("attachments[{i}]"),
                    "attachment needs a url or a provider media id",
                    "ATTACHMENT_SOURCE_MISSING",
                ));
            }
        }

        let features = &self.features;
        match message.message_type {
            MessageType::Template if !features.templates => {
                results.push(ValidationResult::error(
                    "message_type",
                    "templates are not supported on this channel",
                    "TEMPLATES_UNSUPPORTED",
                ));
            }
            MessageType::Template if message.template.is_none() => {
                results.push(ValidationResult::error(
                    "template",
                    "template message without a template reference",
                    "TEMPLATE_REQUIRED",
                ));
            }
            MessageType::Location if !features.location => {
                results.push(ValidationResult::error(
                    "message_type",
                    "location messages are not supported on this channel",
                    "LOCATION_UNSUPPORTED",
                ));
            }
            MessageType::Location if message.options.location.is_none() => {
                results.push(ValidationResult::error(
                    "options.location",
                    "location message without coordinates",
                    "LOCATION_REQUIRED",
                ));
            }
            MessageType::Contact if !features.contacts => {
                results.push(ValidationResult::error(
                    "message_type",
                    "contact messages are not supported on this channel",
                    "CONTACTS_UNSUPPORTED",
                ));
            }
            MessageType::Interactive if !features.rich_media => {
                results.push(ValidationResult::error(
                    "message_type",
                    "interactive messages are not supported on this channel",
                    "INTERACTIVE_UNSUPPORTED",
                ));
            }
            MessageType::Video if !features.video => {
                results.push(ValidationResult::error(
                    "message_type",
                    "video is not supported on this channel",
                    "VIDEO_UNSUPPORTED",
                ));
            }
            _ => {}
        }

        results
    }
}
