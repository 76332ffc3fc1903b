//! E-mail adapter
//!
//! Inbound mail arrives pre-parsed from the inbound-parse transport (see
//! [`parser`]). Outbound mail goes through a SendGrid-style v3 `mail/send`
//! API; replies carry `In-Reply-To`/`References` so clients keep threading.

pub mod parser;

use crate::delivery::{deliver, IdempotencyCache};
use crate::error::{Error, Result};
use crate::transport::{DeliverySettings, HttpTransport};
use crate::util::{is_email_address, mask_for_logging};
use base64::Engine;
use courier_core::{
    AttachmentType, ChannelAdapter, ChannelCapabilities, ChannelFeatures, ChannelMessage,
    ChannelType, EmailEnvelope, MessageDeliveryResult, OutgoingMessage, RateLimits,
    ValidationResult,
};
use serde_json::{json, Value};
use tracing::{debug, info};

pub use parser::{html_to_text, parse_address, InboundEmail};

/// Default mail API base URL
pub const DEFAULT_EMAIL_API: &str = "https://api.sendgrid.com/v3";

/// Subject used when neither the message nor the conversation has one
const FALLBACK_SUBJECT: &str = "(no subject)";

/// E-mail configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// API key
    pub api_key: String,
    /// Sender address
    pub from_address: String,
    /// Sender display name
    pub from_name: Option<String>,
    /// Reply-To address, when replies go elsewhere
    pub reply_to: Option<String>,
    /// API base URL
    pub api_base: String,
    /// Timeout, retry and idempotency settings
    pub delivery: DeliverySettings,
}

impl EmailConfig {
    /// Create with required fields
    #[must_use]
    pub fn new(api_key: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            from_address: from_address.into(),
            from_name: None,
            reply_to: None,
            api_base: DEFAULT_EMAIL_API.to_string(),
            delivery: DeliverySettings::default(),
        }
    }

    /// Create from environment variables
    ///
    /// # Errors
    /// [`Error::Config`] when a required variable is missing.
    pub fn from_env() -> Result<Self> {
        let require = |name: &str| {
            std::env::var(name).map_err(|_| Error::Config(format!("{name} not set")))
        };

        let mut config = Self::new(require("EMAIL_API_KEY")?, require("EMAIL_FROM_ADDRESS")?);
        config.from_name = std::env::var("EMAIL_FROM_NAME").ok();
        config.reply_to = std::env::var("EMAIL_REPLY_TO").ok();
        if let Ok(base) = std::env::var("EMAIL_API_BASE") {
            config.api_base = base;
        }
        Ok(config)
    }

    /// Set the sender display name
    #[must_use]
    pub fn with_from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    /// Set the Reply-To address
    #[must_use]
    pub fn with_reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Point at a different API host
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set delivery settings
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliverySettings) -> Self {
        self.delivery = delivery;
        self
    }
}

/// E-mail adapter
pub struct EmailAdapter {
    config: EmailConfig,
    transport: HttpTransport,
    idempotency: IdempotencyCache,
}

fn recipients(addresses: &[String]) -> Vec<Value> {
    addresses.iter().map(|a| json!({"email": a})).collect()
}

impl EmailAdapter {
    /// Create a new e-mail adapter
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: EmailConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.delivery)?;
        let idempotency = IdempotencyCache::new(
            config.delivery.idempotency_capacity,
            config.delivery.idempotency_ttl,
        );

        info!(from = %config.from_address, "E-mail adapter initialized");

        Ok(Self {
            config,
            transport,
            idempotency,
        })
    }

    /// Create from environment
    ///
    /// # Errors
    /// Returns an error if required variables are missing.
    pub fn from_env() -> Result<Self> {
        Self::new(EmailConfig::from_env()?)
    }

    /// Build the `mail/send` body. Attachment contents are passed in
    /// already base64-encoded, in the same order as `message.attachments`.
    fn build_body(&self, message: &OutgoingMessage, encoded: Vec<String>) -> Value {
        let envelope = message.options.email.clone().unwrap_or_default();

        let mut personalization = json!({"to": [{"email": message.recipient_id}]});
        if !envelope.cc.is_empty() {
            personalization["cc"] = Value::Array(recipients(&envelope.cc));
        }
        if !envelope.bcc.is_empty() {
            personalization["bcc"] = Value::Array(recipients(&envelope.bcc));
        }

        let mut from = json!({"email": self.config.from_address});
        if let Some(name) = &self.config.from_name {
            from["name"] = json!(name);
        }

        let mut content = vec![json!({"type": "text/plain", "value": message.content})];
        if let Some(html) = &envelope.html {
            content.push(json!({"type": "text/html", "value": html}));
        }

        let mut body = json!({
            "personalizations": [personalization],
            "from": from,
            "subject": envelope.subject.as_deref().unwrap_or(FALLBACK_SUBJECT),
            "content": content,
        });
        if let Some(reply_to) = &self.config.reply_to {
            body["reply_to"] = json!({"email": reply_to});
        }

        let headers = thread_headers(message, &envelope);
        if !headers.is_empty() {
            body["headers"] = Value::Object(headers);
        }

        if !encoded.is_empty() {
            let attachments: Vec<Value> = message
                .attachments
                .iter()
                .zip(encoded)
                .map(|(attachment, data)| {
                    json!({
                        "content": data,
                        "filename": attachment.file_name.as_deref().unwrap_or("attachment"),
                        "type": attachment.mime_type.as_deref().unwrap_or("application/octet-stream"),
                        "disposition": if attachment.inline { "inline" } else { "attachment" },
                    })
                })
                .collect();
            body["attachments"] = Value::Array(attachments);
        }
        body
    }

    async fn encode_attachments(&self, message: &OutgoingMessage) -> courier_core::Result<Vec<String>> {
        let mut encoded = Vec::with_capacity(message.attachments.len());
        for attachment in &message.attachments {
            let url = attachment.url.as_deref().ok_or_else(|| {
                courier_core::Error::InvalidMessage("e-mail attachments need a url".to_string())
            })?;
            let response = self
                .transport
                .execute(|client| client.get(url))
                .await
                .map_err(|e| courier_core::Error::Media(format!("attachment fetch failed: {e}")))?;
            let data = response
                .bytes()
                .await
                .map_err(|e| courier_core::Error::Media(format!("attachment fetch failed: {e}")))?;
            encoded.push(base64::engine::general_purpose::STANDARD.encode(&data));
        }
        Ok(encoded)
    }

    async fn dispatch(&self, message: &OutgoingMessage) -> courier_core::Result<Option<String>> {
        let encoded = self.encode_attachments(message).await?;
        let body = self.build_body(message, encoded);
        let url = format!("{}/mail/send", self.config.api_base);

        let response = self
            .transport
            .execute(|client| client.post(&url).bearer_auth(&self.config.api_key).json(&body))
            .await?;
        let provider_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(provider_id)
    }
}

/// `In-Reply-To`, `References` and custom headers for an outbound reply
fn thread_headers(message: &OutgoingMessage, envelope: &EmailEnvelope) -> serde_json::Map<String, Value> {
    let mut headers = serde_json::Map::new();
    for (name, value) in &envelope.headers {
        headers.insert(name.clone(), json!(value));
    }
    if let Some(reply_to) = &message.reply_to_id {
        headers.insert("In-Reply-To".into(), json!(reply_to));
    }
    let mut references = envelope.references.clone();
    if let Some(reply_to) = &message.reply_to_id {
        if !references.contains(reply_to) {
            references.push(reply_to.clone());
        }
    }
    if !references.is_empty() {
        headers.insert("References".into(), json!(references.join(" ")));
    }
    headers
}

#[async_trait::async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn receive_message(&self, payload: &Value) -> courier_core::Result<ChannelMessage> {
        let message = parser::parse(payload)?;
        debug!(
            from = %message.sender_id,
            attachments = message.attachments.len(),
            text = %mask_for_logging(&message.content),
            "E-mail received"
        );
        Ok(message)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: OutgoingMessage,
    ) -> MessageDeliveryResult {
        debug!(
            conversation_id = %conversation_id,
            attachments = message.attachments.len(),
            "Sending e-mail"
        );
        deliver(ChannelType::Email, &self.idempotency, &message, || {
            self.dispatch(&message)
        })
        .await
    }

    fn supported_features(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supported_attachment_types: vec![
                AttachmentType::Image,
                AttachmentType::Video,
                AttachmentType::Audio,
                AttachmentType::Document,
                AttachmentType::Other,
            ],
            max_message_length: 100_000,
            max_attachment_size: 20 * 1024 * 1024,
            max_attachments: 10,
            rate_limits: RateLimits {
                per_minute: Some(600),
                per_hour: None,
                per_day: None,
            },
            features: ChannelFeatures {
                rich_media: true,
                ..ChannelFeatures::default()
            },
        }
    }

    fn validate_message(&self, message: &OutgoingMessage) -> Vec<ValidationResult> {
        let mut results = self.supported_features().validate(message);

        if !message.recipient_id.is_empty() && !is_email_address(&message.recipient_id) {
            results.push(ValidationResult::error(
                "recipient_id",
                format!("'{}' is not an e-mail address", message.recipient_id),
                "INVALID_RECIPIENT",
            ));
        }
        let envelope = message.options.email.as_ref();
        for address in envelope.into_iter().flat_map(|e| e.cc.iter().chain(&e.bcc)) {
            if !is_email_address(address) {
                results.push(ValidationResult::error(
                    "options.email",
                    format!("'{address}' is not an e-mail address"),
                    "INVALID_RECIPIENT",
                ));
            }
        }
        if envelope
            .and_then(|e| e.subject.as_deref())
            .is_none_or(|s| s.trim().is_empty())
        {
            results.push(ValidationResult::warning(
                "options.email.subject",
                format!("no subject, '{FALLBACK_SUBJECT}' will be used"),
                "SUBJECT_MISSING",
            ));
        }
        for (i, attachment) in message.attachments.iter().enumerate() {
            if attachment.url.is_none() {
                results.push(ValidationResult::error(
                    format!("attachments[{i}]"),
                    "e-mail attachments need a url",
                    "MEDIA_URL_REQUIRED",
                ));
            }
        }
        results
    }
}
