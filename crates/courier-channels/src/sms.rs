//! SMS/MMS adapter for a Twilio-style messaging API
//!
//! Inbound webhooks are form posts; the transport hands them over already
//! decoded into a JSON object of string fields. Outbound sends are
//! form-encoded with account credentials and are not retried.

use crate::delivery::{deliver, IdempotencyCache};
use crate::error::{Error, Result};
use crate::transport::{DeliverySettings, HttpTransport};
use crate::util::{is_e164, mask_for_logging};
use courier_core::utils::RetryConfig;
use courier_core::{
    Attachment, AttachmentType, ChannelAdapter, ChannelCapabilities, ChannelDetails,
    ChannelFeatures, ChannelMessage, ChannelType, MediaFile, MessageDeliveryResult,
    OutgoingMessage, RateLimits, ValidationResult,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

/// Default messaging API base URL
pub const DEFAULT_SMS_API: &str = "https://api.twilio.com/2010-04-01";

/// Characters in a single GSM segment
pub const SINGLE_SEGMENT_LENGTH: usize = 160;

/// SMS configuration
#[derive(Debug, Clone)]
pub struct SmsConfig {
    /// Account SID
    pub account_sid: String,
    /// Auth token
    pub auth_token: String,
    /// Sending number (E.164)
    pub from_number: String,
    /// Messaging service, used instead of `from_number` when set
    pub messaging_service_sid: Option<String>,
    /// API base URL
    pub api_base: String,
    /// Timeout and idempotency settings
    pub delivery: DeliverySettings,
}

impl SmsConfig {
    /// Create with required fields
    #[must_use]
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            messaging_service_sid: None,
            api_base: DEFAULT_SMS_API.to_string(),
            delivery: DeliverySettings::default().with_retry(RetryConfig::no_retry()),
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

        let mut config = Self::new(
            require("SMS_ACCOUNT_SID")?,
            require("SMS_AUTH_TOKEN")?,
            require("SMS_FROM_NUMBER")?,
        );
        config.messaging_service_sid = std::env::var("SMS_MESSAGING_SERVICE_SID").ok();
        if let Ok(base) = std::env::var("SMS_API_BASE") {
            config.api_base = base;
        }
        Ok(config)
    }

    /// Send through a messaging service
    #[must_use]
    pub fn with_messaging_service(mut self, sid: impl Into<String>) -> Self {
        self.messaging_service_sid = Some(sid.into());
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

    fn messages_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", self.api_base, self.account_sid)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    sid: String,
}

/// SMS/MMS adapter
pub struct SmsAdapter {
    config: SmsConfig,
    transport: HttpTransport,
    idempotency: IdempotencyCache,
}

fn field<'a>(payload: &'a Value, name: &str) -> Option<&'a str> {
    payload.get(name).and_then(Value::as_str).map(str::trim)
}

impl SmsAdapter {
    /// Create a new SMS adapter
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: SmsConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.delivery)?;
        let idempotency = IdempotencyCache::new(
            config.delivery.idempotency_capacity,
            config.delivery.idempotency_ttl,
        );

        info!(from = %config.from_number, "SMS adapter initialized");

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
        Self::new(SmsConfig::from_env()?)
    }

    fn form_for(&self, message: &OutgoingMessage) -> Vec<(&'static str, String)> {
        let mut form = vec![("To", message.recipient_id.clone())];
        match &self.config.messaging_service_sid {
            Some(sid) => form.push(("MessagingServiceSid", sid.clone())),
            None => form.push(("From", self.config.from_number.clone())),
        }
        if !message.content.is_empty() {
            form.push(("Body", message.content.clone()));
        }
        form.extend(
            message
                .attachments
                .iter()
                .filter_map(|a| a.url.clone())
                .map(|url| ("MediaUrl", url)),
        );
        form
    }

    async fn dispatch(&self, message: &OutgoingMessage) -> courier_core::Result<Option<String>> {
        let form = self.form_for(message);
        let url = self.config.messages_url();
        let created: CreatedMessage = self
            .transport
            .execute_json(|client| {
                client
                    .post(&url)
                    .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
                    .form(&form)
            })
            .await?;
        Ok(Some(created.sid))
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Sms
    }

    async fn receive_message(&self, payload: &Value) -> courier_core::Result<ChannelMessage> {
        if field(payload, "MessageStatus").is_some() && field(payload, "Body").is_none() {
            return Err(courier_core::Error::Ignored("delivery status callback".to_string()));
        }

        let from = field(payload, "From")
            .filter(|f| !f.is_empty())
            .ok_or_else(|| courier_core::Error::InvalidPayload("missing From".to_string()))?;
        let sid = field(payload, "MessageSid")
            .or_else(|| field(payload, "SmsSid"))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| courier_core::Error::InvalidPayload("missing MessageSid".to_string()))?;
        let to = field(payload, "To").unwrap_or_default();
        let num_media: u32 = field(payload, "NumMedia")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        let mut message =
            ChannelMessage::new(ChannelType::Sms, from, field(payload, "Body").unwrap_or_default())
                .with_provider_id(sid);
        for i in 0..num_media {
            let Some(url) = field(payload, &format!("MediaUrl{i}")) else {
                continue;
            };
            let mime = field(payload, &format!("MediaContentType{i}"));
            let kind = mime.map_or(AttachmentType::Other, AttachmentType::from_mime);
            let mut attachment = Attachment::from_url(kind, url);
            attachment.mime_type = mime.map(str::to_string);
            message.attachments.push(attachment);
        }
        if message.content.is_empty() {
            if let Some(first) = message.attachments.first() {
                message.message_type = first.attachment_type.message_type();
            }
        }
        message.channel_data.details = ChannelDetails::Sms {
            from: from.to_string(),
            to: to.to_string(),
            num_media,
        };

        debug!(
            from = %from,
            num_media,
            text = %mask_for_logging(&message.content),
            "SMS received"
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
            text = %mask_for_logging(&message.content),
            "Sending SMS"
        );
        deliver(ChannelType::Sms, &self.idempotency, &message, || {
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
            ],
            max_message_length: 1600,
            max_attachment_size: 5 * 1024 * 1024,
            max_attachments: 10,
            rate_limits: RateLimits {
                per_minute: Some(60),
                per_hour: None,
                per_day: None,
            },
            features: ChannelFeatures::default(),
        }
    }

    fn validate_message(&self, message: &OutgoingMessage) -> Vec<ValidationResult> {
        let mut results = self.supported_features().validate(message);

        if !message.recipient_id.is_empty() && !is_e164(&message.recipient_id) {
            results.push(ValidationResult::error(
                "recipient_id",
                format!("'{}' is not an E.164 number", message.recipient_id),
                "INVALID_RECIPIENT",
            ));
        }
        let length = message.content.chars().count();
        if length > SINGLE_SEGMENT_LENGTH {
            results.push(ValidationResult::warning(
                "content",
                format!("{length} characters will be sent as multiple segments"),
                "MULTI_SEGMENT",
            ));
        }
        for (i, attachment) in message.attachments.iter().enumerate() {
            if attachment.url.is_none() {
                results.push(ValidationResult::error(
                    format!("attachments[{i}]"),
                    "MMS media must be a public URL",
                    "MEDIA_URL_REQUIRED",
                ));
            }
        }
        results
    }

    /// `media_id` is the media URL delivered in the webhook
    async fn download_media(&self, media_id: &str) -> courier_core::Result<MediaFile> {
        let response = self
            .transport
            .execute(|client| {
                client
                    .get(media_id)
                    .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            })
            .await
            .map_err(|e| courier_core::Error::Media(format!("media download failed: {e}")))?;
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = response
            .bytes()
            .await
            .map_err(|e| courier_core::Error::Media(format!("media download failed: {e}")))?;
        Ok(MediaFile::new(data.to_vec(), mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{Error as CoreError, MessageType};
    use serde_json::json;

    fn adapter() -> SmsAdapter {
        SmsAdapter::new(SmsConfig::new("AC1", "secret", "+15550000000")).expect("adapter")
    }

    #[tokio::test]
    async fn test_inbound_sms() {
        let msg = adapter()
            .receive_message(&json!({
                "MessageSid": "SM1",
                "From": "+15551234567",
                "To": "+15550000000",
                "Body": "Where is my parcel?",
                "NumMedia": "0"
            }))
            .await
            .unwrap();
        assert_eq!(msg.sender_id, "+15551234567");
        assert_eq!(msg.content, "Where is my parcel?");
        assert_eq!(msg.provider_message_id(), Some("SM1"));
    }

    #[tokio::test]
    async fn test_inbound_mms() {
        let msg = adapter()
            .receive_message(&json!({
                "MessageSid": "MM1",
                "From": "+15551234567",
                "Body": "",
                "NumMedia": "2",
                "MediaUrl0": "https://media/1",
                "MediaContentType0": "image/jpeg",
                "MediaUrl1": "https://media/2",
                "MediaContentType1": "application/pdf"
            }))
            .await
            .unwrap();
        assert_eq!(msg.attachments.len(), 2);
        assert_eq!(msg.message_type, MessageType::Image);
        assert_eq!(msg.attachments[1].attachment_type, AttachmentType::Document);
        assert!(matches!(msg.channel_data.details, ChannelDetails::Sms { num_media: 2, .. }));
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let adapter = adapter();
        assert!(matches!(
            adapter.receive_message(&json!({"Body": "hi", "MessageSid": "SM1"})).await,
            Err(CoreError::InvalidPayload(_))
        ));
        assert!(matches!(
            adapter.receive_message(&json!({"Body": "hi", "From": "+15551234567"})).await,
            Err(CoreError::InvalidPayload(_))
        ));
        assert!(matches!(
            adapter
                .receive_message(&json!({"MessageSid": "SM1", "MessageStatus": "delivered"}))
                .await,
            Err(CoreError::Ignored(_))
        ));
    }

    #[test]
    fn test_form_uses_messaging_service_when_set() {
        let adapter = SmsAdapter::new(
            SmsConfig::new("AC1", "secret", "+15550000000").with_messaging_service("MG1"),
        )
        .expect("adapter");
        let msg = OutgoingMessage::text("+15551234567", "hi")
            .with_attachment(Attachment::from_url(AttachmentType::Image, "https://x/a.png"));
        let form = adapter.form_for(&msg);
        assert!(form.contains(&("MessagingServiceSid", "MG1".to_string())));
        assert!(!form.iter().any(|(k, _)| *k == "From"));
        assert!(form.contains(&("MediaUrl", "https://x/a.png".to_string())));
    }

    #[test]
    fn test_validation() {
        let adapter = adapter();
        let long = OutgoingMessage::text("+15551234567", "x".repeat(200));
        let results = adapter.validate_message(&long);
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_error());
        assert_eq!(results[0].code, "MULTI_SEGMENT");

        let bad = adapter.validate_message(&OutgoingMessage::text("5551234567", "hi"));
        assert!(bad.iter().any(|r| r.code == "INVALID_RECIPIENT"));

        let media = OutgoingMessage::media(
            "+15551234567",
            Attachment::from_provider_media(AttachmentType::Image, "M1"),
        );
        assert!(adapter
            .validate_message(&media)
            .iter()
            .any(|r| r.code == "MEDIA_URL_REQUIRED"));
    }

    #[test]
    fn test_no_retry_by_default() {
        let config = SmsConfig::new("AC1", "secret", "+15550000000");
        assert_eq!(config.delivery.retry.max_attempts, 1);
        assert!(config.messages_url().ends_with("/Accounts/AC1/Messages.json"));
    }
}
