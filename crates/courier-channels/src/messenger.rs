//! Facebook Messenger adapter
//!
//! Uses the Messenger Platform Send API. Messages the page itself sent come
//! back as echoes and are filtered out on receipt.

use crate::delivery::{deliver, IdempotencyCache};
use crate::error::{Error, Result};
use crate::meta::{
    self, apply_event_message, check_window, customer_message, dropped_caption, send_body,
    window_violation, GraphWebhook, MessagingEvent, SendResponse, DEFAULT_GRAPH_API,
};
use crate::transport::{DeliverySettings, HttpTransport};
use crate::util::{mask_for_logging, parse_timestamp};
use courier_core::{
    AttachmentType, ChannelAdapter, ChannelCapabilities, ChannelDetails, ChannelFeatures,
    ChannelMessage, ChannelType, MediaFile, MessageDeliveryResult, MessageType, OutgoingMessage,
    RateLimits, ValidationResult,
};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Messenger configuration
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Page access token
    pub page_access_token: String,
    /// Page ID
    pub page_id: String,
    /// Webhook verify token
    pub webhook_verify_token: String,
    /// App secret for `X-Hub-Signature-256` verification
    pub app_secret: Option<String>,
    /// Graph API base URL including the version
    pub api_base: String,
    /// Timeout, retry and idempotency settings
    pub delivery: DeliverySettings,
}

impl MessengerConfig {
    /// Create with required fields
    #[must_use]
    pub fn new(page_access_token: impl Into<String>, page_id: impl Into<String>) -> Self {
        Self {
            page_access_token: page_access_token.into(),
            page_id: page_id.into(),
            webhook_verify_token: String::new(),
            app_secret: None,
            api_base: DEFAULT_GRAPH_API.to_string(),
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

        let mut config = Self::new(
            require("MESSENGER_PAGE_ACCESS_TOKEN")?,
            require("MESSENGER_PAGE_ID")?,
        );
        if let Ok(token) = std::env::var("MESSENGER_WEBHOOK_VERIFY_TOKEN") {
            config.webhook_verify_token = token;
        }
        config.app_secret = std::env::var("MESSENGER_APP_SECRET").ok();
        if let Ok(base) = std::env::var("MESSENGER_API_BASE") {
            config.api_base = base;
        }
        Ok(config)
    }

    /// Set webhook verify token
    #[must_use]
    pub fn with_webhook_verify_token(mut self, token: impl Into<String>) -> Self {
        self.webhook_verify_token = token.into();
        self
    }

    /// Set the app secret
    #[must_use]
    pub fn with_app_secret(mut self, secret: impl Into<String>) -> Self {
        self.app_secret = Some(secret.into());
        self
    }

    /// Point at a different Graph API host
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
        format!("{}/{}/messages", self.api_base, self.page_id)
    }
}

#[derive(Debug, Deserialize)]
struct AttachmentUpload {
    attachment_id: String,
}

/// Facebook Messenger adapter
pub struct MessengerAdapter {
    config: MessengerConfig,
    transport: HttpTransport,
    idempotency: IdempotencyCache,
}

impl MessengerAdapter {
    /// Create a new Messenger adapter
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: MessengerConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.delivery)?;
        let idempotency = IdempotencyCache::new(
            config.delivery.idempotency_capacity,
            config.delivery.idempotency_ttl,
        );

        info!(page_id = %config.page_id, "Messenger adapter initialized");

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
        Self::new(MessengerConfig::from_env()?)
    }

    fn parse_event(event: &MessagingEvent) -> courier_core::Result<ChannelMessage> {
        let timestamp = parse_timestamp(event.timestamp.as_ref());

        if let Some(postback) = &event.postback {
            let title = postback
                .title
                .clone()
                .or_else(|| postback.payload.clone())
                .unwrap_or_default();
            let mut message = ChannelMessage::new(ChannelType::Messenger, event.sender.id.clone(), title)
                .with_type(MessageType::Interactive)
                .at(timestamp);
            if let Some(mid) = &postback.mid {
                message = message.with_provider_id(mid.clone());
            }
            message.channel_data.details = ChannelDetails::Messenger {
                psid: event.sender.id.clone(),
                page_id: event.recipient.id.clone(),
                payload: postback.payload.clone(),
            };
            return Ok(message);
        }

        let source = customer_message(event)?;
        let mut message = ChannelMessage::new(ChannelType::Messenger, event.sender.id.clone(), "")
            .with_provider_id(source.mid.clone())
            .at(timestamp);
        apply_event_message(&mut message, source);

        let payload = source.quick_reply.as_ref().map(|q| q.payload.clone());
        if payload.is_some() {
            message.message_type = MessageType::Interactive;
        }
        message.channel_data.details = ChannelDetails::Messenger {
            psid: event.sender.id.clone(),
            page_id: event.recipient.id.clone(),
            payload,
        };
        Ok(message)
    }

    async fn sender_action(&self, recipient_id: &str, action: &str) -> courier_core::Result<()> {
        let url = self.config.messages_url();
        let body = json!({"recipient": {"id": recipient_id}, "sender_action": action});
        self.transport
            .execute(|client| {
                client
                    .post(&url)
                    .bearer_auth(&self.config.page_access_token)
                    .json(&body)
            })
            .await?;
        debug!(recipient = %recipient_id, action = %action, "Messenger sender action sent");
        Ok(())
    }

    async fn dispatch(&self, message: &OutgoingMessage) -> courier_core::Result<Option<String>> {
        check_window(message)?;
        let body = send_body(message)?;
        let url = self.config.messages_url();
        let response: SendResponse = self
            .transport
            .execute_json(|client| {
                client
                    .post(&url)
                    .bearer_auth(&self.config.page_access_token)
                    .json(&body)
            })
            .await?;
        Ok(response.into_message_id())
    }
}

fn upload_type(mime: &str) -> &'static str {
    match AttachmentType::from_mime(mime) {
        AttachmentType::Image | AttachmentType::Sticker => "image",
        AttachmentType::Video => "video",
        AttachmentType::Audio => "audio",
        AttachmentType::Document | AttachmentType::Other => "file",
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for MessengerAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Messenger
    }

    async fn receive_message(&self, payload: &Value) -> courier_core::Result<ChannelMessage> {
        let entry = GraphWebhook::first_entry(payload)?;
        let event = entry.messaging.first().ok_or_else(|| {
            courier_core::Error::InvalidPayload("missing entry[0].messaging[0]".to_string())
        })?;
        let message = Self::parse_event(event)?;

        debug!(
            from = %message.sender_id,
            message_type = message.message_type.as_str(),
            text = %mask_for_logging(&message.content),
            "Messenger message received"
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
            "Sending Messenger message"
        );
        deliver(ChannelType::Messenger, &self.idempotency, &message, || {
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
            max_message_length: 2000,
            max_attachment_size: 25 * 1024 * 1024,
            max_attachments: 1,
            rate_limits: RateLimits::default(),
            features: ChannelFeatures {
                templates: false,
                location: false,
                contacts: false,
                rich_media: true,
                voice: true,
                video: true,
                read_receipts: true,
                typing_indicators: true,
            },
        }
    }

    fn validate_message(&self, message: &OutgoingMessage) -> Vec<ValidationResult> {
        let mut results = self.supported_features().validate(message);
        results.extend(window_violation(message));
        results.extend(dropped_caption(message));
        results
    }

    async fn upload_media(&self, file: MediaFile) -> courier_core::Result<String> {
        let kind = upload_type(&file.mime_type);
        let file_name = file.file_name.clone().unwrap_or_else(|| "upload".to_string());
        let part = Part::bytes(file.data)
            .file_name(file_name)
            .mime_str(&file.mime_type)
            .map_err(|e| courier_core::Error::Media(format!("invalid mime type: {e}")))?;
        let form = Form::new()
            .text(
                "message",
                json!({"attachment": {"type": kind, "payload": {"is_reusable": true}}}).to_string(),
            )
            .part("filedata", part);

        let request = self
            .transport
            .client()
            .post(format!("{}/me/message_attachments", self.config.api_base))
            .bearer_auth(&self.config.page_access_token)
            .multipart(form);
        let uploaded: AttachmentUpload = self
            .transport
            .execute_once(request)
            .await
            .map_err(|e| courier_core::Error::Media(format!("upload failed: {e}")))?
            .json()
            .await
            .map_err(|e| courier_core::Error::Media(format!("invalid upload response: {e}")))?;

        info!(attachment_id = %uploaded.attachment_id, "Messenger attachment uploaded");
        Ok(uploaded.attachment_id)
    }

    /// Messenger marks a whole thread as seen, so this takes the PSID of
    /// the customer rather than a message ID
    async fn mark_as_read(&self, psid: &str) -> courier_core::Result<()> {
        self.sender_action(psid, "mark_seen").await
    }

    async fn send_typing(&self, recipient_id: &str) -> courier_core::Result<()> {
        self.sender_action(recipient_id, "typing_on").await
    }

    fn verify_webhook(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        meta::verify_challenge(mode, token, &self.config.webhook_verify_token, challenge)
    }

    fn verify_signature(&self, body: &[u8], signature: &str) -> courier_core::Result<bool> {
        meta::verify_hub_signature(self.config.app_secret.as_deref(), body, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Error as CoreError;

    fn adapter() -> MessengerAdapter {
        let config = MessengerConfig::new("token", "PAGE1")
            .with_webhook_verify_token("verify")
            .with_app_secret("secret");
        MessengerAdapter::new(config).expect("Failed to create adapter")
    }

    fn webhook(event: Value) -> Value {
        json!({"object": "page", "entry": [{"id": "PAGE1", "time": 1, "messaging": [event]}]})
    }

    #[tokio::test]
    async fn test_text_message() {
        let msg = adapter()
            .receive_message(&webhook(json!({
                "sender": {"id": "PSID1"},
                "recipient": {"id": "PAGE1"},
                "timestamp": 1_700_000_000_000_i64,
                "message": {"mid": "m_1", "text": "Hello page"}
            })))
            .await
            .unwrap();
        assert_eq!(msg.content, "Hello page");
        assert_eq!(msg.provider_message_id(), Some("m_1"));
        assert!(matches!(
            msg.channel_data.details,
            ChannelDetails::Messenger { ref page_id, .. } if page_id == "PAGE1"
        ));
    }

    #[tokio::test]
    async fn test_echo_is_ignored() {
        let result = adapter()
            .receive_message(&webhook(json!({
                "sender": {"id": "PAGE1"},
                "recipient": {"id": "PSID1"},
                "message": {"mid": "m_2", "text": "our reply", "is_echo": true}
            })))
            .await;
        assert!(matches!(result, Err(CoreError::Ignored(_))));
    }

    #[tokio::test]
    async fn test_postback_and_quick_reply() {
        let postback = adapter()
            .receive_message(&webhook(json!({
                "sender": {"id": "PSID1"},
                "recipient": {"id": "PAGE1"},
                "postback": {"title": "Talk to agent", "payload": "AGENT", "mid": "m_3"}
            })))
            .await
            .unwrap();
        assert_eq!(postback.content, "Talk to agent");
        assert_eq!(postback.message_type, MessageType::Interactive);

        let quick = adapter()
            .receive_message(&webhook(json!({
                "sender": {"id": "PSID1"},
                "recipient": {"id": "PAGE1"},
                "message": {"mid": "m_4", "text": "Yes", "quick_reply": {"payload": "YES"}}
            })))
            .await
            .unwrap();
        assert!(matches!(
            quick.channel_data.details,
            ChannelDetails::Messenger { ref payload, .. } if payload.as_deref() == Some("YES")
        ));
    }

    #[tokio::test]
    async fn test_missing_messaging_is_invalid() {
        let result = adapter()
            .receive_message(&json!({"object": "page", "entry": [{"id": "PAGE1"}]}))
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload(_)));
        assert!(err.to_string().contains("messaging[0]"));
    }

    #[test]
    fn test_upload_type() {
        assert_eq!(upload_type("image/png"), "image");
        assert_eq!(upload_type("application/pdf"), "file");
        assert_eq!(upload_type("audio/mpeg"), "audio");
    }

    #[test]
    fn test_signature_requires_valid_hmac() {
        let adapter = adapter();
        assert!(!adapter.verify_signature(b"{}", "sha256=deadbeef").unwrap());
        assert_eq!(adapter.verify_webhook("subscribe", "verify", "c"), Some("c".into()));
    }
}
