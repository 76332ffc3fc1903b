//! Web chat adapter
//!
//! Web chat has no external provider. Inbound payloads are built locally by
//! the chat widget transport; outbound messages, typing and presence are
//! published on a broadcast outbox that the websocket layer subscribes to.

use crate::delivery::{deliver, IdempotencyCache};
use crate::error::Result;
use crate::transport::DeliverySettings;
use crate::util::{mask_for_logging, parse_timestamp};
use chrono::{DateTime, Utc};
use courier_core::{
    Attachment, AttachmentType, ChannelAdapter, ChannelCapabilities, ChannelDetails,
    ChannelFeatures, ChannelMessage, ChannelType, MessageDeliveryResult, OutgoingMessage,
    RateLimits, SenderType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Web chat configuration
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Maximum message length
    pub max_message_length: usize,
    /// Outbox buffer per subscriber
    pub outbox_capacity: usize,
    /// Idempotency settings (timeout and retry are unused)
    pub delivery: DeliverySettings,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            max_message_length: 5000,
            outbox_capacity: 256,
            delivery: DeliverySettings::default(),
        }
    }
}

impl WebConfig {
    /// Set the maximum message length
    #[must_use]
    pub fn with_max_message_length(mut self, length: usize) -> Self {
        self.max_message_length = length;
        self
    }

    /// Set the outbox capacity
    #[must_use]
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity;
        self
    }
}

/// Event delivered to connected web clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebOutboxEvent {
    /// Outbound chat message
    Message {
        /// Conversation
        conversation_id: String,
        /// Message ID assigned by the adapter
        message_id: String,
        /// Recipient (visitor) ID
        recipient_id: String,
        /// Text
        content: String,
        /// Attachments
        attachments: Vec<Attachment>,
        /// Quoted message
        reply_to_id: Option<String>,
        /// Send time
        timestamp: DateTime<Utc>,
    },
    /// Agent is typing
    Typing {
        /// Recipient (visitor) ID
        recipient_id: String,
    },
    /// Agent availability
    Presence {
        /// Online flag
        online: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebAttachment {
    #[serde(rename = "type")]
    kind: Option<AttachmentType>,
    url: String,
    #[serde(alias = "file_name")]
    file_name: Option<String>,
    #[serde(alias = "mime_type")]
    mime_type: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebPayload {
    #[serde(default)]
    content: String,
    #[serde(alias = "sender_id")]
    sender_id: Option<String>,
    #[serde(alias = "sender_type")]
    sender_type: Option<SenderType>,
    #[serde(default)]
    attachments: Vec<WebAttachment>,
    #[serde(alias = "session_id")]
    session_id: Option<String>,
    #[serde(alias = "message_id")]
    message_id: Option<String>,
    #[serde(alias = "conversation_id")]
    conversation_id: Option<String>,
    #[serde(alias = "reply_to_id")]
    reply_to_id: Option<String>,
    timestamp: Option<Value>,
}

/// Web chat adapter
pub struct WebAdapter {
    config: WebConfig,
    outbox: broadcast::Sender<WebOutboxEvent>,
    idempotency: IdempotencyCache,
}

impl WebAdapter {
    /// Create a new web chat adapter
    ///
    /// # Errors
    /// Kept fallible for symmetry with the provider adapters.
    pub fn new(config: WebConfig) -> Result<Self> {
        let (outbox, _) = broadcast::channel(config.outbox_capacity.max(1));
        let idempotency = IdempotencyCache::new(
            config.delivery.idempotency_capacity,
            config.delivery.idempotency_ttl,
        );
        Ok(Self {
            config,
            outbox,
            idempotency,
        })
    }

    /// Subscribe to outbound events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WebOutboxEvent> {
        self.outbox.subscribe()
    }

    /// Number of connected subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.outbox.receiver_count()
    }

    fn publish(&self, conversation_id: &str, message: &OutgoingMessage) -> courier_core::Result<Option<String>> {
        let message_id = Uuid::new_v4().to_string();
        let event = WebOutboxEvent::Message {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.clone(),
            recipient_id: message.recipient_id.clone(),
            content: message.content.clone(),
            attachments: message.attachments.clone(),
            reply_to_id: message.reply_to_id.clone(),
            timestamp: Utc::now(),
        };
        self.outbox.send(event).map_err(|_| {
            courier_core::Error::DeliveryFailed("no web client connected".to_string())
        })?;
        Ok(Some(message_id))
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for WebAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Web
    }

    async fn receive_message(&self, payload: &Value) -> courier_core::Result<ChannelMessage> {
        let payload: WebPayload = serde_json::from_value(payload.clone())
            .map_err(|e| courier_core::Error::InvalidPayload(format!("web chat: {e}")))?;
        let sender_id = payload
            .sender_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| courier_core::Error::InvalidPayload("missing senderId".to_string()))?;

        let mut message = ChannelMessage::new(ChannelType::Web, sender_id, payload.content)
            .at(parse_timestamp(payload.timestamp.as_ref()));
        message.sender_type = payload.sender_type.unwrap_or(SenderType::Customer);
        if let Some(id) = payload.message_id {
            message = message.with_provider_id(id);
        }
        if let Some(conversation_id) = payload.conversation_id {
            message = message.in_conversation(conversation_id);
        }
        if let Some(parent) = payload.reply_to_id {
            message = message.replying_to(parent);
        }
        for part in payload.attachments {
            let kind = part
                .kind
                .or_else(|| part.mime_type.as_deref().map(AttachmentType::from_mime))
                .unwrap_or(AttachmentType::Other);
            let mut attachment = Attachment::from_url(kind, part.url);
            attachment.file_name = part.file_name;
            attachment.mime_type = part.mime_type;
            attachment.size = part.size;
            message.attachments.push(attachment);
        }
        if message.content.trim().is_empty() {
            if let Some(first) = message.attachments.first() {
                message.message_type = first.attachment_type.message_type();
            }
        }
        message.channel_data.details = ChannelDetails::Web {
            session_id: payload.session_id,
        };

        debug!(
            from = %message.sender_id,
            text = %mask_for_logging(&message.content),
            "Web chat message received"
        );
        Ok(message)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: OutgoingMessage,
    ) -> MessageDeliveryResult {
        deliver(ChannelType::Web, &self.idempotency, &message, || async {
            self.publish(conversation_id, &message)
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
            max_message_length: self.config.max_message_length,
            max_attachment_size: 10 * 1024 * 1024,
            max_attachments: 5,
            rate_limits: RateLimits::default(),
            features: ChannelFeatures {
                rich_media: true,
                voice: true,
                video: true,
                typing_indicators: true,
                read_receipts: false,
                ..ChannelFeatures::default()
            },
        }
    }

    async fn send_typing(&self, recipient_id: &str) -> courier_core::Result<()> {
        let event = WebOutboxEvent::Typing {
            recipient_id: recipient_id.to_string(),
        };
        if self.outbox.send(event).is_err() {
            debug!(recipient = %recipient_id, "No web client connected for typing signal");
        }
        Ok(())
    }

    async fn set_presence(&self, online: bool) -> courier_core::Result<()> {
        if self.outbox.send(WebOutboxEvent::Presence { online }).is_err() {
            debug!(online, "No web client connected for presence signal");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{Error as CoreError, MessageType};
    use serde_json::json;

    fn adapter() -> WebAdapter {
        WebAdapter::new(WebConfig::default()).expect("adapter")
    }

    #[tokio::test]
    async fn test_receive_camel_and_snake_case() {
        let adapter = adapter();
        let camel = adapter
            .receive_message(&json!({
                "content": "Hello",
                "senderId": "visitor-1",
                "senderType": "customer",
                "sessionId": "s1",
                "messageId": "web-1",
                "conversationId": "conv-1"
            }))
            .await
            .unwrap();
        assert_eq!(camel.sender_id, "visitor-1");
        assert_eq!(camel.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(camel.provider_message_id(), Some("web-1"));
        assert!(matches!(
            camel.channel_data.details,
            ChannelDetails::Web { ref session_id } if session_id.as_deref() == Some("s1")
        ));

        let snake = adapter
            .receive_message(&json!({
                "sender_id": "agent-7",
                "sender_type": "agent",
                "attachments": [{"url": "https://cdn/a.png", "mime_type": "image/png"}]
            }))
            .await
            .unwrap();
        assert_eq!(snake.sender_type, SenderType::Agent);
        assert_eq!(snake.message_type, MessageType::Image);
    }

    #[tokio::test]
    async fn test_missing_sender_is_invalid() {
        let result = adapter().receive_message(&json!({"content": "hi"})).await;
        assert!(matches!(result, Err(CoreError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_send_publishes_to_subscribers() {
        let adapter = adapter();
        let mut rx = adapter.subscribe();

        let result = adapter
            .send_message("conv-1", OutgoingMessage::text("visitor-1", "Hi there"))
            .await;
        assert!(result.is_sent());

        match rx.recv().await.unwrap() {
            WebOutboxEvent::Message {
                conversation_id,
                content,
                message_id,
                ..
            } => {
                assert_eq!(conversation_id, "conv-1");
                assert_eq!(content, "Hi there");
                assert_eq!(result.channel_message_id.as_deref(), Some(message_id.as_str()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_without_subscribers_fails() {
        let result = adapter()
            .send_message("conv-1", OutgoingMessage::text("visitor-1", "Hi"))
            .await;
        assert!(!result.is_sent());
        assert_eq!(result.error_code, Some(courier_core::ErrorCode::DeliveryFailed));
    }

    #[tokio::test]
    async fn test_typing_and_presence() {
        let adapter = adapter();
        assert!(adapter.send_typing("visitor-1").await.is_ok());

        let mut rx = adapter.subscribe();
        adapter.set_presence(true).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), WebOutboxEvent::Presence { online: true });
    }

    #[test]
    fn test_length_limit() {
        let adapter = WebAdapter::new(WebConfig::default().with_max_message_length(5)).unwrap();
        let results = adapter.validate_message(&OutgoingMessage::text("v", "too long"));
        assert!(results.iter().any(|r| r.code == "MAX_LENGTH_EXCEEDED"));
    }
}
