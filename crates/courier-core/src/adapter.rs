//! Channel adapter contract
//!
//! Every channel adapter translates between a provider's wire format and the
//! internal message model. `send_message` never fails: provider and network
//! errors come back as a `failed` [`MessageDeliveryResult`].

use crate::capabilities::{ChannelCapabilities, ValidationResult};
use crate::error::{Error, Result};
use crate::message::{ChannelMessage, ChannelType, MessageDeliveryResult, OutgoingMessage};
use tracing::debug;

/// Binary media fetched from or sent to a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Raw bytes
    pub data: Vec<u8>,
    /// MIME type
    pub mime_type: String,
    /// File name, if known
    pub file_name: Option<String>,
}

impl MediaFile {
    /// Create a media file
    #[must_use]
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    /// Set the file name
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// Trait for channel adapters
#[async_trait::async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Get the channel type
    fn channel_type(&self) -> ChannelType;

    /// Translate a provider webhook payload into a channel message.
    ///
    /// # Errors
    /// [`Error::InvalidPayload`] when the payload does not have the provider
    /// shape, [`Error::Ignored`] for events that must not be ingested.
    async fn receive_message(&self, payload: &serde_json::Value) -> Result<ChannelMessage>;

    /// Send a message. Provider failures are reported in the result.
    async fn send_message(
        &self,
        conversation_id: &str,
        message: OutgoingMessage,
    ) -> MessageDeliveryResult;

    /// Describe what this channel can deliver
    fn supported_features(&self) -> ChannelCapabilities;

    /// Check an outbound message against channel constraints
    fn validate_message(&self, message: &OutgoingMessage) -> Vec<ValidationResult> {
        self.supported_features().validate(message)
    }

    /// Download provider-hosted media
    async fn download_media(&self, _media_id: &str) -> Result<MediaFile> {
        Err(Error::Unsupported(format!(
            "{} does not support media download",
            self.channel_type()
        )))
    }

    /// Upload media, returning the provider media ID
    async fn upload_media(&self, _file: MediaFile) -> Result<String> {
        Err(Error::Unsupported(format!(
            "{} does not support media upload",
            self.channel_type()
        )))
    }

    /// Mark an inbound message as read
    async fn mark_as_read(&self, _provider_message_id: &str) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} does not support read receipts",
            self.channel_type()
        )))
    }

    /// Send a typing indicator
    async fn send_typing(&self, recipient_id: &str) -> Result<()> {
        debug!(channel = %self.channel_type(), recipient = %recipient_id, "Typing indicator not supported, skipping");
        Ok(())
    }

    /// Announce agent presence
    async fn set_presence(&self, online: bool) -> Result<()> {
        debug!(channel = %self.channel_type(), online, "Presence not supported, skipping");
        Ok(())
    }

    /// Webhook subscription handshake. Returns the challenge when the token matches.
    fn verify_webhook(&self, _mode: &str, _token: &str, _challenge: &str) -> Option<String> {
        None
    }

    /// Verify a webhook body signature
    fn verify_signature(&self, _body: &[u8], _signature: &str) -> Result<bool> {
        Err(Error::Unsupported(format!(
            "{} does not sign webhooks",
            self.channel_type()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ChannelFeatures, RateLimits};

    struct Minimal;

    #[async_trait::async_trait]
    impl ChannelAdapter for Minimal {
        fn channel_type(&self) -> ChannelType {
            ChannelType::Web
        }

        async fn receive_message(&self, _payload: &serde_json::Value) -> Result<ChannelMessage> {
            Err(Error::InvalidPayload("unused".into()))
        }

        async fn send_message(&self, _c: &str, _m: OutgoingMessage) -> MessageDeliveryResult {
            MessageDeliveryResult::sent(None)
        }

        fn supported_features(&self) -> ChannelCapabilities {
            ChannelCapabilities {
                supported_attachment_types: vec![],
                max_message_length: 100,
                max_attachment_size: 0,
                max_attachments: 0,
                rate_limits: RateLimits::default(),
                features: ChannelFeatures::default(),
            }
        }
    }

    #[tokio::test]
    async fn test_optional_operations_are_unsupported() {
        let adapter = Minimal;
        assert!(matches!(
            adapter.download_media("m1").await,
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            adapter.upload_media(MediaFile::new(vec![1], "image/png")).await,
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            adapter.mark_as_read("m1").await,
            Err(Error::Unsupported(_))
        ));
        assert!(adapter.verify_signature(b"{}", "sha256=00").is_err());
        assert_eq!(adapter.verify_webhook("subscribe", "t", "c"), None);
    }

    #[tokio::test]
    async fn test_presence_defaults_are_logging_only() {
        let adapter = Minimal;
        assert!(adapter.send_typing("user").await.is_ok());
        assert!(adapter.set_presence(true).await.is_ok());
    }

    #[test]
    fn test_default_validation_uses_capabilities() {
        let adapter = Minimal;
        let msg = OutgoingMessage::text("user", "x".repeat(101));
        assert!(!adapter.validate_message(&msg).is_empty());
    }
}
