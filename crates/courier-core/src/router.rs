//! Message router
//!
//! Resolves a channel to its adapter and delegates outbound sends. A missing
//! adapter becomes a `failed` result so every outbound call can be handled
//! the same way.

use crate::error::Error;
use crate::message::{ChannelType, MessageDeliveryResult, OutgoingMessage};
use crate::registry::AdapterRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes outbound messages to channel adapters
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<AdapterRegistry>,
}

impl MessageRouter {
    /// Create a router over a registry
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry
    #[must_use]
    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Route a message by channel identifier
    pub async fn route(
        &self,
        conversation_id: &str,
        channel: &str,
        message: OutgoingMessage,
    ) -> MessageDeliveryResult {
        match channel.parse::<ChannelType>() {
            Ok(channel_type) => self.route_to(conversation_id, channel_type, message).await,
            Err(_) => {
                warn!(channel = %channel, "Outbound message for unknown channel");
                MessageDeliveryResult::failed(&not_configured(channel))
            }
        }
    }

    /// Route a message to a known channel type
    pub async fn route_to(
        &self,
        conversation_id: &str,
        channel: ChannelType,
        message: OutgoingMessage,
    ) -> MessageDeliveryResult {
        let Some(adapter) = self.registry.get_adapter(channel) else {
            warn!(channel = %channel, "No adapter registered for channel");
            return MessageDeliveryResult::failed(&not_configured(channel.as_str()));
        };

        debug!(channel = %channel, conversation_id = %conversation_id, "Routing outbound message");
        adapter.send_message(conversation_id, message).await
    }
}

fn not_configured(channel: &str) -> Error {
    Error::ChannelNotConfigured(format!("channel '{channel}' is not configured"))
}
