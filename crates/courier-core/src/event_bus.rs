//! EventBus - broadcast-based domain event publication.
//!
//! The orchestrator publishes a [`DomainEvent`] after every state change it
//! owns. Publication is best-effort: callers log and continue on failure.

use crate::error::Result;
use crate::message::{ChannelType, SenderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the conversation orchestrator.
///
/// Events carry identifiers, not message content. Subscribers fetch the
/// persisted records when they need more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An inbound message was persisted
    MessageReceived {
        /// Tenant ID
        tenant_id: String,
        /// Conversation ID
        conversation_id: String,
        /// Internal message ID
        message_id: String,
        /// Channel the message arrived on
        channel: ChannelType,
        /// Message author kind
        sender_type: SenderType,
        /// Provider timestamp
        timestamp: DateTime<Utc>,
    },
    /// An outbound message was dispatched (successfully or not)
    MessageSent {
        /// Tenant ID
        tenant_id: String,
        /// Conversation ID
        conversation_id: String,
        /// Internal message ID
        message_id: String,
        /// Channel used
        channel: ChannelType,
        /// Provider message ID when accepted
        channel_message_id: Option<String>,
        /// Whether the provider accepted the message
        delivered: bool,
    },
    /// A conversation was opened
    ConversationCreated {
        /// Tenant ID
        tenant_id: String,
        /// Conversation ID
        conversation_id: String,
        /// Customer ID
        customer_id: String,
        /// Channel
        channel: ChannelType,
    },
    /// Conversation attributes changed
    ConversationUpdated {
        /// Tenant ID
        tenant_id: String,
        /// Conversation ID
        conversation_id: String,
        /// Names of the changed fields
        changes: Vec<String>,
    },
    /// Conversation (un)assigned to an agent
    ConversationAssigned {
        /// Tenant ID
        tenant_id: String,
        /// Conversation ID
        conversation_id: String,
        /// New assignee, `None` when unassigned
        assignee_id: Option<String>,
        /// Previous assignee
        previous_assignee_id: Option<String>,
    },
    /// Secondary conversations were folded into a primary one
    ConversationMerged {
        /// Tenant ID
        tenant_id: String,
        /// Surviving conversation
        primary_id: String,
        /// Conversations closed by the merge
        merged_ids: Vec<String>,
        /// Messages moved into the primary conversation
        moved_messages: usize,
    },
    /// A ticket was bound to a conversation
    TicketLinked {
        /// Tenant ID
        tenant_id: String,
        /// Conversation ID
        conversation_id: String,
        /// Ticket ID
        ticket_id: String,
        /// Channel the ticket was originally opened on
        ticket_channel: ChannelType,
        /// Whether an existing ticket was reused
        reused: bool,
    },
    /// Tenant automation should look at a customer message
    AutomationRequested {
        /// Tenant ID
        tenant_id: String,
        /// Conversation ID
        conversation_id: String,
        /// Internal message ID
        message_id: String,
        /// Channel
        channel: ChannelType,
    },
    /// A customer answered a satisfaction survey
    CsatResponseReceived {
        /// Tenant ID
        tenant_id: String,
        /// Conversation ID
        conversation_id: String,
        /// Survey ID
        survey_id: String,
        /// Rating 1-5
        rating: u8,
    },
}

impl DomainEvent {
    /// Event type name as serialized in the `type` tag
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::MessageSent { .. } => "message_sent",
            Self::ConversationCreated { .. } => "conversation_created",
            Self::ConversationUpdated { .. } => "conversation_updated",
            Self::ConversationAssigned { .. } => "conversation_assigned",
            Self::ConversationMerged { .. } => "conversation_merged",
            Self::TicketLinked { .. } => "ticket_linked",
            Self::AutomationRequested { .. } => "automation_requested",
            Self::CsatResponseReceived { .. } => "csat_response_received",
        }
    }

    /// Tenant the event belongs to
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        match self {
            Self::MessageReceived { tenant_id, .. }
            | Self::MessageSent { tenant_id, .. }
            | Self::ConversationCreated { tenant_id, .. }
            | Self::ConversationUpdated { tenant_id, .. }
            | Self::ConversationAssigned { tenant_id, .. }
            | Self::ConversationMerged { tenant_id, .. }
            | Self::TicketLinked { tenant_id, .. }
            | Self::AutomationRequested { tenant_id, .. }
            | Self::CsatResponseReceived { tenant_id, .. } => tenant_id,
        }
    }
}

/// Event-publishing capability
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}

/// Broadcast-based event bus.
///
/// Slow subscribers miss events (lagged) rather than blocking the publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        // No subscribers is not an error
        let receivers = self.sender.send(event).unwrap_or(0);
        tracing::trace!(event_type, receivers, "Domain event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(conversation_id: &str) -> DomainEvent {
        DomainEvent::ConversationCreated {
            tenant_id: "t1".to_string(),
            conversation_id: conversation_id.to_string(),
            customer_id: "cust-1".to_string(),
            channel: ChannelType::WhatsApp,
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(created("c1")).await.unwrap();
        bus.publish(created("c2")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), created("c1"));
        assert_eq!(rx.recv().await.unwrap(), created("c2"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.publish(created("c1")).await.is_ok());
    }

    #[test]
    fn test_event_serialization() {
        let event = DomainEvent::CsatResponseReceived {
            tenant_id: "t1".to_string(),
            conversation_id: "c1".to_string(),
            survey_id: "s9".to_string(),
            rating: 4,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "csat_response_received");
        assert_eq!(json["rating"], 4);
        assert_eq!(event.event_type(), "csat_response_received");
        assert_eq!(event.tenant_id(), "t1");
    }
}
