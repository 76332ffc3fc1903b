//! Ticket auto-linking

use super::ingest::subject_of;
use super::ConversationOrchestrator;
use crate::error::Result;
use crate::event_bus::DomainEvent;
use crate::message::{ChannelMessage, SenderType};
use crate::store::{Conversation, Ticket, TicketStatus};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

impl ConversationOrchestrator {
    /// Bind a ticket to a conversation that has none.
    ///
    /// Any open or pending ticket of the same customer touched within the
    /// reuse window is reused, whichever channel it was opened on. System
    /// messages (bounces, auto-replies) never open or link a ticket.
    pub(super) async fn ensure_ticket(
        &self,
        tenant_id: &str,
        mut conversation: Conversation,
        message: &ChannelMessage,
    ) -> Result<Conversation> {
        if conversation.ticket_id.is_some() {
            return Ok(conversation);
        }
        if message.sender_type == SenderType::System {
            debug!(conversation_id = %conversation.id, "System message, no ticket linked");
            return Ok(conversation);
        }

        let since = Utc::now() - self.config.ticket_reuse_window;
        let (ticket, reused) = match self
            .store
            .find_recent_open_ticket(tenant_id, &conversation.customer_id, since)
            .await?
        {
            Some(ticket) => (ticket, true),
            None => {
                let now = Utc::now();
                let ticket = Ticket {
                    id: Uuid::new_v4().to_string(),
                    tenant_id: tenant_id.to_string(),
                    customer_id: conversation.customer_id.clone(),
                    channel: conversation.channel,
                    subject: conversation
                        .subject
                        .clone()
                        .or_else(|| subject_of(message))
                        .unwrap_or_else(|| format!("New {} conversation", conversation.channel)),
                    description: message.content.clone(),
                    status: TicketStatus::Open,
                    created_at: now,
                    updated_at: now,
                };
                (self.store.create_ticket(ticket).await?, false)
            }
        };

        self.store
            .link_ticket(tenant_id, &conversation.id, &ticket.id)
            .await?;
        conversation.ticket_id = Some(ticket.id.clone());

        if reused && ticket.channel != conversation.channel {
            info!(
                ticket_id = %ticket.id,
                ticket_channel = %ticket.channel,
                channel = %conversation.channel,
                "Reusing ticket opened on another channel"
            );
        }

        self.publish(DomainEvent::TicketLinked {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation.id.clone(),
            ticket_id: ticket.id,
            ticket_channel: ticket.channel,
            reused,
        })
        .await;

        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use crate::event_bus::DomainEvent;
    use crate::message::{ChannelMessage, ChannelType, SenderType};
    use crate::orchestrator::test_support::{drain, harness};
    use crate::store::{ConversationStore, TenantChannel, TicketStatus};

    #[tokio::test]
    async fn test_ticket_is_created_once_per_conversation() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Web)]).await;
        let first = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Web, "v1", "I need help"))
            .await
            .unwrap();
        h.orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Web, "v1", "still there?"))
            .await
            .unwrap();

        let tickets = h.store.tickets("t1").await;
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].subject, "I need help");
        assert_eq!(tickets[0].status, TicketStatus::Open);

        let conversation = h
            .store
            .get_conversation("t1", &first.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.ticket_id.as_deref(), Some(tickets[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_bounce_does_not_open_ticket() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Email)]).await;
        let mut bounce = ChannelMessage::new(
            ChannelType::Email,
            "mailer-daemon@example.com",
            "Delivery Status Notification (Failure)",
        );
        bounce.sender_type = SenderType::System;

        let outcome = h.orchestrator.ingest_message("t1", bounce).await.unwrap();
        assert!(h.store.tickets("t1").await.is_empty());
        let conversation = h
            .store
            .get_conversation("t1", &outcome.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert!(conversation.ticket_id.is_none());

        // A real customer e-mail still gets its ticket
        h.orchestrator
            .ingest_message(
                "t1",
                ChannelMessage::new(ChannelType::Email, "ana@example.com", "Refund please"),
            )
            .await
            .unwrap();
        assert_eq!(h.store.tickets("t1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_cross_channel_reuse_is_reported() {
        let h = harness(&[
            TenantChannel::new("t1", ChannelType::WhatsApp),
            TenantChannel::new("t1", ChannelType::Sms),
        ])
        .await;
        let mut rx = h.bus.subscribe();

        h.orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::WhatsApp, "15550001111", "hi"))
            .await
            .unwrap();
        h.orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Sms, "+15550001111", "hi again"))
            .await
            .unwrap();

        let linked: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                DomainEvent::TicketLinked {
                    ticket_channel,
                    reused,
                    ..
                } => Some((ticket_channel, reused)),
                _ => None,
            })
            .collect();
        assert_eq!(
            linked,
            vec![
                (ChannelType::WhatsApp, false),
                (ChannelType::WhatsApp, true)
            ]
        );
    }
}
