//! Outbound path: agent reply to channel delivery

use super::ConversationOrchestrator;
use crate::capabilities::has_errors;
use crate::error::{Error, Result};
use crate::event_bus::DomainEvent;
use crate::message::{
    ChannelMessage, ChannelType, MessageDeliveryResult, OutgoingMessage, ProcessedMessage,
    ProcessingMetadata, SenderType, ThreadContext,
};
use crate::store::{Conversation, Direction, MessageRecord};
use chrono::Utc;
use tracing::{info, instrument, warn};

/// An outbound message on an existing conversation
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Tenant ID
    pub tenant_id: String,
    /// Conversation ID
    pub conversation_id: String,
    /// Author ID (agent), `None` for system messages
    pub author_id: Option<String>,
    /// Author kind
    pub sender_type: SenderType,
    /// Message; an empty `recipient_id` is resolved from the customer record
    pub message: OutgoingMessage,
}

impl SendRequest {
    /// A system message
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
        message: OutgoingMessage,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            author_id: None,
            sender_type: SenderType::System,
            message,
        }
    }

    /// Sent by an agent
    #[must_use]
    pub fn from_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.author_id = Some(agent_id.into());
        self.sender_type = SenderType::Agent;
        self
    }
}

fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

impl ConversationOrchestrator {
    /// Send a message on a conversation.
    ///
    /// Validation errors are raised before the adapter is called. Provider
    /// failures come back as a `failed` result, which is persisted like a
    /// successful one.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown conversation,
    /// [`Error::ChannelNotConfigured`] when the channel has no adapter and
    /// [`Error::ValidationFailed`] when the message breaks channel limits.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, conversation_id = %request.conversation_id))]
    pub async fn send_message(&self, request: SendRequest) -> Result<MessageDeliveryResult> {
        let SendRequest {
            tenant_id,
            conversation_id,
            author_id,
            sender_type,
            mut message,
        } = request;

        let conversation = self
            .store
            .get_conversation(&tenant_id, &conversation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))?;
        let channel = conversation.channel;
        let adapter = self.router.registry().get_adapter(channel).ok_or_else(|| {
            Error::ChannelNotConfigured(format!("channel '{channel}' is not configured"))
        })?;

        self.prepare(&tenant_id, &conversation, &mut message).await?;

        let findings = adapter.validate_message(&message);
        if has_errors(&findings) {
            warn!(channel = %channel, "Outbound message rejected by channel validation");
            return Err(Error::ValidationFailed(findings));
        }

        let result = self
            .router
            .route_to(&conversation.id, channel, message.clone())
            .await;

        let author = author_id.unwrap_or_else(|| "system".to_string());
        let record = self
            .outbound_record(&tenant_id, &conversation, &author, sender_type, message, &result, findings)
            .await;
        let record_id = record.id().to_string();
        if let Err(e) = self.store.save_message(record).await {
            warn!(message_id = %record_id, error = %e, "Failed to persist outbound message");
        }

        if result.is_sent() {
            if let Err(e) = self
                .store
                .increment_message_counters(&tenant_id, &conversation.id, sender_type, result.timestamp)
                .await
            {
                warn!(error = %e, "Failed to update conversation counters");
            }
            self.sessions.record_outbound(
                &tenant_id,
                &conversation.id,
                channel,
                &result.message_id,
                result.timestamp,
            );
            info!(channel = %channel, message_id = %result.message_id, "Outbound message sent");
        } else {
            warn!(
                channel = %channel,
                error = result.error.as_deref().unwrap_or_default(),
                "Outbound message failed"
            );
        }

        self.publish(DomainEvent::MessageSent {
            tenant_id: tenant_id.clone(),
            conversation_id: conversation.id.clone(),
            message_id: result.message_id.clone(),
            channel,
            channel_message_id: result.channel_message_id.clone(),
            delivered: result.is_sent(),
        })
        .await;

        Ok(result)
    }

    /// Fill recipient, messaging-window and e-mail threading details
    async fn prepare(
        &self,
        tenant_id: &str,
        conversation: &Conversation,
        message: &mut OutgoingMessage,
    ) -> Result<()> {
        let channel = conversation.channel;

        if message.recipient_id.trim().is_empty() {
            if let Some(customer) = self
                .store
                .get_customer(tenant_id, &conversation.customer_id)
                .await?
            {
                if let Some(recipient) = customer.recipient_for(channel) {
                    message.recipient_id = recipient;
                }
            }
        }

        let needs_history = (channel.has_messaging_window()
            && message.options.last_inbound_at.is_none())
            || channel == ChannelType::Email;
        if !needs_history {
            return Ok(());
        }

        if message.options.last_inbound_at.is_none() {
            message.options.last_inbound_at = self
                .sessions
                .get(tenant_id, &conversation.id)
                .and_then(|s| s.last_inbound_at);
        }

        let history = self.store.list_messages(tenant_id, &conversation.id).await?;
        let inbound: Vec<&ChannelMessage> = history
            .iter()
            .filter(|r| r.direction == Direction::Inbound)
            .map(|r| &r.message.message)
            .collect();

        if channel.has_messaging_window() && message.options.last_inbound_at.is_none() {
            message.options.last_inbound_at = inbound.iter().map(|m| m.timestamp).max();
        }

        if channel == ChannelType::Email {
            let envelope = message.options.email.get_or_insert_with(Default::default);
            if envelope.subject.is_none() {
                envelope.subject = conversation.subject.as_deref().map(reply_subject);
            }
            if envelope.references.is_empty() {
                envelope.references = inbound
                    .iter()
                    .filter_map(|m| m.provider_message_id().map(str::to_string))
                    .collect();
            }
            if message.reply_to_id.is_none() {
                message.reply_to_id = inbound
                    .last()
                    .and_then(|m| m.provider_message_id().map(str::to_string));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn outbound_record(
        &self,
        tenant_id: &str,
        conversation: &Conversation,
        author: &str,
        sender_type: SenderType,
        message: OutgoingMessage,
        result: &MessageDeliveryResult,
        findings: Vec<crate::capabilities::ValidationResult>,
    ) -> MessageRecord {
        let channel = conversation.channel;
        let thread = match &message.reply_to_id {
            Some(parent) => {
                let depth = self
                    .store
                    .find_message_by_provider_id(tenant_id, channel, parent)
                    .await
                    .ok()
                    .flatten()
                    .map(|p| p.message.thread.depth);
                ThreadContext::reply_to(parent.clone(), depth)
            }
            None => ThreadContext::start(),
        };

        let mut stored = ChannelMessage::new(channel, author, message.content.clone())
            .with_type(message.message_type)
            .in_conversation(conversation.id.clone())
            .at(result.timestamp);
        stored.id.clone_from(&result.message_id);
        stored.sender_type = sender_type;
        stored.attachments = message.attachments;
        stored.location = message.options.location;
        stored.contacts = message.options.contacts;
        stored.metadata = message.metadata;
        stored.channel_data.provider_message_id.clone_from(&result.channel_message_id);
        stored.channel_data.reply_to_id = message.reply_to_id;

        MessageRecord {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation.id.clone(),
            direction: Direction::Outbound,
            message: ProcessedMessage {
                normalized_content: message.content.trim().to_string(),
                thread,
                processing: ProcessingMetadata {
                    processed_at: Utc::now(),
                    processing_version: self.config.processing_version.clone(),
                    adapter: channel,
                    normalization_steps: Vec::new(),
                    validation: findings,
                },
                message: stored,
            },
            delivery: Some(result.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ChannelCapabilities, ChannelFeatures, RateLimits};
    use crate::adapter::ChannelAdapter;
    use crate::error::ErrorCode;
    use crate::message::EmailEnvelope;
    use crate::orchestrator::test_support::{drain, harness};
    use crate::registry::tests::StubAdapter;
    use crate::store::{ConversationStore, TenantChannel};
    use std::sync::{Arc, Mutex};

    /// Captures what reaches the adapter
    struct Capture {
        channel: ChannelType,
        seen: Mutex<Vec<OutgoingMessage>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ChannelAdapter for Capture {
        fn channel_type(&self) -> ChannelType {
            self.channel
        }

        async fn receive_message(&self, _payload: &serde_json::Value) -> Result<ChannelMessage> {
            Err(Error::InvalidPayload("unused".into()))
        }

        async fn send_message(&self, _c: &str, m: OutgoingMessage) -> MessageDeliveryResult {
            self.seen.lock().unwrap().push(m);
            if self.fail {
                MessageDeliveryResult::failed(&Error::RateLimited { retry_after: None })
            } else {
                MessageDeliveryResult::sent(Some("prov-1".to_string()))
            }
        }

        fn supported_features(&self) -> ChannelCapabilities {
            ChannelCapabilities {
                supported_attachment_types: vec![],
                max_message_length: 20,
                max_attachment_size: 0,
                max_attachments: 0,
                rate_limits: RateLimits::default(),
                features: ChannelFeatures::default(),
            }
        }
    }

    fn capture(channel: ChannelType, fail: bool) -> Arc<Capture> {
        Arc::new(Capture {
            channel,
            seen: Mutex::new(Vec::new()),
            fail,
        })
    }

    #[tokio::test]
    async fn test_send_resolves_recipient_and_persists() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::WhatsApp)]).await;
        let adapter = capture(ChannelType::WhatsApp, false);
        h.registry.register(adapter.clone());
        let inbound = h
            .orchestrator
            .ingest_message(
                "t1",
                ChannelMessage::new(ChannelType::WhatsApp, "15551234567", "hi").with_provider_id("wamid.1"),
            )
            .await
            .unwrap();
        let mut rx = h.bus.subscribe();

        let result = h
            .orchestrator
            .send_message(
                SendRequest::new("t1", &inbound.conversation_id, OutgoingMessage::text("", "Hello"))
                    .from_agent("agent-7"),
            )
            .await
            .unwrap();

        assert!(result.is_sent());
        let seen = adapter.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].recipient_id, "15551234567");
        assert!(seen[0].options.last_inbound_at.is_some());

        let messages = h.store.list_messages("t1", &inbound.conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        let outbound = &messages[1];
        assert_eq!(outbound.direction, Direction::Outbound);
        assert_eq!(outbound.id(), result.message_id);
        assert_eq!(outbound.message.message.sender_type, SenderType::Agent);
        assert_eq!(outbound.message.message.provider_message_id(), Some("prov-1"));

        let conversation = h
            .store
            .get_conversation("t1", &inbound.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.counters.agent, 1);

        let snapshot = h.orchestrator.sessions().get("t1", &inbound.conversation_id).unwrap();
        assert_eq!(snapshot.last_outbound_message_id.as_deref(), Some(result.message_id.as_str()));
        assert!(matches!(
            drain(&mut rx).last(),
            Some(DomainEvent::MessageSent { delivered: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_validation_errors_stop_before_adapter() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Web)]).await;
        let adapter = capture(ChannelType::Web, false);
        h.registry.register(adapter.clone());
        let inbound = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Web, "v1", "hi"))
            .await
            .unwrap();

        let err = h
            .orchestrator
            .send_message(SendRequest::new(
                "t1",
                &inbound.conversation_id,
                OutgoingMessage::text("v1", "x".repeat(50)),
            ))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert!(adapter.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_persisted_not_raised() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Web)]).await;
        h.registry.register(capture(ChannelType::Web, true));
        let inbound = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Web, "v1", "hi"))
            .await
            .unwrap();

        let result = h
            .orchestrator
            .send_message(SendRequest::new("t1", &inbound.conversation_id, OutgoingMessage::text("v1", "ok")))
            .await
            .unwrap();

        assert!(!result.is_sent());
        assert_eq!(result.error_code, Some(ErrorCode::RateLimited));
        let messages = h.store.list_messages("t1", &inbound.conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].delivery.as_ref().is_some_and(|d| !d.is_sent()));
    }

    #[tokio::test]
    async fn test_unregistered_channel_is_not_configured() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Sms)]).await;
        let inbound = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Sms, "+15550001111", "hi"))
            .await
            .unwrap();
        let err = h
            .orchestrator
            .send_message(SendRequest::new("t1", &inbound.conversation_id, OutgoingMessage::text("", "yo")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelNotConfigured(_)));
    }

    #[tokio::test]
    async fn test_email_reply_gets_subject_and_references() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Email)]).await;
        let adapter = capture(ChannelType::Email, false);
        h.registry.register(adapter.clone());

        let mut inbound = ChannelMessage::new(ChannelType::Email, "ana@example.com", "Where is my parcel?")
            .with_provider_id("<m1@example.com>");
        inbound.channel_data.details = crate::message::ChannelDetails::Email {
            subject: "Parcel".to_string(),
            from: "ana@example.com".to_string(),
            to: vec!["help@shop.test".to_string()],
            cc: vec![],
            bcc: vec![],
            in_reply_to: None,
            references: vec![],
            thread_id: None,
            html: None,
            is_auto_reply: false,
            is_bounce: false,
        };
        let outcome = h.orchestrator.ingest_message("t1", inbound).await.unwrap();

        h.orchestrator
            .send_message(SendRequest::new(
                "t1",
                &outcome.conversation_id,
                OutgoingMessage::text("", "On its way"),
            ))
            .await
            .unwrap();

        let seen = adapter.seen.lock().unwrap().clone();
        assert_eq!(seen[0].recipient_id, "ana@example.com");
        assert_eq!(seen[0].reply_to_id.as_deref(), Some("<m1@example.com>"));
        let envelope: &EmailEnvelope = seen[0].options.email.as_ref().unwrap();
        assert_eq!(envelope.subject.as_deref(), Some("Re: Parcel"));
        assert_eq!(envelope.references, vec!["<m1@example.com>".to_string()]);
    }

    #[test]
    fn test_reply_subject() {
        assert_eq!(reply_subject("Parcel"), "Re: Parcel");
        assert_eq!(reply_subject("RE: Parcel"), "RE: Parcel");
        assert_eq!(reply_subject("Re"), "Re: Re");
    }

    #[tokio::test]
    async fn test_router_stub_records_one_call() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Web)]).await;
        let stub = Arc::new(StubAdapter::new(ChannelType::Web));
        h.registry.register(stub.clone());
        let inbound = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Web, "v1", "hi"))
            .await
            .unwrap();
        h.orchestrator
            .send_message(SendRequest::new("t1", &inbound.conversation_id, OutgoingMessage::text("", "Hello")))
            .await
            .unwrap();
        assert_eq!(stub.send_count(), 1);
    }
}
