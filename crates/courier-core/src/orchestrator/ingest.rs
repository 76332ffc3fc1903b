//! Inbound path: webhook payload to persisted, published message

use super::ConversationOrchestrator;
use crate::error::{Error, Result};
use crate::event_bus::DomainEvent;
use crate::message::{
    ChannelDetails, ChannelMessage, ChannelType, ProcessedMessage, ProcessingMetadata, SenderType,
    ThreadContext,
};
use crate::normalize::normalize_content;
use crate::store::{
    Conversation, Customer, CustomerIdentity, Direction, MessageRecord, SaveOutcome, TenantChannel,
};
use crate::utils::metrics::{self, global as metrics_global};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Maximum characters of message text used as a conversation subject
const SUBJECT_EXCERPT_CHARS: usize = 80;

/// Result of ingesting one message
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    /// Stored message (the earlier copy for duplicates)
    pub message: ProcessedMessage,
    /// Conversation the message belongs to
    pub conversation_id: String,
    /// The provider message ID had already been ingested
    pub duplicate: bool,
    /// A new conversation was opened for this message
    pub conversation_created: bool,
}

/// Result of handling a webhook
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// A message was ingested (or recognized as a duplicate)
    Ingested(IngestOutcome),
    /// The provider event carries nothing to ingest
    Ignored {
        /// Why it was skipped
        reason: String,
    },
}

/// Identity of the message author as far as the channel reveals it
fn identity_of(message: &ChannelMessage) -> CustomerIdentity {
    let sender = message.sender_id.clone();
    let name = message.channel_data.profile_name.clone();
    match message.channel {
        ChannelType::WhatsApp | ChannelType::Sms => CustomerIdentity {
            channel: message.channel,
            channel_user_id: sender.clone(),
            email: None,
            phone: Some(sender),
            name,
        },
        ChannelType::Email => CustomerIdentity {
            channel: message.channel,
            channel_user_id: sender.to_lowercase(),
            email: Some(sender),
            phone: None,
            name,
        },
        ChannelType::Instagram | ChannelType::Messenger | ChannelType::Web => CustomerIdentity {
            channel: message.channel,
            channel_user_id: sender,
            email: None,
            phone: None,
            name,
        },
    }
}

/// Conversation subject for a first message
pub(super) fn subject_of(message: &ChannelMessage) -> Option<String> {
    if let ChannelDetails::Email { subject, .. } = &message.channel_data.details {
        if !subject.trim().is_empty() {
            return Some(subject.trim().to_string());
        }
    }
    let text = message.content.trim();
    if text.is_empty() {
        return None;
    }
    let excerpt: String = text.chars().take(SUBJECT_EXCERPT_CHARS).collect();
    Some(excerpt.lines().next().unwrap_or_default().to_string())
}

impl ConversationOrchestrator {
    /// Translate a provider payload with the channel's adapter and ingest it.
    ///
    /// # Errors
    /// [`Error::ChannelNotConfigured`] when no adapter is registered,
    /// [`Error::InvalidPayload`] when the adapter rejects the payload, and
    /// any error from [`ConversationOrchestrator::ingest_message`].
    pub async fn ingest_webhook(
        &self,
        tenant_id: &str,
        channel: ChannelType,
        payload: &serde_json::Value,
    ) -> Result<WebhookOutcome> {
        let adapter = self.router.registry().get_adapter(channel).ok_or_else(|| {
            Error::ChannelNotConfigured(format!("channel '{channel}' is not configured"))
        })?;

        match adapter.receive_message(payload).await {
            Ok(message) => Ok(WebhookOutcome::Ingested(
                self.ingest_message(tenant_id, message).await?,
            )),
            Err(Error::Ignored(reason)) => {
                debug!(channel = %channel, reason = %reason, "Webhook event ignored");
                Ok(WebhookOutcome::Ignored { reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Ingest one inbound channel message.
    ///
    /// Redelivery of a provider message ID returns the stored message with
    /// `duplicate = true` instead of storing it again.
    #[instrument(skip(self, message), fields(channel = %message.channel, message_id = %message.id))]
    pub async fn ingest_message(
        &self,
        tenant_id: &str,
        message: ChannelMessage,
    ) -> Result<IngestOutcome> {
        message.validate()?;

        let channel_record = self
            .store
            .find_active_channel(tenant_id, message.channel)
            .await?;
        let (conversation, conversation_created) = self
            .resolve_conversation(tenant_id, &message, channel_record.as_ref())
            .await?;
        let conversation = self
            .ensure_ticket(tenant_id, conversation, &message)
            .await?;

        if let Some(existing) = self.find_duplicate(tenant_id, &message).await? {
            return Ok(self.duplicate_outcome(existing));
        }

        let processed = self.process(tenant_id, message, &conversation.id).await?;
        let record = MessageRecord {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation.id.clone(),
            direction: Direction::Inbound,
            message: processed,
            delivery: None,
        };
        let record = match self.store.save_message(record).await? {
            SaveOutcome::Created(record) => record,
            SaveOutcome::Existing(existing) => return Ok(self.duplicate_outcome(existing)),
        };
        let stored = &record.message;
        let channel = stored.message.channel;

        if let Err(e) = self
            .store
            .increment_message_counters(
                tenant_id,
                &conversation.id,
                stored.message.sender_type,
                stored.message.timestamp,
            )
            .await
        {
            warn!(conversation_id = %conversation.id, error = %e, "Failed to update conversation counters");
        }
        self.sessions.record_inbound(
            tenant_id,
            &conversation.id,
            channel,
            stored.id(),
            stored.message.timestamp,
        );
        metrics_global::counter_with_labels(metrics::INGEST_TOTAL, &[("channel", channel.as_str())])
            .inc();

        info!(
            conversation_id = %conversation.id,
            message_type = stored.message.message_type.as_str(),
            thread_depth = stored.thread.depth,
            "Inbound message ingested"
        );

        self.publish(DomainEvent::MessageReceived {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation.id.clone(),
            message_id: stored.id().to_string(),
            channel,
            sender_type: stored.message.sender_type,
            timestamp: stored.message.timestamp,
        })
        .await;

        if let ChannelDetails::Instagram {
            csat: Some(csat), ..
        } = &stored.message.channel_data.details
        {
            self.publish(DomainEvent::CsatResponseReceived {
                tenant_id: tenant_id.to_string(),
                conversation_id: conversation.id.clone(),
                survey_id: csat.survey_id.clone(),
                rating: csat.rating,
            })
            .await;
        }

        self.request_automation(tenant_id, channel_record.as_ref(), &record)
            .await;

        Ok(IngestOutcome {
            conversation_id: conversation.id,
            message: record.message,
            duplicate: false,
            conversation_created,
        })
    }

    /// Resolve (or open) the conversation a message belongs to
    async fn resolve_conversation(
        &self,
        tenant_id: &str,
        message: &ChannelMessage,
        channel_record: Option<&TenantChannel>,
    ) -> Result<(Conversation, bool)> {
        if let Some(conversation_id) = &message.conversation_id {
            let conversation = self
                .store
                .get_conversation(tenant_id, conversation_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))?;
            return self.follow_merge(tenant_id, conversation).await.map(|c| (c, false));
        }

        let channel_record = channel_record.ok_or_else(|| {
            Error::ChannelNotConfigured(format!(
                "no active {} channel for tenant {tenant_id}",
                message.channel
            ))
        })?;

        let customer = self.resolve_customer(tenant_id, message).await?;
        if let Some(conversation) = self
            .store
            .find_open_conversation(tenant_id, &customer.id, &channel_record.id)
            .await?
        {
            return Ok((conversation, false));
        }

        let mut conversation = Conversation::new(&customer, channel_record);
        conversation.subject = subject_of(message);
        let conversation = self.store.create_conversation(conversation).await?;
        info!(conversation_id = %conversation.id, customer_id = %customer.id, "Conversation opened");
        self.publish(DomainEvent::ConversationCreated {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation.id.clone(),
            customer_id: customer.id.clone(),
            channel: conversation.channel,
        })
        .await;
        Ok((conversation, true))
    }

    /// Messages addressed to a merged conversation land in its primary
    async fn follow_merge(&self, tenant_id: &str, conversation: Conversation) -> Result<Conversation> {
        let Some(target) = conversation.merged_into.clone() else {
            return Ok(conversation);
        };
        debug!(from = %conversation.id, to = %target, "Following merged conversation");
        self.store
            .get_conversation(tenant_id, &target)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {target}")))
    }

    /// Find or create the customer behind a message, learning new identities
    async fn resolve_customer(&self, tenant_id: &str, message: &ChannelMessage) -> Result<Customer> {
        let identity = identity_of(message);
        let Some(mut customer) = self.store.find_customer(tenant_id, &identity).await? else {
            return self
                .store
                .create_customer(Customer::from_identity(tenant_id, &identity))
                .await;
        };

        let mut changed = false;
        if !customer.channel_ids.contains_key(&identity.channel) {
            customer
                .channel_ids
                .insert(identity.channel, identity.channel_user_id.clone());
            changed = true;
        }
        if customer.name.is_none() && identity.name.is_some() {
            customer.name.clone_from(&identity.name);
            changed = true;
        }
        if changed {
            customer = self.store.update_customer(customer).await?;
        }
        Ok(customer)
    }

    async fn find_duplicate(
        &self,
        tenant_id: &str,
        message: &ChannelMessage,
    ) -> Result<Option<MessageRecord>> {
        let Some(provider_id) = message.provider_message_id() else {
            return Ok(None);
        };
        self.store
            .find_message_by_provider_id(tenant_id, message.channel, provider_id)
            .await
    }

    fn duplicate_outcome(&self, existing: MessageRecord) -> IngestOutcome {
        let channel = existing.message.message.channel;
        metrics_global::counter_with_labels(
            metrics::INGEST_DUPLICATES_TOTAL,
            &[("channel", channel.as_str())],
        )
        .inc();
        debug!(
            message_id = %existing.id(),
            "Duplicate provider message ignored"
        );
        IngestOutcome {
            conversation_id: existing.conversation_id,
            message: existing.message,
            duplicate: true,
            conversation_created: false,
        }
    }

    /// Normalize content and compute threading
    async fn process(
        &self,
        tenant_id: &str,
        mut message: ChannelMessage,
        conversation_id: &str,
    ) -> Result<ProcessedMessage> {
        message.conversation_id = Some(conversation_id.to_string());
        let normalized = normalize_content(message.channel, &message.content);

        let thread = match message.channel_data.reply_to_id.clone() {
            Some(parent) => {
                let parent_depth = self
                    .store
                    .find_message_by_provider_id(tenant_id, message.channel, &parent)
                    .await?
                    .map(|p| p.message.thread.depth);
                ThreadContext::reply_to(parent, parent_depth)
            }
            None => ThreadContext::start(),
        };

        Ok(ProcessedMessage {
            normalized_content: normalized.content,
            thread,
            processing: ProcessingMetadata {
                processed_at: Utc::now(),
                processing_version: self.config.processing_version.clone(),
                adapter: message.channel,
                normalization_steps: normalized
                    .steps
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
                validation: Vec::new(),
            },
            message,
        })
    }

    /// Best-effort automation hook, rate limited per tenant
    async fn request_automation(
        &self,
        tenant_id: &str,
        channel_record: Option<&TenantChannel>,
        record: &MessageRecord,
    ) {
        let enabled = channel_record.is_some_and(|c| c.automation_enabled);
        if !enabled || record.message.message.sender_type != SenderType::Customer {
            return;
        }

        let decision = self.automation.acquire(tenant_id).await;
        if !decision.allowed {
            debug!(
                tenant_id = %tenant_id,
                current = decision.current,
                "Automation ceiling reached, skipping hook"
            );
            return;
        }

        self.publish(DomainEvent::AutomationRequested {
            tenant_id: tenant_id.to_string(),
            conversation_id: record.conversation_id.clone(),
            message_id: record.id().to_string(),
            channel: record.message.message.channel,
        })
        .await;
    }
}
