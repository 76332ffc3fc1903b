//! Conversation lifecycle: create, update, assign, merge

use super::ConversationOrchestrator;
use crate::capabilities::ValidationResult;
use crate::error::{Error, Result};
use crate::event_bus::DomainEvent;
use crate::message::ChannelType;
use crate::store::{
    Conversation, ConversationPatch, ConversationStatus, MergeReport, PatchOutcome, Priority,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, instrument};

/// Agent-initiated conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConversation {
    /// Tenant ID
    pub tenant_id: String,
    /// Existing customer
    pub customer_id: String,
    /// Channel to converse on
    pub channel: ChannelType,
    /// Subject
    pub subject: Option<String>,
    /// Initial tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
}

impl NewConversation {
    /// Conversation with a customer on a channel
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        customer_id: impl Into<String>,
        channel: ChannelType,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            customer_id: customer_id.into(),
            channel,
            subject: None,
            tags: BTreeSet::new(),
            priority: Priority::default(),
        }
    }

    /// Set the subject
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Partial conversation update; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationUpdate {
    /// New status
    pub status: Option<ConversationStatus>,
    /// New subject
    pub subject: Option<String>,
    /// New priority
    pub priority: Option<Priority>,
    /// Tags to add
    #[serde(default)]
    pub add_tags: Vec<String>,
    /// Tags to remove
    #[serde(default)]
    pub remove_tags: Vec<String>,
}

impl From<ConversationUpdate> for ConversationPatch {
    fn from(update: ConversationUpdate) -> Self {
        Self {
            status: update.status,
            subject: update.subject,
            priority: update.priority,
            add_tags: update.add_tags,
            remove_tags: update.remove_tags,
            assignee_id: None,
        }
    }
}

impl ConversationOrchestrator {
    async fn load_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<Conversation> {
        self.store
            .get_conversation(tenant_id, conversation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))
    }

    /// Open a conversation on behalf of an agent
    ///
    /// # Errors
    /// [`Error::ChannelNotConfigured`] when the tenant has no active channel
    /// of that type and [`Error::NotFound`] for an unknown customer.
    pub async fn create_conversation(&self, request: NewConversation) -> Result<Conversation> {
        let tenant_id = request.tenant_id.as_str();
        let channel = self
            .store
            .find_active_channel(tenant_id, request.channel)
            .await?
            .ok_or_else(|| {
                Error::ChannelNotConfigured(format!(
                    "no active {} channel for tenant {tenant_id}",
                    request.channel
                ))
            })?;
        let customer = self
            .store
            .get_customer(tenant_id, &request.customer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("customer {}", request.customer_id)))?;

        let mut conversation = Conversation::new(&customer, &channel);
        conversation.subject = request.subject;
        conversation.tags = request.tags;
        conversation.priority = request.priority;
        let conversation = self.store.create_conversation(conversation).await?;

        info!(conversation_id = %conversation.id, channel = %conversation.channel, "Conversation created");
        self.publish(DomainEvent::ConversationCreated {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation.id.clone(),
            customer_id: customer.id,
            channel: conversation.channel,
        })
        .await;
        Ok(conversation)
    }

    /// Update status, subject, priority or tags.
    ///
    /// An update that changes nothing leaves the record untouched and
    /// publishes nothing.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown conversation.
    pub async fn update_conversation(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> Result<Conversation> {
        let PatchOutcome {
            conversation,
            changes,
            ..
        } = self
            .store
            .update_conversation(tenant_id, conversation_id, update.into())
            .await?;
        if changes.is_empty() {
            return Ok(conversation);
        }

        self.publish(DomainEvent::ConversationUpdated {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation.id.clone(),
            changes,
        })
        .await;
        Ok(conversation)
    }

    /// Assign a conversation to an agent, or unassign with `None`
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown conversation.
    pub async fn assign_conversation(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        assignee_id: Option<String>,
    ) -> Result<Conversation> {
        let patch = ConversationPatch {
            assignee_id: Some(assignee_id.clone()),
            ..ConversationPatch::default()
        };
        let PatchOutcome {
            conversation,
            changes,
            previous_assignee_id,
        } = self
            .store
            .update_conversation(tenant_id, conversation_id, patch)
            .await?;
        if changes.is_empty() {
            return Ok(conversation);
        }

        info!(
            conversation_id = %conversation.id,
            assignee_id = assignee_id.as_deref().unwrap_or("none"),
            "Conversation assigned"
        );
        self.publish(DomainEvent::ConversationAssigned {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation.id.clone(),
            assignee_id,
            previous_assignee_id,
        })
        .await;
        Ok(conversation)
    }

    /// Fold conversations into one.
    ///
    /// The primary is `primary_id` when given, otherwise the conversation
    /// with the most messages (earliest created on a tie). The store applies
    /// the merge atomically.
    ///
    /// # Errors
    /// [`Error::ValidationFailed`] for fewer than two distinct conversations,
    /// [`Error::InvalidPayload`] when `primary_id` is not among them and
    /// [`Error::NotFound`] for unknown conversations.
    #[instrument(skip(self, conversation_ids), fields(count = conversation_ids.len()))]
    pub async fn merge_conversations(
        &self,
        tenant_id: &str,
        conversation_ids: &[String],
        primary_id: Option<&str>,
    ) -> Result<MergeReport> {
        let mut ids: Vec<String> = Vec::with_capacity(conversation_ids.len());
        for id in conversation_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        if ids.len() < 2 {
            return Err(Error::ValidationFailed(vec![ValidationResult::error(
                "conversation_ids",
                "at least two distinct conversations are required",
                "MERGE_REQUIRES_TWO",
            )]));
        }

        let primary = match primary_id {
            Some(id) if ids.iter().any(|c| c == id) => id.to_string(),
            Some(id) => {
                return Err(Error::InvalidPayload(format!(
                    "primary conversation {id} is not part of the merge"
                )))
            }
            None => self.busiest_conversation(tenant_id, &ids).await?,
        };
        let secondaries: Vec<String> = ids.into_iter().filter(|id| *id != primary).collect();

        let report = self
            .store
            .merge_conversations(tenant_id, &primary, &secondaries)
            .await?;

        info!(
            primary_id = %report.primary.id,
            merged = report.merged_ids.len(),
            moved_messages = report.moved_messages,
            "Conversations merged"
        );
        self.publish(DomainEvent::ConversationMerged {
            tenant_id: tenant_id.to_string(),
            primary_id: report.primary.id.clone(),
            merged_ids: report.merged_ids.clone(),
            moved_messages: report.moved_messages,
        })
        .await;
        Ok(report)
    }

    async fn busiest_conversation(&self, tenant_id: &str, ids: &[String]) -> Result<String> {
        let mut best: Option<(usize, Conversation)> = None;
        for id in ids {
            let conversation = self.load_conversation(tenant_id, id).await?;
            let count = self.store.list_messages(tenant_id, id).await?.len();
            let better = match &best {
                None => true,
                Some((best_count, current)) => {
                    count > *best_count
                        || (count == *best_count && conversation.created_at < current.created_at)
                }
            };
            if better {
                best = Some((count, conversation));
            }
        }
        best.map(|(_, c)| c.id)
            .ok_or_else(|| Error::Internal("no conversation to merge into".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::message::ChannelMessage;
    use crate::orchestrator::test_support::{drain, harness};
    use crate::store::{ConversationStore, TenantChannel};

    #[tokio::test]
    async fn test_create_requires_known_customer_and_channel() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Email)]).await;
        let seeded = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Email, "ana@example.com", "hello"))
            .await
            .unwrap();
        let customer_id = h
            .store
            .get_conversation("t1", &seeded.conversation_id)
            .await
            .unwrap()
            .unwrap()
            .customer_id;

        let created = h
            .orchestrator
            .create_conversation(
                NewConversation::new("t1", &customer_id, ChannelType::Email)
                    .with_subject("Invoice")
                    .with_tag("billing"),
            )
            .await
            .unwrap();
        assert_eq!(created.subject.as_deref(), Some("Invoice"));
        assert!(created.tags.contains("billing"));
        assert!(created.participants.contains(&customer_id));

        let err = h
            .orchestrator
            .create_conversation(NewConversation::new("t1", "nobody", ChannelType::Email))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = h
            .orchestrator
            .create_conversation(NewConversation::new("t1", &customer_id, ChannelType::Sms))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelNotConfigured(_)));
    }

    #[tokio::test]
    async fn test_update_reports_changed_fields() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Web)]).await;
        let seeded = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Web, "v1", "hi"))
            .await
            .unwrap();
        let mut rx = h.bus.subscribe();

        let updated = h
            .orchestrator
            .update_conversation(
                "t1",
                &seeded.conversation_id,
                ConversationUpdate {
                    status: Some(ConversationStatus::Pending),
                    priority: Some(Priority::Normal),
                    add_tags: vec!["vip".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ConversationStatus::Pending);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![DomainEvent::ConversationUpdated {
                tenant_id: "t1".to_string(),
                conversation_id: seeded.conversation_id.clone(),
                changes: vec!["status".to_string(), "tags".to_string()],
            }]
        );

        // No-op update publishes nothing
        h.orchestrator
            .update_conversation("t1", &seeded.conversation_id, ConversationUpdate::default())
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_counters_written_since_load() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Web)]).await;
        let seeded = h
            .orchestrator
            .ingest_message(
                "t1",
                ChannelMessage::new(ChannelType::Web, "v1", "first").with_provider_id("w-1"),
            )
            .await
            .unwrap();
        let stale = h
            .store
            .get_conversation("t1", &seeded.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.counters.total, 1);

        h.orchestrator
            .ingest_message(
                "t1",
                ChannelMessage::new(ChannelType::Web, "v1", "second").with_provider_id("w-2"),
            )
            .await
            .unwrap();

        let updated = h
            .orchestrator
            .update_conversation(
                "t1",
                &stale.id,
                ConversationUpdate {
                    add_tags: vec!["vip".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.tags.contains("vip"));
        assert_eq!(updated.counters.total, 2);

        let assigned = h
            .orchestrator
            .assign_conversation("t1", &stale.id, Some("agent-1".to_string()))
            .await
            .unwrap();
        assert_eq!(assigned.counters.total, 2);
        assert!(assigned.tags.contains("vip"));
        assert_eq!(assigned.ticket_id, updated.ticket_id);
    }

    #[tokio::test]
    async fn test_assign_adds_participant() {
        let h = harness(&[TenantChannel::new("t1", ChannelType::Web)]).await;
        let seeded = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Web, "v1", "hi"))
            .await
            .unwrap();
        let mut rx = h.bus.subscribe();

        let assigned = h
            .orchestrator
            .assign_conversation("t1", &seeded.conversation_id, Some("agent-1".to_string()))
            .await
            .unwrap();
        assert_eq!(assigned.assignee_id.as_deref(), Some("agent-1"));
        assert!(assigned.participants.contains("agent-1"));

        h.orchestrator
            .assign_conversation("t1", &seeded.conversation_id, Some("agent-2".to_string()))
            .await
            .unwrap();

        // Re-assigning the same agent is a no-op
        h.orchestrator
            .assign_conversation("t1", &seeded.conversation_id, Some("agent-2".to_string()))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events.last(),
            Some(DomainEvent::ConversationAssigned { assignee_id: Some(a), previous_assignee_id: Some(p), .. })
                if a == "agent-2" && p == "agent-1"
        ));
    }

    #[tokio::test]
    async fn test_merge_picks_busiest_conversation() {
        let h = harness(&[
            TenantChannel::new("t1", ChannelType::WhatsApp),
            TenantChannel::new("t1", ChannelType::Email),
        ])
        .await;
        let a = h
            .orchestrator
            .ingest_message(
                "t1",
                ChannelMessage::new(ChannelType::WhatsApp, "15550001111", "one").with_provider_id("w1"),
            )
            .await
            .unwrap();
        h.orchestrator
            .ingest_message(
                "t1",
                ChannelMessage::new(ChannelType::WhatsApp, "15550001111", "two").with_provider_id("w2"),
            )
            .await
            .unwrap();
        let b = h
            .orchestrator
            .ingest_message("t1", ChannelMessage::new(ChannelType::Email, "b@example.com", "mail"))
            .await
            .unwrap();
        h.orchestrator
            .update_conversation(
                "t1",
                &a.conversation_id,
                ConversationUpdate {
                    add_tags: vec!["a".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        h.orchestrator
            .update_conversation(
                "t1",
                &b.conversation_id,
                ConversationUpdate {
                    add_tags: vec!["b".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let report = h
            .orchestrator
            .merge_conversations(
                "t1",
                &[b.conversation_id.clone(), a.conversation_id.clone()],
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.primary.id, a.conversation_id);
        assert_eq!(report.moved_messages, 1);
        let tags: Vec<_> = report.primary.tags.iter().cloned().collect();
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            h.store.list_messages("t1", &a.conversation_id).await.unwrap().len(),
            3
        );

        let merged = h
            .store
            .get_conversation("t1", &b.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.status, ConversationStatus::Closed);
        assert_eq!(merged.merged_into.as_deref(), Some(a.conversation_id.as_str()));
    }

    #[tokio::test]
    async fn test_merge_rejects_single_conversation() {
        let h = harness(&[]).await;
        let err = h
            .orchestrator
            .merge_conversations("t1", &["c1".to_string(), "c1".to_string()], None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);

        let err = h
            .orchestrator
            .merge_conversations("t1", &["c1".to_string(), "c2".to_string()], Some("c3"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }
}
