//! In-memory conversation store
//!
//! All state sits behind one lock, so every trait method (including
//! `merge_conversations`) is atomic with respect to the others.

use super::types::{
    Conversation, ConversationPatch, ConversationStatus, Customer, CustomerIdentity, MergeReport,
    MessageRecord, PatchOutcome, SaveOutcome, TenantChannel, Ticket, TicketStatus,
};
use super::ConversationStore;
use crate::error::{Error, Result};
use crate::message::{ChannelType, SenderType};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    channels: Vec<TenantChannel>,
    customers: HashMap<String, Customer>,
    conversations: HashMap<String, Conversation>,
    tickets: HashMap<String, Ticket>,
    /// Insertion-ordered messages
    messages: Vec<MessageRecord>,
    /// (tenant, channel, provider id) -> index into `messages`
    provider_index: HashMap<(String, ChannelType, String), usize>,
}

/// In-memory [`ConversationStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant channel
    pub async fn add_channel(&self, channel: TenantChannel) {
        let mut state = self.state.write().await;
        state.channels.retain(|c| c.id != channel.id);
        state.channels.push(channel);
    }

    /// Number of stored messages
    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    /// All conversations of a tenant
    pub async fn conversations(&self, tenant_id: &str) -> Vec<Conversation> {
        let state = self.state.read().await;
        let mut all: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    /// All tickets of a tenant
    pub async fn tickets(&self, tenant_id: &str) -> Vec<Ticket> {
        let state = self.state.read().await;
        state
            .tickets
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

fn conversation_mut<'a>(
    state: &'a mut State,
    tenant_id: &str,
    conversation_id: &str,
) -> Result<&'a mut Conversation> {
    state
        .conversations
        .get_mut(conversation_id)
        .filter(|c| c.tenant_id == tenant_id)
        .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryStore {
    async fn find_active_channel(
        &self,
        tenant_id: &str,
        channel: ChannelType,
    ) -> Result<Option<TenantChannel>> {
        let state = self.state.read().await;
        Ok(state
            .channels
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.channel == channel && c.active)
            .cloned())
    }

    async fn find_customer(
        &self,
        tenant_id: &str,
        identity: &CustomerIdentity,
    ) -> Result<Option<Customer>> {
        let state = self.state.read().await;
        let mut matches: Vec<&Customer> = state
            .customers
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.matches(identity))
            .collect();
        matches.sort_by_key(|c| c.created_at);
        Ok(matches.first().map(|c| (*c).clone()))
    }

    async fn get_customer(&self, tenant_id: &str, customer_id: &str) -> Result<Option<Customer>> {
        let state = self.state.read().await;
        Ok(state
            .customers
            .get(customer_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn create_customer(&self, customer: Customer) -> Result<Customer> {
        let mut state = self.state.write().await;
        state.customers.insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn update_customer(&self, customer: Customer) -> Result<Customer> {
        let mut state = self.state.write().await;
        if !state.customers.contains_key(&customer.id) {
            return Err(Error::NotFound(format!("customer {}", customer.id)));
        }
        state.customers.insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn get_conversation(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .get(conversation_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_open_conversation(
        &self,
        tenant_id: &str,
        customer_id: &str,
        channel_id: &str,
    ) -> Result<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && c.customer_id == customer_id
                    && c.channel_id == channel_id
                    && c.status.is_active()
            })
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        let mut state = self.state.write().await;
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        patch: ConversationPatch,
    ) -> Result<PatchOutcome> {
        let mut state = self.state.write().await;
        let stored = conversation_mut(&mut state, tenant_id, conversation_id)?;
        let previous_assignee_id = stored.assignee_id.clone();
        let changes = patch.apply(stored);
        if !changes.is_empty() {
            stored.updated_at = Utc::now();
        }
        Ok(PatchOutcome {
            conversation: stored.clone(),
            changes,
            previous_assignee_id,
        })
    }

    async fn find_recent_open_ticket(
        &self,
        tenant_id: &str,
        customer_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        let state = self.state.read().await;
        Ok(state
            .tickets
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.customer_id == customer_id
                    && matches!(t.status, TicketStatus::Open | TicketStatus::Pending)
                    && t.updated_at >= since
            })
            .max_by_key(|t| t.updated_at)
            .cloned())
    }

    async fn get_ticket(&self, tenant_id: &str, ticket_id: &str) -> Result<Option<Ticket>> {
        let state = self.state.read().await;
        Ok(state
            .tickets
            .get(ticket_id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned())
    }

    async fn create_ticket(&self, ticket: Ticket) -> Result<Ticket> {
        let mut state = self.state.write().await;
        state.tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(ticket)
    }

    async fn link_ticket(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        ticket_id: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        match state.tickets.get_mut(ticket_id) {
            Some(ticket) if ticket.tenant_id == tenant_id => ticket.updated_at = now,
            _ => return Err(Error::NotFound(format!("ticket {ticket_id}"))),
        }
        let conversation = conversation_mut(&mut state, tenant_id, conversation_id)?;
        conversation.ticket_id = Some(ticket_id.to_string());
        conversation.updated_at = now;
        Ok(())
    }

    async fn find_message_by_provider_id(
        &self,
        tenant_id: &str,
        channel: ChannelType,
        provider_message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let state = self.state.read().await;
        let key = (
            tenant_id.to_string(),
            channel,
            provider_message_id.to_string(),
        );
        Ok(state
            .provider_index
            .get(&key)
            .and_then(|idx| state.messages.get(*idx))
            .cloned())
    }

    async fn save_message(&self, record: MessageRecord) -> Result<SaveOutcome> {
        let mut state = self.state.write().await;
        let key = record.message.message.provider_message_id().map(|id| {
            (
                record.tenant_id.clone(),
                record.message.message.channel,
                id.to_string(),
            )
        });

        if let Some(key) = &key {
            if let Some(existing) = state.provider_index.get(key).and_then(|i| state.messages.get(*i)) {
                return Ok(SaveOutcome::Existing(existing.clone()));
            }
        }

        let idx = state.messages.len();
        state.messages.push(record.clone());
        if let Some(key) = key {
            state.provider_index.insert(key, idx);
        }
        Ok(SaveOutcome::Created(record))
    }

    async fn list_messages(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<MessageRecord>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn increment_message_counters(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        sender: SenderType,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let conversation = conversation_mut(&mut state, tenant_id, conversation_id)?;
        conversation.counters.record(sender);
        conversation.last_message_at = Some(conversation.last_message_at.map_or(at, |t| t.max(at)));
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn merge_conversations(
        &self,
        tenant_id: &str,
        primary_id: &str,
        secondary_ids: &[String],
    ) -> Result<MergeReport> {
        let mut state = self.state.write().await;

        // Validate everything before touching anything
        conversation_mut(&mut state, tenant_id, primary_id)?;
        let mut secondaries = Vec::with_capacity(secondary_ids.len());
        for id in secondary_ids {
            if id == primary_id {
                return Err(Error::InvalidPayload(format!(
                    "conversation {id} cannot be merged into itself"
                )));
            }
            let conversation = conversation_mut(&mut state, tenant_id, id)?;
            if let Some(target) = &conversation.merged_into {
                return Err(Error::InvalidPayload(format!(
                    "conversation {id} was already merged into {target}"
                )));
            }
            secondaries.push(conversation.clone());
        }

        let now = Utc::now();
        let mut moved_messages = 0;
        for record in state
            .messages
            .iter_mut()
            .filter(|m| m.tenant_id == tenant_id && secondary_ids.contains(&m.conversation_id))
        {
            record.conversation_id = primary_id.to_string();
            record.message.message.conversation_id = Some(primary_id.to_string());
            moved_messages += 1;
        }

        let primary = conversation_mut(&mut state, tenant_id, primary_id)?;
        for secondary in &secondaries {
            primary.tags.extend(secondary.tags.iter().cloned());
            primary
                .participants
                .extend(secondary.participants.iter().cloned());
            primary.notes.extend(secondary.notes.iter().cloned());
            primary.counters.absorb(&secondary.counters);
            primary.last_message_at = primary.last_message_at.max(secondary.last_message_at);
            if primary.ticket_id.is_none() {
                primary.ticket_id.clone_from(&secondary.ticket_id);
            }
        }
        primary.notes.sort_by_key(|n| n.created_at);
        primary.updated_at = now;
        let primary = primary.clone();

        for id in secondary_ids {
            let secondary = conversation_mut(&mut state, tenant_id, id)?;
            secondary.status = ConversationStatus::Closed;
            secondary.merged_into = Some(primary_id.to_string());
            secondary.notes.clear();
            secondary.updated_at = now;
        }

        Ok(MergeReport {
            primary,
            merged_ids: secondary_ids.to_vec(),
            moved_messages,
        })
    }
}
