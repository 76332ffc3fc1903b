//! Conversation data access
//!
//! The orchestrator persists customers, conversations, tickets and messages
//! through [`ConversationStore`]. [`InMemoryStore`] backs tests and
//! single-process deployments.

mod memory;
mod types;

pub use memory::InMemoryStore;
pub use types::{
    normalize_phone, Conversation, ConversationNote, ConversationPatch, ConversationStatus,
    Customer, CustomerIdentity, Direction, MergeReport, MessageCounters, MessageRecord,
    PatchOutcome, Priority, SaveOutcome, TenantChannel, Ticket, TicketStatus,
};

use crate::error::Result;
use crate::message::{ChannelType, SenderType};
use chrono::{DateTime, Utc};

/// Data-access capability consumed by the orchestrator
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Active channel record of a type for a tenant
    async fn find_active_channel(
        &self,
        tenant_id: &str,
        channel: ChannelType,
    ) -> Result<Option<TenantChannel>>;

    /// Find a customer by e-mail, phone or channel identity
    async fn find_customer(
        &self,
        tenant_id: &str,
        identity: &CustomerIdentity,
    ) -> Result<Option<Customer>>;

    /// Get a customer by ID
    async fn get_customer(&self, tenant_id: &str, customer_id: &str) -> Result<Option<Customer>>;

    /// Store a new customer
    async fn create_customer(&self, customer: Customer) -> Result<Customer>;

    /// Replace a customer record
    async fn update_customer(&self, customer: Customer) -> Result<Customer>;

    /// Get a conversation by ID
    async fn get_conversation(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>>;

    /// Most recent open/pending conversation of a customer on a channel record
    async fn find_open_conversation(
        &self,
        tenant_id: &str,
        customer_id: &str,
        channel_id: &str,
    ) -> Result<Option<Conversation>>;

    /// Store a new conversation
    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation>;

    /// Apply a field-level patch to the stored conversation atomically.
    /// `updated_at` moves only when a field changed.
    async fn update_conversation(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        patch: ConversationPatch,
    ) -> Result<PatchOutcome>;

    /// Open or pending ticket of a customer updated at or after `since`
    async fn find_recent_open_ticket(
        &self,
        tenant_id: &str,
        customer_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Ticket>>;

    /// Get a ticket by ID
    async fn get_ticket(&self, tenant_id: &str, ticket_id: &str) -> Result<Option<Ticket>>;

    /// Store a new ticket
    async fn create_ticket(&self, ticket: Ticket) -> Result<Ticket>;

    /// Bind a ticket to a conversation and touch the ticket
    async fn link_ticket(&self, tenant_id: &str, conversation_id: &str, ticket_id: &str)
        -> Result<()>;

    /// Message previously stored under a provider message ID
    async fn find_message_by_provider_id(
        &self,
        tenant_id: &str,
        channel: ChannelType,
        provider_message_id: &str,
    ) -> Result<Option<MessageRecord>>;

    /// Insert a message. A second insert with the same provider ID returns
    /// the stored record as [`SaveOutcome::Existing`].
    async fn save_message(&self, record: MessageRecord) -> Result<SaveOutcome>;

    /// Messages of a conversation in insertion order
    async fn list_messages(&self, tenant_id: &str, conversation_id: &str)
        -> Result<Vec<MessageRecord>>;

    /// Atomically count one message and bump `last_message_at`
    async fn increment_message_counters(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        sender: SenderType,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Fold secondary conversations into a primary one in a single
    /// transaction: messages, participants and notes move, tags and counters
    /// are unioned, secondaries close with `merged_into` set.
    async fn merge_conversations(
        &self,
        tenant_id: &str,
        primary_id: &str,
        secondary_ids: &[String],
    ) -> Result<MergeReport>;
}
