//! Persistent records owned by the orchestrator

use crate::message::{ChannelType, MessageDeliveryResult, ProcessedMessage, SenderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Keep only ASCII digits of a phone number
#[must_use]
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// A channel configured for a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantChannel {
    /// Channel record ID
    pub id: String,
    /// Tenant ID
    pub tenant_id: String,
    /// Channel type
    pub channel: ChannelType,
    /// Display name
    pub name: String,
    /// Whether the channel accepts traffic
    pub active: bool,
    /// Whether customer messages trigger tenant automation
    pub automation_enabled: bool,
}

impl TenantChannel {
    /// Create an active channel record
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, channel: ChannelType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            channel,
            name: channel.as_str().to_string(),
            active: true,
            automation_enabled: false,
        }
    }

    /// Enable automation
    #[must_use]
    pub fn with_automation(mut self) -> Self {
        self.automation_enabled = true;
        self
    }
}

/// Identity used to find or create a customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerIdentity {
    /// Channel the identity was observed on
    pub channel: ChannelType,
    /// Channel-native user ID
    pub channel_user_id: String,
    /// E-mail address, if known
    pub email: Option<String>,
    /// Phone number, if known (any format)
    pub phone: Option<String>,
    /// Display name, if known
    pub name: Option<String>,
}

/// A customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer ID
    pub id: String,
    /// Tenant ID
    pub tenant_id: String,
    /// Display name
    pub name: Option<String>,
    /// E-mail address (lowercase)
    pub email: Option<String>,
    /// Phone number (digits only)
    pub phone: Option<String>,
    /// Channel-native user IDs
    #[serde(default)]
    pub channel_ids: BTreeMap<ChannelType, String>,
    /// Created at
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Create a customer from an observed identity
    #[must_use]
    pub fn from_identity(tenant_id: impl Into<String>, identity: &CustomerIdentity) -> Self {
        let mut channel_ids = BTreeMap::new();
        channel_ids.insert(identity.channel, identity.channel_user_id.clone());
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            name: identity.name.clone(),
            email: identity.email.as_deref().map(str::to_lowercase),
            phone: identity
                .phone
                .as_deref()
                .map(normalize_phone)
                .filter(|p| !p.is_empty()),
            channel_ids,
            created_at: Utc::now(),
        }
    }

    /// Whether this customer matches an identity by e-mail, phone or channel ID
    #[must_use]
    pub fn matches(&self, identity: &CustomerIdentity) -> bool {
        let email_match = match (&self.email, &identity.email) {
            (Some(mine), Some(theirs)) => mine.eq_ignore_ascii_case(theirs),
            _ => false,
        };
        let phone_match = match (&self.phone, &identity.phone) {
            (Some(mine), Some(theirs)) => {
                let theirs = normalize_phone(theirs);
                !theirs.is_empty() && *mine == theirs
            }
            _ => false,
        };
        let channel_match = self
            .channel_ids
            .get(&identity.channel)
            .is_some_and(|id| *id == identity.channel_user_id);
        email_match || phone_match || channel_match
    }

    /// Channel-native address to reach this customer on a channel
    #[must_use]
    pub fn recipient_for(&self, channel: ChannelType) -> Option<String> {
        match channel {
            ChannelType::WhatsApp => self
                .phone
                .clone()
                .or_else(|| self.channel_ids.get(&channel).cloned()),
            ChannelType::Sms => self
                .phone
                .as_ref()
                .map(|p| format!("+{p}"))
                .or_else(|| self.channel_ids.get(&channel).cloned()),
            ChannelType::Email => self
                .email
                .clone()
                .or_else(|| self.channel_ids.get(&channel).cloned()),
            ChannelType::Instagram | ChannelType::Messenger | ChannelType::Web => {
                self.channel_ids.get(&channel).cloned()
            }
        }
    }
}

/// Conversation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Waiting for an agent
    #[default]
    Open,
    /// Waiting for the customer
    Pending,
    /// Resolved by an agent
    Resolved,
    /// Closed (including merged)
    Closed,
}

impl ConversationStatus {
    /// Whether new inbound messages can attach to this conversation
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Pending)
    }
}

/// Conversation priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low
    Low,
    /// Normal
    #[default]
    Normal,
    /// High
    High,
    /// Urgent
    Urgent,
}

/// Per-sender message counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounters {
    /// All messages
    pub total: u64,
    /// Customer messages
    pub customer: u64,
    /// Agent messages
    pub agent: u64,
    /// System messages
    pub system: u64,
}

impl MessageCounters {
    /// Count one message from a sender
    pub fn record(&mut self, sender: SenderType) {
        self.total += 1;
        match sender {
            SenderType::Customer => self.customer += 1,
            SenderType::Agent => self.agent += 1,
            SenderType::System => self.system += 1,
        }
    }

    /// Add another set of counters
    pub fn absorb(&mut self, other: &MessageCounters) {
        self.total += other.total;
        self.customer += other.customer;
        self.agent += other.agent;
        self.system += other.system;
    }
}

/// Internal note on a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationNote {
    /// Note ID
    pub id: String,
    /// Author ID
    pub author_id: String,
    /// Note body
    pub body: String,
    /// Created at
    pub created_at: DateTime<Utc>,
}

/// A conversation between a customer and the tenant on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID
    pub id: String,
    /// Tenant ID
    pub tenant_id: String,
    /// Customer ID
    pub customer_id: String,
    /// Tenant channel record ID
    pub channel_id: String,
    /// Channel type
    pub channel: ChannelType,
    /// Status
    pub status: ConversationStatus,
    /// Priority
    pub priority: Priority,
    /// Subject (e-mail subject or first message excerpt)
    pub subject: Option<String>,
    /// Linked ticket
    pub ticket_id: Option<String>,
    /// Assigned agent
    pub assignee_id: Option<String>,
    /// Tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Participant IDs (customer, agents)
    #[serde(default)]
    pub participants: BTreeSet<String>,
    /// Internal notes
    #[serde(default)]
    pub notes: Vec<ConversationNote>,
    /// Message counters
    #[serde(default)]
    pub counters: MessageCounters,
    /// Last message time
    pub last_message_at: Option<DateTime<Utc>>,
    /// Conversation this one was merged into
    pub merged_into: Option<String>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Updated at
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Open a new conversation
    #[must_use]
    pub fn new(customer: &Customer, channel: &TenantChannel) -> Self {
        let now = Utc::now();
        let mut participants = BTreeSet::new();
        participants.insert(customer.id.clone());
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: channel.tenant_id.clone(),
            customer_id: customer.id.clone(),
            channel_id: channel.id.clone(),
            channel: channel.channel,
            status: ConversationStatus::Open,
            priority: Priority::Normal,
            subject: None,
            ticket_id: None,
            assignee_id: None,
            tags: BTreeSet::new(),
            participants,
            notes: Vec::new(),
            counters: MessageCounters::default(),
            last_message_at: None,
            merged_into: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ticket status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Open
    #[default]
    Open,
    /// Pending
    Pending,
    /// Solved
    Solved,
    /// Closed
    Closed,
}

/// A support ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: String,
    /// Tenant ID
    pub tenant_id: String,
    /// Customer ID
    pub customer_id: String,
    /// Channel the ticket was opened on
    pub channel: ChannelType,
    /// Subject
    pub subject: String,
    /// Initial description
    pub description: String,
    /// Status
    pub status: TicketStatus,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Updated at
    pub updated_at: DateTime<Utc>,
}

/// Message direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the customer
    Inbound,
    /// To the customer
    Outbound,
}

/// A persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Tenant ID
    pub tenant_id: String,
    /// Conversation ID
    pub conversation_id: String,
    /// Direction
    pub direction: Direction,
    /// Processed message, channel payload retained
    pub message: ProcessedMessage,
    /// Delivery outcome (outbound only)
    pub delivery: Option<MessageDeliveryResult>,
}

impl MessageRecord {
    /// Internal message ID
    #[must_use]
    pub fn id(&self) -> &str {
        self.message.id()
    }
}

/// Result of a message insert
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Newly stored
    Created(MessageRecord),
    /// A message with the same provider ID was already stored
    Existing(MessageRecord),
}

/// Field-level conversation change.
///
/// The store applies it to the current record under its own lock, so
/// counters, ticket links and merge state written concurrently survive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPatch {
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
    /// New assignee; `Some(None)` unassigns
    pub assignee_id: Option<Option<String>>,
}

impl ConversationPatch {
    /// Apply to a conversation, returning the names of changed fields.
    ///
    /// A new assignee also joins the participants.
    pub fn apply(self, conversation: &mut Conversation) -> Vec<String> {
        let mut changes = Vec::new();
        if let Some(status) = self.status.filter(|s| *s != conversation.status) {
            conversation.status = status;
            changes.push("status".to_string());
        }
        if let Some(subject) = self.subject {
            if conversation.subject.as_deref() != Some(subject.as_str()) {
                conversation.subject = Some(subject);
                changes.push("subject".to_string());
            }
        }
        if let Some(priority) = self.priority.filter(|p| *p != conversation.priority) {
            conversation.priority = priority;
            changes.push("priority".to_string());
        }
        let mut tags_changed = false;
        for tag in self.add_tags {
            tags_changed |= conversation.tags.insert(tag);
        }
        for tag in &self.remove_tags {
            tags_changed |= conversation.tags.remove(tag);
        }
        if tags_changed {
            changes.push("tags".to_string());
        }
        if let Some(assignee) = self.assignee_id.filter(|a| *a != conversation.assignee_id) {
            if let Some(agent) = &assignee {
                conversation.participants.insert(agent.clone());
            }
            conversation.assignee_id = assignee;
            changes.push("assignee".to_string());
        }
        changes
    }
}

/// Result of a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Conversation after the patch
    pub conversation: Conversation,
    /// Names of changed fields; empty when nothing changed
    pub changes: Vec<String>,
    /// Assignee before the patch
    pub previous_assignee_id: Option<String>,
}

/// Result of a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Primary conversation after the merge
    pub primary: Conversation,
    /// Conversations closed by the merge
    pub merged_ids: Vec<String>,
    /// Messages moved into the primary conversation
    pub moved_messages: usize,
}
