//! Session context tracker
//!
//! Best-effort, process-local record of the last inbound and outbound message
//! per `(tenant, conversation)`. Used for messaging-window decisions; nothing
//! here is persisted.

use crate::message::ChannelType;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Snapshot of one conversation's recent traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Tenant ID
    pub tenant_id: String,
    /// Conversation ID
    pub conversation_id: String,
    /// Channel of the conversation
    pub channel: ChannelType,
    /// Last inbound message time
    pub last_inbound_at: Option<DateTime<Utc>>,
    /// Last inbound message ID
    pub last_inbound_message_id: Option<String>,
    /// Last outbound message time
    pub last_outbound_at: Option<DateTime<Utc>>,
    /// Last outbound message ID
    pub last_outbound_message_id: Option<String>,
}

impl SessionSnapshot {
    fn new(tenant_id: &str, conversation_id: &str, channel: ChannelType) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            channel,
            last_inbound_at: None,
            last_inbound_message_id: None,
            last_outbound_at: None,
            last_outbound_message_id: None,
        }
    }

    /// Most recent activity in either direction
    #[must_use]
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_inbound_at.max(self.last_outbound_at)
    }
}

/// Per-conversation session tracker.
///
/// Updates go through `DashMap::entry`, which holds the shard lock for the
/// key, so concurrent inbound and outbound updates of the same conversation
/// cannot lose each other's fields.
#[derive(Debug, Default)]
pub struct SessionContextTracker {
    sessions: DashMap<String, SessionSnapshot>,
}

fn session_key(tenant_id: &str, conversation_id: &str) -> String {
    format!("{tenant_id}:{conversation_id}")
}

impl SessionContextTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound message. An older timestamp than the one already
    /// recorded is ignored.
    pub fn record_inbound(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        channel: ChannelType,
        message_id: &str,
        at: DateTime<Utc>,
    ) {
        let mut entry = self
            .sessions
            .entry(session_key(tenant_id, conversation_id))
            .or_insert_with(|| SessionSnapshot::new(tenant_id, conversation_id, channel));
        entry.channel = channel;
        if entry.last_inbound_at.is_none_or(|last| at >= last) {
            entry.last_inbound_at = Some(at);
            entry.last_inbound_message_id = Some(message_id.to_string());
        }
    }

    /// Record an outbound message; out-of-order records are ignored
    pub fn record_outbound(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        channel: ChannelType,
        message_id: &str,
        at: DateTime<Utc>,
    ) {
        let mut entry = self
            .sessions
            .entry(session_key(tenant_id, conversation_id))
            .or_insert_with(|| SessionSnapshot::new(tenant_id, conversation_id, channel));
        entry.channel = channel;
        if entry.last_outbound_at.is_none_or(|last| at >= last) {
            entry.last_outbound_at = Some(at);
            entry.last_outbound_message_id = Some(message_id.to_string());
        }
    }

    /// Current snapshot for a conversation
    #[must_use]
    pub fn get(&self, tenant_id: &str, conversation_id: &str) -> Option<SessionSnapshot> {
        self.sessions
            .get(&session_key(tenant_id, conversation_id))
            .map(|s| s.clone())
    }

    /// Drop snapshots idle for longer than `max_age`. Returns how many were removed.
    pub fn prune_idle(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.last_activity().is_some_and(|at| at >= cutoff));
        before.saturating_sub(self.sessions.len())
    }

    /// Number of tracked sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
