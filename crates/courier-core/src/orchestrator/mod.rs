//! Conversation orchestrator
//!
//! Turns raw channel events into durable, deduplicated, threaded messages
//! and turns agent replies into channel deliveries. Owns every persistence
//! call for conversations and messages.
//!
//! Side effects that must not fail an otherwise successful operation (event
//! publication, counter updates, the automation hook) go through
//! log-and-continue boundaries.

mod ingest;
mod lifecycle;
mod send;
mod tickets;

pub use ingest::{IngestOutcome, WebhookOutcome};
pub use lifecycle::{ConversationUpdate, NewConversation};
pub use send::SendRequest;

use crate::error::{ApiResponse, Result};
use crate::event_bus::{DomainEvent, EventPublisher};
use crate::message::ChannelType;
use crate::router::MessageRouter;
use crate::session::SessionContextTracker;
use crate::store::ConversationStore;
use crate::utils::{RateLimitConfig, RateLimiter};
use std::sync::Arc;
use tracing::warn;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// How far back an open ticket may be reused
    pub ticket_reuse_window: chrono::Duration,
    /// Automation requests allowed per tenant per hour
    pub automation_max_per_hour: u32,
    /// Version tag stamped on processed messages
    pub processing_version: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ticket_reuse_window: chrono::Duration::hours(6),
            automation_max_per_hour: 100,
            processing_version: "1.0".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ticket reuse window
    #[must_use]
    pub fn with_ticket_reuse_window(mut self, window: chrono::Duration) -> Self {
        self.ticket_reuse_window = window;
        self
    }

    /// Set the hourly automation ceiling
    #[must_use]
    pub fn with_automation_max_per_hour(mut self, max: u32) -> Self {
        self.automation_max_per_hour = max;
        self
    }

    /// Set the processing version tag
    #[must_use]
    pub fn with_processing_version(mut self, version: impl Into<String>) -> Self {
        self.processing_version = version.into();
        self
    }
}

/// Top-level coordinator for inbound and outbound messages
pub struct ConversationOrchestrator {
    store: Arc<dyn ConversationStore>,
    router: MessageRouter,
    events: Arc<dyn EventPublisher>,
    sessions: Arc<SessionContextTracker>,
    automation: RateLimiter,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        router: MessageRouter,
        events: Arc<dyn EventPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        let automation = RateLimiter::new(RateLimitConfig::per_hour(config.automation_max_per_hour));
        Self {
            store,
            router,
            events,
            sessions: Arc::new(SessionContextTracker::new()),
            automation,
            config,
        }
    }

    /// Share an existing session tracker
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionContextTracker>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Session tracker
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionContextTracker> {
        &self.sessions
    }

    /// Message router
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Webhook entry point for transports: parses the channel name, ingests
    /// the payload and wraps the outcome in the API envelope.
    pub async fn handle_webhook(
        &self,
        tenant_id: &str,
        channel: &str,
        payload: &serde_json::Value,
    ) -> ApiResponse<WebhookOutcome> {
        let result = match channel.parse::<ChannelType>() {
            Ok(channel) => self.ingest_webhook(tenant_id, channel, payload).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(tenant_id = %tenant_id, channel = %channel, code = %e.code(), error = %e, "Webhook ingestion failed");
        }
        result.into()
    }

    /// Publish an event, logging failures
    async fn publish(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.events.publish(event).await {
            warn!(event_type, error = %e, "Failed to publish domain event");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::registry::AdapterRegistry;
    use crate::store::{InMemoryStore, TenantChannel};

    pub(crate) struct Harness {
        pub store: InMemoryStore,
        pub registry: Arc<AdapterRegistry>,
        pub bus: EventBus,
        pub orchestrator: ConversationOrchestrator,
    }

    pub(crate) async fn harness(channels: &[TenantChannel]) -> Harness {
        let store = InMemoryStore::new();
        for channel in channels {
            store.add_channel(channel.clone()).await;
        }
        let registry = Arc::new(AdapterRegistry::new());
        let bus = EventBus::new(64);
        let orchestrator = ConversationOrchestrator::new(
            Arc::new(store.clone()),
            MessageRouter::new(Arc::clone(&registry)),
            Arc::new(bus.clone()),
            OrchestratorConfig::default(),
        );
        Harness {
            store,
            registry,
            bus,
            orchestrator,
        }
    }

    /// Drain everything published so far
    pub(crate) fn drain(rx: &mut tokio::sync::broadcast::Receiver<DomainEvent>) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}
