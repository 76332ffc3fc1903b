//! Application wiring
//!
//! Builds the enabled channel adapters, registers them and assembles the
//! orchestrator over a caller-supplied conversation store.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use courier_channels::{
    DeliverySettings, EmailAdapter, EmailConfig, InstagramAdapter, InstagramConfig,
    MessengerAdapter, MessengerConfig, SmsAdapter, SmsConfig, WebAdapter, WebConfig,
    WhatsAppAdapter, WhatsAppConfig,
};
use courier_core::utils::RetryConfig;
use courier_core::{
    AdapterRegistry, ChannelType, ConversationOrchestrator, ConversationStore, EventBus,
    MessageRouter, SessionContextTracker,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a transport layer needs to serve traffic
pub struct Courier {
    pub registry: Arc<AdapterRegistry>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub events: EventBus,
    pub sessions: Arc<SessionContextTracker>,
    /// Web chat adapter, kept for the websocket layer to subscribe to
    pub web: Option<Arc<WebAdapter>>,
}

fn delivery_settings(config: &AppConfig) -> DeliverySettings {
    DeliverySettings::default()
        .with_request_timeout(Duration::from_secs(config.delivery.request_timeout_secs))
        .with_retry(RetryConfig::default().with_max_attempts(config.delivery.max_attempts))
        .with_idempotency_ttl(Duration::from_secs(config.cache.idempotency_ttl_secs))
        .with_idempotency_capacity(config.cache.max_entries)
}

/// Build and register every enabled adapter.
///
/// A provider channel whose credentials are missing from the environment
/// is skipped with a warning.
pub fn build_registry(config: &AppConfig) -> Result<(AdapterRegistry, Option<Arc<WebAdapter>>)> {
    let registry = AdapterRegistry::new();
    let delivery = delivery_settings(config);
    let channels = &config.channels;

    if channels.whatsapp.enabled {
        match WhatsAppConfig::from_env() {
            Ok(wa) => {
                let mut wa = wa
                    .with_template_cache_ttl(config.cache.template_ttl())
                    .with_delivery(delivery.clone());
                wa.template_cache_capacity = config.cache.max_entries;
                let adapter = WhatsAppAdapter::new(wa).context("Failed to build WhatsApp adapter")?;
                registry.register(Arc::new(adapter));
            }
            Err(e) => warn!("WhatsApp adapter not started: {}", e),
        }
    }

    if channels.instagram.enabled {
        match InstagramConfig::from_env() {
            Ok(ig) => {
                let mut ig = ig
                    .with_username_cache_ttl(config.cache.username_ttl())
                    .with_delivery(delivery.clone());
                ig.username_cache_capacity = config.cache.max_entries;
                let adapter =
                    InstagramAdapter::new(ig).context("Failed to build Instagram adapter")?;
                registry.register(Arc::new(adapter));
            }
            Err(e) => warn!("Instagram adapter not started: {}", e),
        }
    }

    if channels.messenger.enabled {
        match MessengerConfig::from_env() {
            Ok(fb) => {
                let adapter = MessengerAdapter::new(fb.with_delivery(delivery.clone()))
                    .context("Failed to build Messenger adapter")?;
                registry.register(Arc::new(adapter));
            }
            Err(e) => warn!("Messenger adapter not started: {}", e),
        }
    }

    if channels.sms.enabled {
        match SmsConfig::from_env() {
            Ok(sms) => {
                // SMS sends are never retried
                let settings = delivery.clone().with_retry(RetryConfig::no_retry());
                let adapter = SmsAdapter::new(sms.with_delivery(settings))
                    .context("Failed to build SMS adapter")?;
                registry.register(Arc::new(adapter));
            }
            Err(e) => warn!("SMS adapter not started: {}", e),
        }
    }

    if channels.email.enabled {
        match EmailConfig::from_env() {
            Ok(email) => {
                let adapter = EmailAdapter::new(email.with_delivery(delivery.clone()))
                    .context("Failed to build e-mail adapter")?;
                registry.register(Arc::new(adapter));
            }
            Err(e) => warn!("E-mail adapter not started: {}", e),
        }
    }

    let mut web = None;
    if channels.web.enabled {
        let web_config = WebConfig {
            delivery: delivery.clone(),
            ..WebConfig::default()
        }
        .with_max_message_length(channels.web.max_message_length)
        .with_outbox_capacity(channels.web.outbox_capacity);
        let adapter = Arc::new(WebAdapter::new(web_config).context("Failed to build web adapter")?);
        registry.register(adapter.clone());
        web = Some(adapter);
    }

    Ok((registry, web))
}

/// Wire adapters, router, event bus and orchestrator
pub fn bootstrap(config: &AppConfig, store: Arc<dyn ConversationStore>) -> Result<Courier> {
    let (registry, web) = build_registry(config)?;
    let registry = Arc::new(registry);

    let events = EventBus::new(config.orchestrator.event_bus_capacity);
    let sessions = Arc::new(SessionContextTracker::new());
    let orchestrator = ConversationOrchestrator::new(
        store,
        MessageRouter::new(Arc::clone(&registry)),
        Arc::new(events.clone()),
        config.orchestrator.to_orchestrator_config(),
    )
    .with_sessions(Arc::clone(&sessions));

    let channels: Vec<&'static str> = registry.channels().iter().map(ChannelType::as_str).collect();
    info!(channels = ?channels, "Courier initialized");

    Ok(Courier {
        registry,
        orchestrator: Arc::new(orchestrator),
        events,
        sessions,
        web,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use courier_core::InMemoryStore;

    #[test]
    fn test_delivery_settings_follow_config() {
        let config = load_config_from_str(
            r#"
            [delivery]
            request_timeout_secs = 3
            max_attempts = 5

            [cache]
            idempotency_ttl_secs = 60
            max_entries = 50
            "#,
        )
        .unwrap();
        let settings = delivery_settings(&config);
        assert_eq!(settings.request_timeout, Duration::from_secs(3));
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.idempotency_ttl, Duration::from_secs(60));
        assert_eq!(settings.idempotency_capacity, 50);
    }

    #[tokio::test]
    async fn test_default_config_registers_web_only() {
        let config = load_config_from_str("").unwrap();
        let courier = bootstrap(&config, Arc::new(InMemoryStore::new())).unwrap();
        assert_eq!(courier.registry.channels(), vec![ChannelType::Web]);
        assert!(courier.web.is_some());
        assert_eq!(
            courier.orchestrator.config().ticket_reuse_window,
            chrono::Duration::hours(6)
        );
    }

    #[tokio::test]
    async fn test_disabled_web_channel_is_not_registered() {
        let config = load_config_from_str("[channels.web]\nenabled = false\n").unwrap();
        let courier = bootstrap(&config, Arc::new(InMemoryStore::new())).unwrap();
        assert!(courier.registry.channels().is_empty());
        assert!(courier.web.is_none());
    }
}
