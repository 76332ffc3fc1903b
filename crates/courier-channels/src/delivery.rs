//! Outbound delivery pipeline shared by all adapters
//!
//! Wraps a provider call with the idempotency cache, latency measurement
//! and send counters, and converts errors into a `failed` result so that
//! `send_message` never returns an error.

use courier_core::utils::metrics::{self, global as metrics_global};
use courier_core::utils::{Timer, TtlCache};
use courier_core::{ChannelType, MessageDeliveryResult, OutgoingMessage};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Remembers successful sends so a repeated request is answered locally
pub struct IdempotencyCache {
    cache: TtlCache<String, MessageDeliveryResult>,
}

impl IdempotencyCache {
    /// Create a cache
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(capacity, ttl),
        }
    }

    /// Key for a message: the caller's idempotency key, or a content hash
    #[must_use]
    pub fn key_for(message: &OutgoingMessage) -> String {
        if let Some(key) = message
            .options
            .idempotency_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
        {
            return format!("key:{key}");
        }

        let mut hasher = Sha256::new();
        hasher.update(message.message_type.as_str().as_bytes());
        for part in [
            message.recipient_id.as_str(),
            message.content.as_str(),
            message.reply_to_id.as_deref().unwrap_or_default(),
        ] {
            hasher.update([0x1f]);
            hasher.update(part.as_bytes());
        }
        if let Some(template) = &message.template {
            hasher.update([0x1f]);
            hasher.update(template.name.as_bytes());
            hasher.update([0x1f]);
            hasher.update(template.language.as_bytes());
        }
        for attachment in &message.attachments {
            hasher.update([0x1f]);
            hasher.update(
                attachment
                    .url
                    .as_deref()
                    .or(attachment.provider_media_id.as_deref())
                    .unwrap_or_default()
                    .as_bytes(),
            );
        }
        format!("hash:{}", hex::encode(hasher.finalize()))
    }

    /// Cached result for a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<MessageDeliveryResult> {
        self.cache.get(&key.to_string())
    }

    /// Remember a result. Failed results are not cached.
    pub fn remember(&self, key: String, result: &MessageDeliveryResult) {
        if result.is_sent() {
            self.cache.insert(key, result.clone());
        }
    }

    /// Number of remembered sends
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is remembered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Record send counters and latency. Infallible.
pub fn record_send(channel: ChannelType, result: &MessageDeliveryResult, elapsed_ms: f64) {
    let status = if result.is_sent() { "sent" } else { "failed" };
    metrics_global::counter_with_labels(
        metrics::CHANNEL_SEND_TOTAL,
        &[("channel", channel.as_str()), ("status", status)],
    )
    .inc();
    metrics_global::histogram_with_labels(
        metrics::CHANNEL_SEND_LATENCY_MS,
        &[("channel", channel.as_str())],
    )
    .observe(elapsed_ms);
}

/// Run one outbound send through the pipeline.
///
/// `send` returns the provider message ID on success.
pub async fn deliver<F, Fut>(
    channel: ChannelType,
    idempotency: &IdempotencyCache,
    message: &OutgoingMessage,
    send: F,
) -> MessageDeliveryResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = courier_core::Result<Option<String>>>,
{
    let key = IdempotencyCache::key_for(message);
    if let Some(cached) = idempotency.get(&key) {
        debug!(channel = %channel, message_id = %cached.message_id, "Idempotent resend answered from cache");
        return cached;
    }

    let timer = Timer::start();
    let result = match send().await {
        Ok(provider_id) => MessageDeliveryResult::sent(provider_id),
        Err(e) => {
            warn!(channel = %channel, code = %e.code(), error = %e, "Outbound send failed");
            MessageDeliveryResult::failed(&e)
        }
    };
    record_send(channel, &result, timer.elapsed_ms());
    idempotency.remember(key, &result);
    result
}
