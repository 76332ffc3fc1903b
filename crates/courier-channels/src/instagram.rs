//! Instagram Messaging adapter
//!
//! Direct messages arrive as `entry[0].messaging[0]`, comments and mentions
//! as `entry[0].changes[0]`. Sender usernames are resolved through the
//! Graph API and cached; a failed lookup leaves the name empty.

use crate::delivery::{deliver, IdempotencyCache};
use crate::error::{Error, Result};
use crate::meta::{
    self, apply_event_message, check_window, customer_message, dropped_caption, send_body,
    window_violation, GraphChange, GraphEntry, GraphWebhook, MessagingEvent, SendResponse,
    DEFAULT_GRAPH_API,
};
use crate::transport::{DeliverySettings, HttpTransport};
use crate::util::{mask_for_logging, parse_timestamp};
use courier_core::utils::TtlCache;
use courier_core::{
    AttachmentType, ChannelAdapter, ChannelCapabilities, ChannelDetails, ChannelFeatures,
    ChannelMessage, ChannelType, CsatResponse, MessageDeliveryResult, OutgoingMessage, RateLimits,
    ValidationResult,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Instagram Messaging configuration
#[derive(Debug, Clone)]
pub struct InstagramConfig {
    /// Page access token of the linked Facebook page
    pub page_access_token: String,
    /// Instagram professional account ID
    pub account_id: String,
    /// Webhook verify token
    pub webhook_verify_token: String,
    /// App secret for `X-Hub-Signature-256` verification
    pub app_secret: Option<String>,
    /// Graph API base URL including the version
    pub api_base: String,
    /// How long resolved usernames are cached
    pub username_cache_ttl: Duration,
    /// Maximum cached usernames
    pub username_cache_capacity: usize,
    /// Timeout, retry and idempotency settings
    pub delivery: DeliverySettings,
}

impl InstagramConfig {
    /// Create with required fields
    #[must_use]
    pub fn new(page_access_token: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            page_access_token: page_access_token.into(),
            account_id: account_id.into(),
            webhook_verify_token: String::new(),
            app_secret: None,
            api_base: DEFAULT_GRAPH_API.to_string(),
            username_cache_ttl: Duration::from_secs(3600),
            username_cache_capacity: 10_000,
            delivery: DeliverySettings::default(),
        }
    }

    /// Create from environment variables
    ///
    /// # Errors
    /// [`Error::Config`] when a required variable is missing.
    pub fn from_env() -> Result<Self> {
        let require = |name: &str| {
            std::env::var(name).map_err(|_| Error::Config(format!("{name} not set")))
        };

        let mut config = Self::new(
            require("INSTAGRAM_PAGE_ACCESS_TOKEN")?,
            require("INSTAGRAM_ACCOUNT_ID")?,
        );
        if let Ok(token) = std::env::var("INSTAGRAM_WEBHOOK_VERIFY_TOKEN") {
            config.webhook_verify_token = token;
        }
        config.app_secret = std::env::var("INSTAGRAM_APP_SECRET").ok();
        if let Ok(base) = std::env::var("INSTAGRAM_API_BASE") {
            config.api_base = base;
        }
        Ok(config)
    }

    /// Set webhook verify token
    #[must_use]
    pub fn with_webhook_verify_token(mut self, token: impl Into<String>) -> Self {
        self.webhook_verify_token = token.into();
        self
    }

    /// Set the app secret
    #[must_use]
    pub fn with_app_secret(mut self, secret: impl Into<String>) -> Self {
        self.app_secret = Some(secret.into());
        self
    }

    /// Point at a different Graph API host
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the username cache TTL
    #[must_use]
    pub fn with_username_cache_ttl(mut self, ttl: Duration) -> Self {
        self.username_cache_ttl = ttl;
        self
    }

    /// Set delivery settings
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliverySettings) -> Self {
        self.delivery = delivery;
        self
    }
}

/// Comment / mention change value
#[derive(Debug, Clone, Deserialize)]
struct CommentValue {
    id: Option<String>,
    comment_id: Option<String>,
    text: Option<String>,
    from: Option<CommentAuthor>,
    media: Option<MediaRef>,
    media_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentAuthor {
    id: String,
    username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    username: Option<String>,
}

/// Instagram Messaging adapter
pub struct InstagramAdapter {
    config: InstagramConfig,
    transport: HttpTransport,
    idempotency: IdempotencyCache,
    usernames: TtlCache<String, String>,
}

impl InstagramAdapter {
    /// Create a new Instagram adapter
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: InstagramConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.delivery)?;
        let idempotency = IdempotencyCache::new(
            config.delivery.idempotency_capacity,
            config.delivery.idempotency_ttl,
        );
        let usernames = TtlCache::new(config.username_cache_capacity, config.username_cache_ttl);

        info!(account_id = %config.account_id, "Instagram adapter initialized");

        Ok(Self {
            config,
            transport,
            idempotency,
            usernames,
        })
    }

    /// Create from environment
    ///
    /// # Errors
    /// Returns an error if required variables are missing.
    pub fn from_env() -> Result<Self> {
        Self::new(InstagramConfig::from_env()?)
    }

    /// Username of an Instagram-scoped user ID, best effort.
    ///
    /// Runs inside webhook handling, so the lookup is a single attempt.
    pub async fn resolve_username(&self, igsid: &str) -> Option<String> {
        if let Some(name) = self.usernames.get(&igsid.to_string()) {
            return Some(name);
        }

        let url = format!("{}/{}", self.config.api_base, igsid);
        let profile = self.fetch_profile(&url).await;

        match profile {
            Ok(UserProfile {
                username: Some(name),
            }) => {
                self.usernames.insert(igsid.to_string(), name.clone());
                Some(name)
            }
            Ok(_) => None,
            Err(e) => {
                debug!(igsid = %igsid, error = %e, "Instagram username lookup failed");
                None
            }
        }
    }

    async fn fetch_profile(&self, url: &str) -> Result<UserProfile> {
        let request = self
            .transport
            .client()
            .get(url)
            .query(&[("fields", "username")])
            .bearer_auth(&self.config.page_access_token);
        self.transport
            .execute_once(request)
            .await?
            .json::<UserProfile>()
            .await
            .map_err(|e| Error::Decode(e.to_string()))
    }

    fn parse_direct(event: &MessagingEvent) -> courier_core::Result<ChannelMessage> {
        let source = customer_message(event)?;

        let mut message = ChannelMessage::new(ChannelType::Instagram, event.sender.id.clone(), "")
            .with_provider_id(source.mid.clone())
            .at(parse_timestamp(event.timestamp.as_ref()));
        apply_event_message(&mut message, source);

        let story = source.reply_to.as_ref().and_then(|r| r.story.as_ref());
        if let Some(url) = story.and_then(|s| s.url.clone()) {
            message.metadata.insert("story_url", url);
        }
        let csat = source
            .quick_reply
            .as_ref()
            .and_then(|q| CsatResponse::parse(&q.payload));
        if let Some(reply) = &source.quick_reply {
            message.metadata.insert("quick_reply_payload", reply.payload.clone());
        }

        message.channel_data.details = ChannelDetails::Instagram {
            igsid: event.sender.id.clone(),
            username: None,
            story_id: story.map(|s| s.id.clone()),
            comment_id: None,
            media_id: None,
            csat,
        };
        Ok(message)
    }

    fn parse_change(entry: &GraphEntry, change: &GraphChange) -> courier_core::Result<ChannelMessage> {
        if !matches!(change.field.as_str(), "comments" | "mentions") {
            return Err(courier_core::Error::Ignored(format!(
                "instagram change '{}'",
                change.field
            )));
        }
        let value: CommentValue = change
            .value
            .clone()
            .ok_or_else(|| courier_core::Error::InvalidPayload("change without value".to_string()))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| courier_core::Error::InvalidPayload(format!("instagram change: {e}")))
            })?;

        let comment_id = value.comment_id.clone().or_else(|| value.id.clone());
        let media_id = value
            .media
            .as_ref()
            .map(|m| m.id.clone())
            .or_else(|| value.media_id.clone());
        let sender = value
            .from
            .as_ref()
            .map(|f| f.id.clone())
            .or_else(|| comment_id.as_ref().map(|c| format!("comment:{c}")))
            .ok_or_else(|| {
                courier_core::Error::InvalidPayload("comment without author or id".to_string())
            })?;
        let content = value.text.clone().unwrap_or_else(|| {
            format!(
                "Mentioned in media {}",
                media_id.as_deref().unwrap_or("unknown")
            )
        });

        let mut message = ChannelMessage::new(ChannelType::Instagram, sender.clone(), content)
            .at(parse_timestamp(entry.time.as_ref()));
        if let Some(id) = &comment_id {
            message = message.with_provider_id(id.clone());
            message.metadata.insert("comment_id", id.clone());
        }
        message.metadata.insert("source", change.field.clone());
        message.channel_data.profile_name = value.from.as_ref().and_then(|f| f.username.clone());
        message.channel_data.details = ChannelDetails::Instagram {
            igsid: sender,
            username: value.from.as_ref().and_then(|f| f.username.clone()),
            story_id: None,
            comment_id,
            media_id,
            csat: None,
        };
        Ok(message)
    }

    async fn dispatch(&self, message: &OutgoingMessage) -> courier_core::Result<Option<String>> {
        // Public reply under a comment; not bound by the messaging window
        if let Some(comment_id) = message.metadata.get_str("comment_id") {
            let url = format!("{}/{}/replies", self.config.api_base, comment_id);
            let body = json!({"message": message.content});
            let response: SendResponse = self
                .transport
                .execute_json(|client| {
                    client
                        .post(&url)
                        .bearer_auth(&self.config.page_access_token)
                        .json(&body)
                })
                .await?;
            return Ok(response.into_message_id());
        }

        check_window(message)?;
        let body = send_body(message)?;
        let url = format!("{}/{}/messages", self.config.api_base, self.config.account_id);
        let response: SendResponse = self
            .transport
            .execute_json(|client| {
                client
                    .post(&url)
                    .bearer_auth(&self.config.page_access_token)
                    .json(&body)
            })
            .await?;
        Ok(response.into_message_id())
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for InstagramAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Instagram
    }

    async fn receive_message(&self, payload: &Value) -> courier_core::Result<ChannelMessage> {
        let entry = GraphWebhook::first_entry(payload)?;

        let mut message = if let Some(event) = entry.messaging.first() {
            Self::parse_direct(event)?
        } else if let Some(change) = entry.changes.first() {
            Self::parse_change(&entry, change)?
        } else {
            return Err(courier_core::Error::InvalidPayload(
                "missing entry[0].messaging[0] or entry[0].changes[0]".to_string(),
            ));
        };

        if message.channel_data.profile_name.is_none() && !message.sender_id.starts_with("comment:")
        {
            let username = self.resolve_username(&message.sender_id).await;
            if let ChannelDetails::Instagram { username: slot, .. } =
                &mut message.channel_data.details
            {
                slot.clone_from(&username);
            }
            message.channel_data.profile_name = username;
        }

        debug!(
            from = %message.sender_id,
            message_type = message.message_type.as_str(),
            text = %mask_for_logging(&message.content),
            "Instagram message received"
        );
        Ok(message)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: OutgoingMessage,
    ) -> MessageDeliveryResult {
        debug!(
            conversation_id = %conversation_id,
            text = %mask_for_logging(&message.content),
            "Sending Instagram message"
        );
        deliver(ChannelType::Instagram, &self.idempotency, &message, || {
            self.dispatch(&message)
        })
        .await
    }

    fn supported_features(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supported_attachment_types: vec![
                AttachmentType::Image,
                AttachmentType::Video,
                AttachmentType::Audio,
            ],
            max_message_length: 1000,
            max_attachment_size: 25 * 1024 * 1024,
            max_attachments: 1,
            rate_limits: RateLimits {
                per_minute: None,
                per_hour: Some(200),
                per_day: None,
            },
            features: ChannelFeatures {
                templates: false,
                location: false,
                contacts: false,
                rich_media: true,
                voice: true,
                video: true,
                read_receipts: false,
                typing_indicators: false,
            },
        }
    }

    fn validate_message(&self, message: &OutgoingMessage) -> Vec<ValidationResult> {
        let mut results = self.supported_features().validate(message);
        let is_comment_reply = message.metadata.get_str("comment_id").is_some();

        if !is_comment_reply
            && !message.recipient_id.is_empty()
            && !message.recipient_id.chars().all(|c| c.is_ascii_digit())
        {
            results.push(ValidationResult::error(
                "recipient_id",
                "recipient must be an Instagram-scoped user ID",
                "INVALID_RECIPIENT",
            ));
        }
        if !is_comment_reply {
            results.extend(window_violation(message));
        }
        results.extend(dropped_caption(message));
        results
    }

    fn verify_webhook(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        meta::verify_challenge(mode, token, &self.config.webhook_verify_token, challenge)
    }

    fn verify_signature(&self, body: &[u8], signature: &str) -> courier_core::Result<bool> {
        meta::verify_hub_signature(self.config.app_secret.as_deref(), body, signature)
    }
}
