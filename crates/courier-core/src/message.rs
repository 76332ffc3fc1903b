//! Message - Channel-independent message model
//!
//! This module provides the internal message representation shared by every
//! channel adapter: the inbound [`ChannelMessage`], its processed form
//! [`ProcessedMessage`], the outbound [`OutgoingMessage`] and the per-attempt
//! [`MessageDeliveryResult`].

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Channel type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// WhatsApp Business Cloud API
    WhatsApp,
    /// Instagram messaging
    Instagram,
    /// Facebook Messenger
    Messenger,
    /// SMS / MMS
    Sms,
    /// E-mail
    Email,
    /// Web chat widget
    Web,
}

impl ChannelType {
    /// All known channel types
    pub const ALL: [ChannelType; 6] = [
        Self::WhatsApp,
        Self::Instagram,
        Self::Messenger,
        Self::Sms,
        Self::Email,
        Self::Web,
    ];

    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Instagram => "instagram",
            Self::Messenger => "messenger",
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Web => "web",
        }
    }

    /// Whether this channel enforces a customer-initiated messaging window
    #[must_use]
    pub fn has_messaging_window(&self) -> bool {
        matches!(self, Self::WhatsApp | Self::Instagram | Self::Messenger)
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Self::WhatsApp),
            "instagram" => Ok(Self::Instagram),
            "messenger" | "facebook" => Ok(Self::Messenger),
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            "web" | "chat" => Ok(Self::Web),
            other => Err(Error::ChannelNotConfigured(format!(
                "channel '{other}' is not configured"
            ))),
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    /// End customer
    Customer,
    /// Support agent
    Agent,
    /// Automated/system message
    System,
}

/// Message content kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text
    #[default]
    Text,
    /// Image
    Image,
    /// Video
    Video,
    /// Audio / voice note
    Audio,
    /// Document / file
    Document,
    /// Location pin
    Location,
    /// Contact card(s)
    Contact,
    /// Buttons, lists, quick replies
    Interactive,
    /// Pre-approved template
    Template,
}

impl MessageType {
    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Interactive => "interactive",
            Self::Template => "template",
        }
    }

    /// Whether this type carries media
    #[must_use]
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            Self::Image | Self::Video | Self::Audio | Self::Document
        )
    }
}

/// Attachment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    /// Image file
    Image,
    /// Video file
    Video,
    /// Audio file
    Audio,
    /// Document file
    Document,
    /// Sticker
    Sticker,
    /// Other/unknown
    Other,
}

impl AttachmentType {
    /// Infer attachment type from MIME type
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("video/") {
            Self::Video
        } else {
            Self::Document
        }
    }

    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Other => "other",
        }
    }

    /// Message type used when this attachment is sent on its own
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Image | Self::Sticker => MessageType::Image,
            Self::Video => MessageType::Video,
            Self::Audio => MessageType::Audio,
            Self::Document | Self::Other => MessageType::Document,
        }
    }
}

/// An attachment in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Internal attachment ID
    pub id: String,
    /// Attachment type
    pub attachment_type: AttachmentType,
    /// URL to download the file (if available)
    pub url: Option<String>,
    /// File name (if available)
    pub file_name: Option<String>,
    /// MIME type (if available)
    pub mime_type: Option<String>,
    /// File size in bytes (if available)
    pub size: Option<u64>,
    /// Provider media ID, resolved later through `download_media`
    pub provider_media_id: Option<String>,
    /// Caption shown alongside the media
    pub caption: Option<String>,
    /// Inline (e.g. e-mail `cid:` image) rather than a regular attachment
    #[serde(default)]
    pub inline: bool,
}

impl Attachment {
    /// Create an attachment of the given type
    #[must_use]
    pub fn new(attachment_type: AttachmentType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            attachment_type,
            url: None,
            file_name: None,
            mime_type: None,
            size: None,
            provider_media_id: None,
            caption: None,
            inline: false,
        }
    }

    /// Create an attachment pointing at a URL
    #[must_use]
    pub fn from_url(attachment_type: AttachmentType, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(attachment_type)
        }
    }

    /// Create an attachment referencing provider-hosted media
    #[must_use]
    pub fn from_provider_media(
        attachment_type: AttachmentType,
        media_id: impl Into<String>,
    ) -> Self {
        Self {
            provider_media_id: Some(media_id.into()),
            ..Self::new(attachment_type)
        }
    }

    /// Set the MIME type
    #[must_use]
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Set the file name
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Set the size in bytes
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the caption
    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// A location pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    /// Latitude
    pub latitude: f64,
    /// Longitude
    pub longitude: f64,
    /// Place name
    pub name: Option<String>,
    /// Street address
    pub address: Option<String>,
}

/// A shared contact card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactCard {
    /// Formatted display name
    pub name: String,
    /// Phone numbers
    #[serde(default)]
    pub phones: Vec<String>,
    /// E-mail addresses
    #[serde(default)]
    pub emails: Vec<String>,
}

/// Maximum number of entries in a [`Metadata`] map
pub const MAX_METADATA_ENTRIES: usize = 32;

/// Bounded side-channel map for provider-specific extras.
///
/// Holds at most [`MAX_METADATA_ENTRIES`] keys; inserts beyond the cap are
/// rejected. Anything the domain relies on belongs in a typed field instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, serde_json::Value>);

impl Metadata {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. Returns `false` when the map is full and the key is new.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> bool {
        let key = key.into();
        if self.0.len() >= MAX_METADATA_ENTRIES && !self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    /// Get a value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Get a string value
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Conversation-based pricing info reported by WhatsApp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingInfo {
    /// Whether the conversation is billable
    pub billable: bool,
    /// Pricing model (e.g. "CBP", "PMP")
    pub pricing_model: Option<String>,
    /// Conversation category (service, marketing, utility, authentication)
    pub category: Option<String>,
    /// Provider conversation ID
    pub conversation_id: Option<String>,
}

/// A customer satisfaction answer carried by a quick reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsatResponse {
    /// Survey identifier
    pub survey_id: String,
    /// Rating from 1 to 5
    pub rating: u8,
}

impl CsatResponse {
    /// Parse a `csat_<surveyId>_<rating>` payload
    #[must_use]
    pub fn parse(payload: &str) -> Option<Self> {
        let rest = payload.strip_prefix("csat_")?;
        let (survey_id, rating) = rest.rsplit_once('_')?;
        let rating: u8 = rating.parse().ok()?;
        if survey_id.is_empty() || !(1..=5).contains(&rating) {
            return None;
        }
        Some(Self {
            survey_id: survey_id.to_string(),
            rating,
        })
    }
}

/// Channel-specific details retained for audit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelDetails {
    /// No extra details
    #[default]
    Unspecified,
    /// WhatsApp message
    WhatsApp {
        /// Sender WhatsApp ID
        wa_id: String,
        /// Business phone number ID that received the message
        phone_number_id: Option<String>,
        /// Pricing info (billing analytics)
        pricing: Option<PricingInfo>,
    },
    /// Instagram direct message or comment
    Instagram {
        /// Instagram-scoped user ID
        igsid: String,
        /// Resolved username
        username: Option<String>,
        /// Story the customer replied to
        story_id: Option<String>,
        /// Comment ID (comments and mentions)
        comment_id: Option<String>,
        /// Media the comment was made on
        media_id: Option<String>,
        /// CSAT answer encoded in a quick reply
        csat: Option<CsatResponse>,
    },
    /// Messenger message
    Messenger {
        /// Page-scoped user ID
        psid: String,
        /// Page that received the message
        page_id: String,
        /// Quick reply or postback payload
        payload: Option<String>,
    },
    /// SMS/MMS message
    Sms {
        /// Sender number
        from: String,
        /// Receiving number
        to: String,
        /// Number of media items
        num_media: u32,
    },
    /// E-mail message
    Email {
        /// Subject line
        subject: String,
        /// Sender address
        from: String,
        /// To recipients
        to: Vec<String>,
        /// Cc recipients
        cc: Vec<String>,
        /// Bcc recipients
        bcc: Vec<String>,
        /// `In-Reply-To` header
        in_reply_to: Option<String>,
        /// `References` header ids
        references: Vec<String>,
        /// Best-effort thread identifier
        thread_id: Option<String>,
        /// HTML body, if any
        html: Option<String>,
        /// Auto-reply detected (out of office, etc.)
        is_auto_reply: bool,
        /// Bounce / delivery status notification detected
        is_bounce: bool,
    },
    /// Web chat message
    Web {
        /// Browser session ID
        session_id: Option<String>,
    },
}

/// Channel-specific data block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpecificData {
    /// Provider-assigned message ID (deduplication key)
    pub provider_message_id: Option<String>,
    /// Sender display name from the provider profile
    pub profile_name: Option<String>,
    /// Provider ID of the message being replied to / quoted
    pub reply_to_id: Option<String>,
    /// Per-channel details
    #[serde(default)]
    pub details: ChannelDetails,
}

/// An inbound message in channel-native shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Internal message ID
    pub id: String,
    /// Conversation ID (empty until resolved)
    pub conversation_id: Option<String>,
    /// Channel-native sender ID (phone digits, IGSID, e-mail address...)
    pub sender_id: String,
    /// Sender type
    pub sender_type: SenderType,
    /// Text content (caption for media)
    pub content: String,
    /// Message type
    pub message_type: MessageType,
    /// Channel identifier
    pub channel: ChannelType,
    /// Provider timestamp
    pub timestamp: DateTime<Utc>,
    /// Channel-specific data
    #[serde(default)]
    pub channel_data: ChannelSpecificData,
    /// Attachments
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Location payload
    pub location: Option<LocationPayload>,
    /// Contact cards
    #[serde(default)]
    pub contacts: Vec<ContactCard>,
    /// Free-form extras
    #[serde(default)]
    pub metadata: Metadata,
}

impl ChannelMessage {
    /// Create a new customer message
    #[must_use]
    pub fn new(
        channel: ChannelType,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: None,
            sender_id: sender_id.into(),
            sender_type: SenderType::Customer,
            content: content.into(),
            message_type: MessageType::Text,
            channel,
            timestamp: Utc::now(),
            channel_data: ChannelSpecificData::default(),
            attachments: Vec::new(),
            location: None,
            contacts: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Set the message type
    #[must_use]
    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Set the provider message ID
    #[must_use]
    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.channel_data.provider_message_id = Some(id.into());
        self
    }

    /// Set the conversation ID
    #[must_use]
    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Set the provider timestamp
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the reply/quote reference
    #[must_use]
    pub fn replying_to(mut self, provider_id: impl Into<String>) -> Self {
        self.channel_data.reply_to_id = Some(provider_id.into());
        self
    }

    /// Add an attachment
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Provider message ID, if any
    #[must_use]
    pub fn provider_message_id(&self) -> Option<&str> {
        self.channel_data.provider_message_id.as_deref()
    }

    /// Check if message has text content
    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Check if message has attachments
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Check structural completeness.
    ///
    /// # Errors
    /// Returns [`Error::InvalidMessage`] naming the first missing part.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidMessage("message id is required".to_string()));
        }
        if self.sender_id.trim().is_empty() {
            return Err(Error::InvalidMessage("sender id is required".to_string()));
        }
        let has_payload = self.has_text()
            || self.has_attachments()
            || self.location.is_some()
            || !self.contacts.is_empty();
        if !has_payload {
            return Err(Error::InvalidMessage(
                "message must carry content or at least one attachment".to_string(),
            ));
        }
        Ok(())
    }
}

/// Threading context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadContext {
    /// Message starts a new reply chain
    pub is_thread_start: bool,
    /// Provider ID of the parent message
    pub parent_message_id: Option<String>,
    /// Depth in the reply chain (0 for a thread start)
    pub depth: u32,
}

impl ThreadContext {
    /// A new thread
    #[must_use]
    pub fn start() -> Self {
        Self {
            is_thread_start: true,
            parent_message_id: None,
            depth: 0,
        }
    }

    /// A continuation of `parent`, given the parent's own depth if known
    #[must_use]
    pub fn reply_to(parent: impl Into<String>, parent_depth: Option<u32>) -> Self {
        Self {
            is_thread_start: false,
            parent_message_id: Some(parent.into()),
            depth: parent_depth.map_or(1, |d| d.saturating_add(1)),
        }
    }
}

/// Processing audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    /// When the message was processed
    pub processed_at: DateTime<Utc>,
    /// Processing pipeline version tag
    pub processing_version: String,
    /// Adapter (channel) that produced the message
    pub adapter: ChannelType,
    /// Normalization steps applied, in order
    pub normalization_steps: Vec<String>,
    /// Validation findings
    pub validation: Vec<crate::capabilities::ValidationResult>,
}

/// A channel message after ingestion processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMessage {
    /// The original message (conversation ID resolved)
    #[serde(flatten)]
    pub message: ChannelMessage,
    /// Content with channel formatting, quotes and signatures removed
    pub normalized_content: String,
    /// Threading context
    pub thread: ThreadContext,
    /// Processing metadata
    pub processing: ProcessingMetadata,
}

impl ProcessedMessage {
    /// Internal message ID
    #[must_use]
    pub fn id(&self) -> &str {
        &self.message.id
    }

    /// Resolved conversation ID
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.message.conversation_id.as_deref()
    }
}

/// Reference to a pre-approved message template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRef {
    /// Template name
    pub name: String,
    /// Language code (e.g. "en_US")
    pub language: String,
    /// Positional body parameters
    #[serde(default)]
    pub params: Vec<String>,
    /// Plain-text body to send if the template is not approved
    pub fallback_text: Option<String>,
}

impl TemplateRef {
    /// Create a template reference
    #[must_use]
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            params: Vec::new(),
            fallback_text: None,
        }
    }

    /// Set body parameters
    #[must_use]
    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    /// Set the plain-text fallback
    #[must_use]
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = Some(text.into());
        self
    }
}

/// Explicit e-mail envelope fields for outbound mail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailEnvelope {
    /// Subject line
    pub subject: Option<String>,
    /// HTML body
    pub html: Option<String>,
    /// Cc recipients
    #[serde(default)]
    pub cc: Vec<String>,
    /// Bcc recipients
    #[serde(default)]
    pub bcc: Vec<String>,
    /// `References` header ids
    #[serde(default)]
    pub references: Vec<String>,
    /// Extra headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Typed outbound options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutgoingOptions {
    /// Caller-supplied idempotency key
    pub idempotency_key: Option<String>,
    /// Provider-shaped interactive payload (buttons, lists)
    pub interactive: Option<serde_json::Value>,
    /// E-mail envelope
    pub email: Option<EmailEnvelope>,
    /// Location payload
    pub location: Option<LocationPayload>,
    /// Contact cards
    #[serde(default)]
    pub contacts: Vec<ContactCard>,
    /// Last customer-initiated message time, for messaging-window checks
    pub last_inbound_at: Option<DateTime<Utc>>,
    /// Send even when outside the messaging window
    #[serde(default)]
    pub override_window: bool,
}

/// A normalized outgoing message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Text content
    pub content: String,
    /// Message type
    pub message_type: MessageType,
    /// Channel-native recipient address
    pub recipient_id: String,
    /// Attachments
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Template reference (template channels)
    pub template: Option<TemplateRef>,
    /// Provider ID of the message being replied to
    pub reply_to_id: Option<String>,
    /// Typed options
    #[serde(default)]
    pub options: OutgoingOptions,
    /// Free-form extras
    #[serde(default)]
    pub metadata: Metadata,
}

impl OutgoingMessage {
    /// Create a simple text message
    #[must_use]
    pub fn text(recipient_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            recipient_id: recipient_id.into(),
            ..Default::default()
        }
    }

    /// Create a template message
    #[must_use]
    pub fn template(recipient_id: impl Into<String>, template: TemplateRef) -> Self {
        Self {
            message_type: MessageType::Template,
            recipient_id: recipient_id.into(),
            template: Some(template),
            ..Default::default()
        }
    }

    /// Create a media message from an attachment
    #[must_use]
    pub fn media(recipient_id: impl Into<String>, attachment: Attachment) -> Self {
        Self {
            message_type: attachment.attachment_type.message_type(),
            recipient_id: recipient_id.into(),
            content: attachment.caption.clone().unwrap_or_default(),
            attachments: vec![attachment],
            ..Default::default()
        }
    }

    /// Set reply to message
    #[must_use]
    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to_id = Some(message_id.into());
        self
    }

    /// Set the idempotency key
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.options.idempotency_key = Some(key.into());
        self
    }

    /// Set the last inbound timestamp used for window checks
    #[must_use]
    pub fn with_last_inbound_at(mut self, at: DateTime<Utc>) -> Self {
        self.options.last_inbound_at = Some(at);
        self
    }

    /// Allow sending outside the messaging window
    #[must_use]
    pub fn overriding_window(mut self) -> Self {
        self.options.override_window = true;
        self
    }

    /// Set the e-mail envelope
    #[must_use]
    pub fn with_email(mut self, envelope: EmailEnvelope) -> Self {
        self.options.email = Some(envelope);
        self
    }

    /// Add an attachment
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Delivery status of a send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Accepted by the provider
    Sent,
    /// Rejected or never reached the provider
    Failed,
}

/// Outcome of one outbound send attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeliveryResult {
    /// Generated internal message ID
    pub message_id: String,
    /// Delivery status
    pub status: DeliveryStatus,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Provider-assigned message ID
    pub channel_message_id: Option<String>,
    /// Human-readable error
    pub error: Option<String>,
    /// Machine-readable error code
    pub error_code: Option<crate::error::ErrorCode>,
}

impl MessageDeliveryResult {
    /// A successful delivery
    #[must_use]
    pub fn sent(channel_message_id: Option<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            status: DeliveryStatus::Sent,
            timestamp: Utc::now(),
            channel_message_id,
            error: None,
            error_code: None,
        }
    }

    /// A failed delivery built from an error
    #[must_use]
    pub fn failed(error: &Error) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            status: DeliveryStatus::Failed,
            timestamp: Utc::now(),
            channel_message_id: None,
            error: Some(error.to_string()),
            error_code: Some(error.code()),
        }
    }

    /// Whether the provider accepted the message
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}
