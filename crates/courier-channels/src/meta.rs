//! Shared helpers for the Meta Graph channels (WhatsApp, Instagram, Messenger)

use chrono::{Duration, Utc};
use courier_core::{
    Attachment, AttachmentType, ChannelMessage, Error, LocationPayload, MessageType,
    OutgoingMessage, Result, ValidationResult,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

/// Default Graph API base URL
pub const DEFAULT_GRAPH_API: &str = "https://graph.facebook.com/v18.0";

/// Customer-initiated messaging window
pub const MESSAGING_WINDOW_HOURS: i64 = 24;

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Webhook subscription handshake (`hub.mode`, `hub.verify_token`, `hub.challenge`)
#[must_use]
pub fn verify_challenge(mode: &str, token: &str, expected: &str, challenge: &str) -> Option<String> {
    if mode == "subscribe" && !expected.is_empty() && constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        info!("Webhook subscription verified");
        Some(challenge.to_string())
    } else {
        warn!(mode = %mode, "Webhook verification rejected");
        None
    }
}

/// Verify an `X-Hub-Signature-256: sha256=<hex>` header over the raw body
///
/// # Errors
/// [`Error::Unsupported`] when no app secret is configured.
pub fn verify_hub_signature(app_secret: Option<&str>, body: &[u8], header: &str) -> Result<bool> {
    let secret = app_secret
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Unsupported("no app secret configured".to_string()))?;
    let Some(provided) = header.trim().strip_prefix("sha256=") else {
        debug!("Signature header without sha256= prefix");
        return Ok(false);
    };

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::Configuration("invalid app secret".to_string()))?;
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    let valid = constant_time_eq(provided.to_ascii_lowercase().as_bytes(), expected.as_bytes());
    if !valid {
        warn!("Webhook signature verification failed");
    }
    Ok(valid)
}

/// Error when a free-form message falls outside the messaging window.
///
/// Templates, explicit overrides and unknown last-inbound times pass.
#[must_use]
pub fn window_violation(message: &OutgoingMessage) -> Option<ValidationResult> {
    if message.template.is_some() || message.options.override_window {
        return None;
    }
    let last_inbound = message.options.last_inbound_at?;
    let age = Utc::now() - last_inbound;
    if age <= Duration::hours(MESSAGING_WINDOW_HOURS) {
        return None;
    }
    Some(ValidationResult::error(
        "options.last_inbound_at",
        format!(
            "last customer message was {}h ago, outside the {MESSAGING_WINDOW_HOURS}h messaging window",
            age.num_hours()
        ),
        "OUTSIDE_MESSAGING_WINDOW",
    ))
}

/// Fail a send that violates the messaging window
pub(crate) fn check_window(message: &OutgoingMessage) -> Result<()> {
    match window_violation(message) {
        Some(finding) => Err(Error::ValidationFailed(vec![finding])),
        None => Ok(()),
    }
}

/// Messenger-platform webhook (`object: page` or `object: instagram`)
#[derive(Debug, Clone, Deserialize)]
pub struct GraphWebhook {
    /// Object type
    #[serde(default)]
    pub object: String,
    /// Entry array
    #[serde(default)]
    pub entry: Vec<GraphEntry>,
}

/// Webhook entry
#[derive(Debug, Clone, Deserialize)]
pub struct GraphEntry {
    /// Page / Instagram account ID
    #[serde(default)]
    pub id: String,
    /// Event time (ms)
    pub time: Option<Value>,
    /// Messaging events
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
    /// Field changes (comments, mentions)
    #[serde(default)]
    pub changes: Vec<GraphChange>,
}

/// Field change
#[derive(Debug, Clone, Deserialize)]
pub struct GraphChange {
    /// Field name
    #[serde(default)]
    pub field: String,
    /// Field value
    pub value: Option<Value>,
}

/// Messaging event
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingEvent {
    /// Sender (PSID / IGSID)
    pub sender: Party,
    /// Recipient (page)
    pub recipient: Party,
    /// Event time (ms)
    pub timestamp: Option<Value>,
    /// Message
    pub message: Option<EventMessage>,
    /// Button postback
    pub postback: Option<Postback>,
    /// Read receipt
    pub read: Option<Value>,
    /// Delivery receipt
    pub delivery: Option<Value>,
    /// Reaction
    pub reaction: Option<Value>,
}

/// Event party
#[derive(Debug, Clone, Deserialize)]
pub struct Party {
    /// Scoped ID
    pub id: String,
}

/// Message body of a messaging event
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    /// Message ID
    pub mid: String,
    /// Text
    pub text: Option<String>,
    /// Attachments
    #[serde(default)]
    pub attachments: Vec<EventAttachment>,
    /// Quick reply selection
    pub quick_reply: Option<QuickReply>,
    /// Quoted message or story
    pub reply_to: Option<ReplyTo>,
    /// Sent by the page itself
    #[serde(default)]
    pub is_echo: bool,
    /// Unsent by the customer
    #[serde(default)]
    pub is_deleted: bool,
}

/// Quick reply selection
#[derive(Debug, Clone, Deserialize)]
pub struct QuickReply {
    /// Developer payload
    pub payload: String,
}

/// Quoted message or story
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyTo {
    /// Quoted message ID
    pub mid: Option<String>,
    /// Story reply
    pub story: Option<StoryRef>,
}

/// Story reference
#[derive(Debug, Clone, Deserialize)]
pub struct StoryRef {
    /// Story ID
    pub id: String,
    /// Story CDN URL
    pub url: Option<String>,
}

/// Event attachment
#[derive(Debug, Clone, Deserialize)]
pub struct EventAttachment {
    /// Attachment type (image, video, audio, file, location, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload
    pub payload: Option<AttachmentPayload>,
}

/// Event attachment payload
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentPayload {
    /// CDN URL
    pub url: Option<String>,
    /// Title (shares, locations)
    pub title: Option<String>,
    /// Coordinates (location pins)
    pub coordinates: Option<Coordinates>,
}

/// Location coordinates
#[derive(Debug, Clone, Deserialize)]
pub struct Coordinates {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub long: f64,
}

/// Button postback
#[derive(Debug, Clone, Deserialize)]
pub struct Postback {
    /// Button title
    pub title: Option<String>,
    /// Developer payload
    pub payload: Option<String>,
    /// Message ID
    pub mid: Option<String>,
}

impl GraphWebhook {
    /// Decode and take the first entry
    pub(crate) fn first_entry(payload: &Value) -> Result<GraphEntry> {
        let webhook: Self = serde_json::from_value(payload.clone())
            .map_err(|e| Error::InvalidPayload(format!("graph webhook: {e}")))?;
        webhook
            .entry
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidPayload("missing entry[0]".to_string()))
    }
}

/// The customer message carried by an event; echoes, receipts and
/// reactions are [`Error::Ignored`]
pub(crate) fn customer_message(event: &MessagingEvent) -> Result<&EventMessage> {
    if event.read.is_some() || event.delivery.is_some() {
        return Err(Error::Ignored("read/delivery receipt".to_string()));
    }
    if event.reaction.is_some() {
        return Err(Error::Ignored("reaction".to_string()));
    }
    let message = event
        .message
        .as_ref()
        .ok_or_else(|| Error::InvalidPayload("messaging event without message".to_string()))?;
    if message.is_echo {
        return Err(Error::Ignored("echo of a page message".to_string()));
    }
    if message.is_deleted {
        return Err(Error::Ignored("message unsent by customer".to_string()));
    }
    Ok(message)
}

fn attachment_type(kind: &str) -> AttachmentType {
    match kind {
        "image" | "story_mention" => AttachmentType::Image,
        "video" | "ig_reel" | "reel" => AttachmentType::Video,
        "audio" => AttachmentType::Audio,
        "file" => AttachmentType::Document,
        _ => AttachmentType::Other,
    }
}

/// Copy text, attachments, location and the quote reference of an event
/// message onto a channel message
pub(crate) fn apply_event_message(target: &mut ChannelMessage, source: &EventMessage) {
    target.content = source.text.clone().unwrap_or_default();

    for attachment in &source.attachments {
        let payload = attachment.payload.as_ref();
        if let Some(coords) = payload.and_then(|p| p.coordinates.as_ref()) {
            target.location = Some(LocationPayload {
                latitude: coords.lat,
                longitude: coords.long,
                name: payload.and_then(|p| p.title.clone()),
                address: None,
            });
            target.message_type = MessageType::Location;
            continue;
        }
        let Some(url) = payload.and_then(|p| p.url.clone()) else {
            continue;
        };
        target
            .attachments
            .push(Attachment::from_url(attachment_type(&attachment.kind), url));
    }

    if target.message_type == MessageType::Text {
        if let Some(first) = target.attachments.first() {
            target.message_type = first.attachment_type.message_type();
        }
    }
    target.channel_data.reply_to_id = source.reply_to.as_ref().and_then(|r| r.mid.clone());
}

fn graph_attachment_type(attachment_type: AttachmentType) -> &'static str {
    match attachment_type {
        AttachmentType::Image | AttachmentType::Sticker => "image",
        AttachmentType::Video => "video",
        AttachmentType::Audio => "audio",
        AttachmentType::Document | AttachmentType::Other => "file",
    }
}

/// Send API body `{recipient, messaging_type, message}`.
///
/// Attachments take precedence over text. Overriding the window sends
/// with the `HUMAN_AGENT` tag. An interactive object is merged into the
/// message (quick replies, templates).
pub(crate) fn send_body(message: &OutgoingMessage) -> Result<Value> {
    let mut body = json!({"recipient": {"id": message.recipient_id}});
    if message.options.override_window {
        body["messaging_type"] = json!("MESSAGE_TAG");
        body["tag"] = json!("HUMAN_AGENT");
    } else {
        body["messaging_type"] = json!("RESPONSE");
    }

    let mut content = match message.attachments.first() {
        Some(attachment) => {
            let payload = match (&attachment.provider_media_id, &attachment.url) {
                (Some(id), _) => json!({"attachment_id": id}),
                (None, Some(url)) => json!({"url": url, "is_reusable": true}),
                (None, None) => {
                    return Err(Error::InvalidMessage(
                        "attachment needs a url or a media id".to_string(),
                    ))
                }
            };
            json!({"attachment": {
                "type": graph_attachment_type(attachment.attachment_type),
                "payload": payload,
            }})
        }
        None => json!({"text": message.content}),
    };
    if let (Some(Value::Object(extra)), Some(target)) =
        (&message.options.interactive, content.as_object_mut())
    {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    body["message"] = content;
    Ok(body)
}

/// Warning when text would be dropped in favour of an attachment
pub(crate) fn dropped_caption(message: &OutgoingMessage) -> Option<ValidationResult> {
    (!message.attachments.is_empty() && !message.content.trim().is_empty()).then(|| {
        ValidationResult::warning(
            "content",
            "text is not sent alongside an attachment on this channel",
            "CAPTION_DROPPED",
        )
    })
}

/// Send API response: `{recipient_id?, message_id}` or `{messages: [{id}]}`
#[derive(Debug, Deserialize)]
pub(crate) struct SendResponse {
    message_id: Option<String>,
    #[serde(default)]
    messages: Vec<SentMessage>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

impl SendResponse {
    pub(crate) fn into_message_id(self) -> Option<String> {
        self.message_id
            .or_else(|| self.messages.into_iter().next().map(|m| m.id))
            .or(self.id)
    }
}
