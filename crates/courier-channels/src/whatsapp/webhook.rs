//! WhatsApp Cloud API webhook payloads

use crate::util::parse_timestamp;
use courier_core::{
    Attachment, AttachmentType, ChannelDetails, ChannelMessage, ChannelType, ContactCard, Error,
    LocationPayload, MessageType, PricingInfo, Result,
};
use serde::Deserialize;

/// Incoming webhook event
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppWebhook {
    /// Object type (`whatsapp_business_account`)
    #[serde(default)]
    pub object: String,
    /// Entry array
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// Webhook entry
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    /// Business Account ID
    #[serde(default)]
    pub id: String,
    /// Changes array
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

/// Webhook change event
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    /// Field name
    #[serde(default)]
    pub field: String,
    /// Value containing the actual message data
    pub value: Option<WebhookValue>,
}

/// Webhook value containing message data
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookValue {
    /// Receiving number metadata
    pub metadata: Option<WebhookMetadata>,
    /// Sender profiles
    #[serde(default)]
    pub contacts: Vec<WebhookContact>,
    /// Messages
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
    /// Statuses (delivery receipts)
    #[serde(default)]
    pub statuses: Vec<WebhookStatus>,
}

/// Webhook metadata
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMetadata {
    /// Display phone number
    #[serde(default)]
    pub display_phone_number: String,
    /// Phone number ID
    pub phone_number_id: Option<String>,
}

/// Sender profile
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookContact {
    /// Profile info
    pub profile: Option<WebhookProfile>,
    /// WhatsApp ID
    #[serde(default)]
    pub wa_id: String,
}

/// Profile name
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookProfile {
    /// Display name
    pub name: String,
}

/// Delivery receipt
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookStatus {
    /// Message ID
    #[serde(default)]
    pub id: String,
    /// Status (sent, delivered, read, failed)
    #[serde(default)]
    pub status: String,
    /// Billing info
    pub pricing: Option<WebhookPricing>,
    /// Provider conversation
    pub conversation: Option<WebhookConversation>,
}

/// Billing info
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPricing {
    /// Billable flag
    #[serde(default)]
    pub billable: bool,
    /// Pricing model
    pub pricing_model: Option<String>,
    /// Conversation category
    pub category: Option<String>,
}

/// Provider conversation reference
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConversation {
    /// Conversation ID
    pub id: String,
}

/// Inbound message
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMessage {
    /// Sender phone number
    pub from: String,
    /// Message ID
    pub id: String,
    /// Unix timestamp (string)
    pub timestamp: Option<serde_json::Value>,
    /// Message type
    #[serde(rename = "type")]
    pub message_type: String,
    /// Text body
    pub text: Option<TextContent>,
    /// Image
    pub image: Option<MediaContent>,
    /// Video
    pub video: Option<MediaContent>,
    /// Audio / voice note
    pub audio: Option<MediaContent>,
    /// Document
    pub document: Option<MediaContent>,
    /// Sticker
    pub sticker: Option<MediaContent>,
    /// Location pin
    pub location: Option<LocationContent>,
    /// Shared contacts
    #[serde(default)]
    pub contacts: Vec<ContactContent>,
    /// Interactive reply
    pub interactive: Option<InteractiveContent>,
    /// Template quick-reply button
    pub button: Option<ButtonContent>,
    /// Quoted message
    pub context: Option<MessageContext>,
}

/// Text content
#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    /// Message body
    pub body: String,
}

/// Media reference
#[derive(Debug, Clone, Deserialize)]
pub struct MediaContent {
    /// Media ID
    pub id: String,
    /// MIME type
    pub mime_type: Option<String>,
    /// Caption
    pub caption: Option<String>,
    /// File name (documents)
    pub filename: Option<String>,
}

/// Location pin
#[derive(Debug, Clone, Deserialize)]
pub struct LocationContent {
    /// Latitude
    pub latitude: f64,
    /// Longitude
    pub longitude: f64,
    /// Place name
    pub name: Option<String>,
    /// Address
    pub address: Option<String>,
}

/// Shared contact
#[derive(Debug, Clone, Deserialize)]
pub struct ContactContent {
    /// Name
    pub name: Option<ContactName>,
    /// Phones
    #[serde(default)]
    pub phones: Vec<ContactPhone>,
    /// E-mails
    #[serde(default)]
    pub emails: Vec<ContactEmail>,
}

/// Contact name
#[derive(Debug, Clone, Deserialize)]
pub struct ContactName {
    /// Formatted name
    #[serde(default)]
    pub formatted_name: String,
}

/// Contact phone
#[derive(Debug, Clone, Deserialize)]
pub struct ContactPhone {
    /// Number
    #[serde(default)]
    pub phone: String,
}

/// Contact e-mail
#[derive(Debug, Clone, Deserialize)]
pub struct ContactEmail {
    /// Address
    #[serde(default)]
    pub email: String,
}

/// Interactive reply
#[derive(Debug, Clone, Deserialize)]
pub struct InteractiveContent {
    /// Reply button
    pub button_reply: Option<ReplyContent>,
    /// List row
    pub list_reply: Option<ReplyContent>,
}

/// Reply selection
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyContent {
    /// Selection ID
    pub id: String,
    /// Selection title
    pub title: String,
}

/// Template quick-reply button
#[derive(Debug, Clone, Deserialize)]
pub struct ButtonContent {
    /// Button text
    #[serde(default)]
    pub text: String,
    /// Button payload
    pub payload: Option<String>,
}

/// Quoted message reference
#[derive(Debug, Clone, Deserialize)]
pub struct MessageContext {
    /// Quoted message ID
    pub id: Option<String>,
}

fn media_attachment(kind: AttachmentType, media: &MediaContent) -> Attachment {
    let mut attachment = Attachment::from_provider_media(kind, media.id.clone());
    attachment.mime_type.clone_from(&media.mime_type);
    attachment.caption.clone_from(&media.caption);
    attachment.file_name.clone_from(&media.filename);
    attachment
}

/// Translate a webhook into a channel message
pub(crate) fn parse(payload: &serde_json::Value) -> Result<ChannelMessage> {
    let webhook: WhatsAppWebhook = serde_json::from_value(payload.clone())
        .map_err(|e| Error::InvalidPayload(format!("whatsapp webhook: {e}")))?;

    let value = webhook
        .entry
        .into_iter()
        .next()
        .and_then(|e| e.changes.into_iter().next())
        .and_then(|c| c.value)
        .ok_or_else(|| {
            Error::InvalidPayload("missing entry[0].changes[0].value".to_string())
        })?;

    let Some(msg) = value.messages.first() else {
        if value.statuses.is_empty() {
            return Err(Error::InvalidPayload(
                "missing entry[0].changes[0].value.messages[0]".to_string(),
            ));
        }
        return Err(Error::Ignored("delivery status update".to_string()));
    };

    let mut message = ChannelMessage::new(ChannelType::WhatsApp, msg.from.clone(), "")
        .with_provider_id(msg.id.clone())
        .at(parse_timestamp(msg.timestamp.as_ref()));

    let media = match msg.message_type.as_str() {
        "image" => msg.image.as_ref().map(|m| (AttachmentType::Image, m)),
        "video" => msg.video.as_ref().map(|m| (AttachmentType::Video, m)),
        "audio" => msg.audio.as_ref().map(|m| (AttachmentType::Audio, m)),
        "document" => msg.document.as_ref().map(|m| (AttachmentType::Document, m)),
        "sticker" => msg.sticker.as_ref().map(|m| (AttachmentType::Sticker, m)),
        _ => None,
    };

    match msg.message_type.as_str() {
        "text" => {
            message.content = msg
                .text
                .as_ref()
                .map(|t| t.body.clone())
                .ok_or_else(|| Error::InvalidPayload("text message without body".to_string()))?;
        }
        "image" | "video" | "audio" | "document" | "sticker" => {
            let (kind, content) = media.ok_or_else(|| {
                Error::InvalidPayload(format!("{} message without media", msg.message_type))
            })?;
            message.message_type = kind.message_type();
            message.content = content.caption.clone().unwrap_or_default();
            message.attachments.push(media_attachment(kind, content));
        }
        "location" => {
            let location = msg
                .location
                .as_ref()
                .ok_or_else(|| Error::InvalidPayload("location message without location".to_string()))?;
            message.message_type = MessageType::Location;
            message.content = location
                .name
                .clone()
                .or_else(|| location.address.clone())
                .unwrap_or_default();
            message.location = Some(LocationPayload {
                latitude: location.latitude,
                longitude: location.longitude,
                name: location.name.clone(),
                address: location.address.clone(),
            });
        }
        "contacts" => {
            message.message_type = MessageType::Contact;
            message.contacts = msg
                .contacts
                .iter()
                .map(|c| ContactCard {
                    name: c.name.as_ref().map(|n| n.formatted_name.clone()).unwrap_or_default(),
                    phones: c.phones.iter().map(|p| p.phone.clone()).collect(),
                    emails: c.emails.iter().map(|e| e.email.clone()).collect(),
                })
                .collect();
        }
        "interactive" => {
            let reply = msg
                .interactive
                .as_ref()
                .and_then(|i| i.button_reply.as_ref().or(i.list_reply.as_ref()))
                .ok_or_else(|| Error::InvalidPayload("interactive message without reply".to_string()))?;
            message.message_type = MessageType::Interactive;
            message.content = reply.title.clone();
            message.metadata.insert("reply_id", reply.id.clone());
        }
        "button" => {
            let button = msg
                .button
                .as_ref()
                .ok_or_else(|| Error::InvalidPayload("button message without button".to_string()))?;
            message.message_type = MessageType::Interactive;
            message.content = button.text.clone();
            if let Some(payload) = &button.payload {
                message.metadata.insert("button_payload", payload.clone());
            }
        }
        other => {
            return Err(Error::Ignored(format!("unsupported message type '{other}'")));
        }
    }

    message.channel_data.profile_name = value
        .contacts
        .iter()
        .find(|c| c.wa_id == msg.from)
        .or(value.contacts.first())
        .and_then(|c| c.profile.as_ref())
        .map(|p| p.name.clone());
    message.channel_data.reply_to_id = msg.context.as_ref().and_then(|c| c.id.clone());

    let status = value.statuses.first();
    let pricing = status.and_then(|s| {
        s.pricing.as_ref().map(|p| PricingInfo {
            billable: p.billable,
            pricing_model: p.pricing_model.clone(),
            category: p.category.clone(),
            conversation_id: s.conversation.as_ref().map(|c| c.id.clone()),
        })
    });
    message.channel_data.details = ChannelDetails::WhatsApp {
        wa_id: msg.from.clone(),
        phone_number_id: value.metadata.as_ref().and_then(|m| m.phone_number_id.clone()),
        pricing,
    };

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(message: serde_json::Value) -> serde_json::Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"display_phone_number": "15550000000", "phone_number_id": "PN1"},
                        "contacts": [{"profile": {"name": "Ana"}, "wa_id": "15551234567"}],
                        "messages": [message]
                    }
                }]
            }]
        })
    }

    #[test]
    fn test_text_message() {
        let payload = envelope(json!({
            "from": "15551234567",
            "id": "wamid.1",
            "timestamp": "1700000000",
            "type": "text",
            "text": {"body": "Hello"},
            "context": {"id": "wamid.0"}
        }));
        let msg = parse(&payload).unwrap();
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.sender_id, "15551234567");
        assert_eq!(msg.provider_message_id(), Some("wamid.1"));
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(msg.channel_data.profile_name.as_deref(), Some("Ana"));
        assert_eq!(msg.channel_data.reply_to_id.as_deref(), Some("wamid.0"));
        assert!(matches!(
            msg.channel_data.details,
            ChannelDetails::WhatsApp { ref phone_number_id, .. } if phone_number_id.as_deref() == Some("PN1")
        ));
    }

    #[test]
    fn test_media_message_keeps_provider_media_id() {
        let payload = envelope(json!({
            "from": "15551234567",
            "id": "wamid.2",
            "type": "document",
            "document": {"id": "MEDIA1", "mime_type": "application/pdf", "filename": "invoice.pdf", "caption": "my invoice"}
        }));
        let msg = parse(&payload).unwrap();
        assert_eq!(msg.message_type, MessageType::Document);
        assert_eq!(msg.content, "my invoice");
        let att = &msg.attachments[0];
        assert_eq!(att.provider_media_id.as_deref(), Some("MEDIA1"));
        assert_eq!(att.file_name.as_deref(), Some("invoice.pdf"));
        assert!(att.url.is_none());
    }

    #[test]
    fn test_location_and_contacts() {
        let loc = parse(&envelope(json!({
            "from": "1", "id": "w3", "type": "location",
            "location": {"latitude": 38.7, "longitude": -9.1, "name": "Office"}
        })))
        .unwrap();
        assert_eq!(loc.message_type, MessageType::Location);
        assert_eq!(loc.location.as_ref().map(|l| l.latitude), Some(38.7));

        let contacts = parse(&envelope(json!({
            "from": "1", "id": "w4", "type": "contacts",
            "contacts": [{"name": {"formatted_name": "Bob"}, "phones": [{"phone": "+1 555"}]}]
        })))
        .unwrap();
        assert_eq!(contacts.contacts[0].name, "Bob");
        assert_eq!(contacts.contacts[0].phones, vec!["+1 555".to_string()]);
    }

    #[test]
    fn test_interactive_reply() {
        let msg = parse(&envelope(json!({
            "from": "1", "id": "w5", "type": "interactive",
            "interactive": {"type": "button_reply", "button_reply": {"id": "yes", "title": "Yes"}}
        })))
        .unwrap();
        assert_eq!(msg.content, "Yes");
        assert_eq!(msg.metadata.get_str("reply_id"), Some("yes"));
    }

    #[test]
    fn test_status_updates_are_ignored() {
        let payload = json!({
            "entry": [{"changes": [{"field": "messages", "value": {
                "statuses": [{"id": "wamid.1", "status": "delivered"}]
            }}]}]
        });
        assert!(matches!(parse(&payload), Err(Error::Ignored(_))));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(parse(&json!({"entry": []})), Err(Error::InvalidPayload(_))));
        let no_messages = json!({"entry": [{"changes": [{"value": {"contacts": []}}]}]});
        let err = parse(&no_messages).unwrap_err();
        assert!(err.to_string().contains("messages[0]"));
        assert!(matches!(parse(&json!("nope")), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_reactions_are_ignored() {
        let payload = envelope(json!({
            "from": "1", "id": "w6", "type": "reaction",
            "reaction": {"message_id": "w5", "emoji": "👍"}
        }));
        assert!(matches!(parse(&payload), Err(Error::Ignored(_))));
    }
}
