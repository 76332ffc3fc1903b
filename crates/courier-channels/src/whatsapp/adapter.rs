use super::config::WhatsAppConfig;
use super::templates::{TemplateCache, TemplatePage, APPROVED};
use super::webhook;
use crate::delivery::{deliver, IdempotencyCache};
use crate::error::{Error, Result};
use crate::meta::{self, check_window, window_violation, SendResponse};
use crate::transport::HttpTransport;
use crate::util::mask_for_logging;
use courier_core::{
    AttachmentType, ChannelAdapter, ChannelCapabilities, ChannelFeatures, ChannelMessage,
    ChannelType, MediaFile, MessageDeliveryResult, MessageType, OutgoingMessage, RateLimits,
    TemplateRef, ValidationResult,
};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// Guard against a provider that keeps handing out `paging.next`
const MAX_TEMPLATE_PAGES: usize = 20;

/// WhatsApp Cloud API adapter
pub struct WhatsAppAdapter {
    config: WhatsAppConfig,
    transport: HttpTransport,
    idempotency: IdempotencyCache,
    templates: TemplateCache,
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    url: String,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

impl WhatsAppAdapter {
    /// Create a new WhatsApp adapter
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: WhatsAppConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.delivery)?;
        let idempotency = IdempotencyCache::new(
            config.delivery.idempotency_capacity,
            config.delivery.idempotency_ttl,
        );
        let templates =
            TemplateCache::new(config.template_cache_capacity, config.template_cache_ttl);

        info!(phone_number_id = %config.phone_number_id, "WhatsApp adapter initialized");

        Ok(Self {
            config,
            transport,
            idempotency,
            templates,
        })
    }

    /// Create from environment
    ///
    /// # Errors
    /// Returns an error if required variables are missing.
    pub fn from_env() -> Result<Self> {
        Self::new(WhatsAppConfig::from_env()?)
    }

    /// Reload every template status of the business account.
    /// Returns the number of template/language pairs fetched.
    ///
    /// # Errors
    /// Transport errors from the template listing endpoint.
    pub async fn refresh_templates(&self) -> Result<usize> {
        let mut url = self.config.templates_url();
        let mut first_page = true;
        let mut fetched = Vec::new();

        for _ in 0..MAX_TEMPLATE_PAGES {
            let page: TemplatePage = self
                .transport
                .execute_json(|client| {
                    let request = client.get(&url).bearer_auth(&self.config.access_token);
                    if first_page {
                        request.query(&[("fields", "name,language,status"), ("limit", "100")])
                    } else {
                        request
                    }
                })
                .await?;
            fetched.extend(page.data);

            match page.paging.and_then(|p| p.next) {
                Some(next) => {
                    url = next;
                    first_page = false;
                }
                None => break,
            }
        }

        self.templates.store(&fetched);
        debug!(count = fetched.len(), "WhatsApp templates refreshed");
        Ok(fetched.len())
    }

    /// Approval status, refreshing once on a cache miss. Refresh failures
    /// leave the template unknown.
    async fn template_status(&self, template: &TemplateRef) -> Option<String> {
        if let Some(status) = self.templates.status(template) {
            return Some(status);
        }
        if let Err(e) = self.refresh_templates().await {
            warn!(error = %e, template = %template.name, "Template refresh failed");
            return None;
        }
        self.templates.status(template)
    }

    /// Keep approved templates, degrade to the fallback text otherwise
    async fn resolve_template(
        &self,
        message: &OutgoingMessage,
    ) -> courier_core::Result<Option<OutgoingMessage>> {
        let Some(template) = &message.template else {
            return Ok(None);
        };

        let status = self.template_status(template).await;
        if status.as_deref() == Some(APPROVED) {
            return Ok(None);
        }

        match &template.fallback_text {
            Some(text) => {
                info!(
                    template = %template.name,
                    language = %template.language,
                    status = status.as_deref().unwrap_or("UNKNOWN"),
                    "Template not approved, sending fallback text"
                );
                let mut degraded = message.clone();
                degraded.template = None;
                degraded.message_type = MessageType::Text;
                degraded.content.clone_from(text);
                Ok(Some(degraded))
            }
            None => Err(courier_core::Error::TemplateNotApproved {
                name: template.name.clone(),
                language: template.language.clone(),
            }),
        }
    }

    async fn dispatch(&self, message: &OutgoingMessage) -> courier_core::Result<Option<String>> {
        let degraded = self.resolve_template(message).await?;
        let message = degraded.as_ref().unwrap_or(message);
        check_window(message)?;

        let payload = build_payload(message)?;
        let url = self.config.messages_url();
        let response: SendResponse = self
            .transport
            .execute_json(|client| {
                client
                    .post(&url)
                    .bearer_auth(&self.config.access_token)
                    .json(&payload)
            })
            .await?;
        Ok(response.into_message_id())
    }
}

/// Phone number as the digits WhatsApp expects
fn recipient_digits(recipient: &str) -> String {
    recipient.chars().filter(char::is_ascii_digit).collect()
}

fn media_kind(attachment_type: AttachmentType) -> &'static str {
    match attachment_type {
        AttachmentType::Image => "image",
        AttachmentType::Video => "video",
        AttachmentType::Audio => "audio",
        AttachmentType::Sticker => "sticker",
        AttachmentType::Document | AttachmentType::Other => "document",
    }
}

fn invalid(message: &str) -> courier_core::Error {
    courier_core::Error::InvalidMessage(message.to_string())
}

/// Build the `/messages` request body
fn build_payload(message: &OutgoingMessage) -> courier_core::Result<Value> {
    let mut body = Map::new();
    body.insert("messaging_product".into(), json!("whatsapp"));
    body.insert("recipient_type".into(), json!("individual"));
    body.insert("to".into(), json!(recipient_digits(&message.recipient_id)));

    let (kind, content) = if let Some(template) = &message.template {
        let mut value = json!({
            "name": template.name,
            "language": {"code": template.language},
        });
        if !template.params.is_empty() {
            let parameters: Vec<Value> = template
                .params
                .iter()
                .map(|p| json!({"type": "text", "text": p}))
                .collect();
            value["components"] = json!([{"type": "body", "parameters": parameters}]);
        }
        ("template", value)
    } else if message.message_type == MessageType::Location {
        let location = message
            .options
            .location
            .as_ref()
            .ok_or_else(|| invalid("location message without coordinates"))?;
        (
            "location",
            json!({
                "latitude": location.latitude,
                "longitude": location.longitude,
                "name": location.name,
                "address": location.address,
            }),
        )
    } else if message.message_type == MessageType::Contact {
        let contacts: Vec<Value> = message
            .options
            .contacts
            .iter()
            .map(|c| {
                json!({
                    "name": {"formatted_name": c.name, "first_name": c.name},
                    "phones": c.phones.iter().map(|p| json!({"phone": p})).collect::<Vec<_>>(),
                    "emails": c.emails.iter().map(|e| json!({"email": e})).collect::<Vec<_>>(),
                })
            })
            .collect();
        ("contacts", Value::Array(contacts))
    } else if message.message_type == MessageType::Interactive {
        let interactive = message
            .options
            .interactive
            .clone()
            .ok_or_else(|| invalid("interactive message without payload"))?;
        ("interactive", interactive)
    } else if let Some(attachment) = message.attachments.first() {
        let kind = media_kind(attachment.attachment_type);
        let mut media = Map::new();
        match (&attachment.provider_media_id, &attachment.url) {
            (Some(id), _) => media.insert("id".into(), json!(id)),
            (None, Some(url)) => media.insert("link".into(), json!(url)),
            (None, None) => return Err(invalid("attachment needs a url or a media id")),
        };
        let caption = attachment
            .caption
            .clone()
            .or_else(|| Some(message.content.clone()).filter(|c| !c.is_empty()));
        if let Some(caption) = caption.filter(|_| !matches!(kind, "audio" | "sticker")) {
            media.insert("caption".into(), json!(caption));
        }
        if let Some(name) = attachment.file_name.as_ref().filter(|_| kind == "document") {
            media.insert("filename".into(), json!(name));
        }
        (kind, Value::Object(media))
    } else {
        (
            "text",
            json!({"body": message.content, "preview_url": false}),
        )
    };

    body.insert("type".into(), json!(kind));
    body.insert(kind.into(), content);
    if let Some(reply_to) = &message.reply_to_id {
        body.insert("context".into(), json!({"message_id": reply_to}));
    }
    Ok(Value::Object(body))
}

#[async_trait::async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::WhatsApp
    }

    async fn receive_message(&self, payload: &Value) -> courier_core::Result<ChannelMessage> {
        let message = webhook::parse(payload)?;
        debug!(
            from = %message.sender_id,
            message_type = message.message_type.as_str(),
            text = %mask_for_logging(&message.content),
            "WhatsApp message received"
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
            message_type = message.message_type.as_str(),
            text = %mask_for_logging(&message.content),
            "Sending WhatsApp message"
        );
        deliver(ChannelType::WhatsApp, &self.idempotency, &message, || {
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
                AttachmentType::Document,
                AttachmentType::Sticker,
            ],
            max_message_length: 4096,
            max_attachment_size: 100 * 1024 * 1024,
            max_attachments: 1,
            rate_limits: RateLimits {
                per_minute: Some(1_000),
                per_hour: None,
                per_day: Some(100_000),
            },
            features: ChannelFeatures {
                templates: true,
                location: true,
                contacts: true,
                rich_media: true,
                voice: true,
                video: true,
                read_receipts: true,
                typing_indicators: false,
            },
        }
    }

    fn validate_message(&self, message: &OutgoingMessage) -> Vec<ValidationResult> {
        let mut results = self.supported_features().validate(message);

        let digits = recipient_digits(&message.recipient_id).len();
        if !message.recipient_id.trim().is_empty() && !(8..=15).contains(&digits) {
            results.push(ValidationResult::error(
                "recipient_id",
                format!("'{}' is not a phone number", message.recipient_id),
                "INVALID_RECIPIENT",
            ));
        }
        if message.message_type == MessageType::Interactive && message.options.interactive.is_none()
        {
            results.push(ValidationResult::error(
                "options.interactive",
                "interactive message without payload",
                "INTERACTIVE_REQUIRED",
            ));
        }
        results.extend(window_violation(message));
        results
    }

    async fn download_media(&self, media_id: &str) -> courier_core::Result<MediaFile> {
        let media_err = |e: Error| courier_core::Error::Media(format!("media {media_id}: {e}"));

        let info_url = format!("{}/{}", self.config.api_base, media_id);
        let info: MediaInfo = self
            .transport
            .execute_json(|client| client.get(&info_url).bearer_auth(&self.config.access_token))
            .await
            .map_err(media_err)?;

        let response = self
            .transport
            .execute(|client| client.get(&info.url).bearer_auth(&self.config.access_token))
            .await
            .map_err(media_err)?;
        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map_err(|e| media_err(Error::Http(e)))?;

        let mime_type = info
            .mime_type
            .or(header_mime)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        debug!(media_id = %media_id, size = data.len(), "WhatsApp media downloaded");
        Ok(MediaFile::new(data.to_vec(), mime_type))
    }

    async fn upload_media(&self, file: MediaFile) -> courier_core::Result<String> {
        let file_name = file.file_name.clone().unwrap_or_else(|| "upload".to_string());
        let part = Part::bytes(file.data)
            .file_name(file_name)
            .mime_str(&file.mime_type)
            .map_err(|e| courier_core::Error::Media(format!("invalid mime type: {e}")))?;
        let form = Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", file.mime_type.clone())
            .part("file", part);

        let request = self
            .transport
            .client()
            .post(self.config.media_url())
            .bearer_auth(&self.config.access_token)
            .multipart(form);
        let response = self
            .transport
            .execute_once(request)
            .await
            .map_err(|e| courier_core::Error::Media(format!("upload failed: {e}")))?;
        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| courier_core::Error::Media(format!("invalid upload response: {e}")))?;

        info!(media_id = %uploaded.id, "WhatsApp media uploaded");
        Ok(uploaded.id)
    }

    async fn mark_as_read(&self, provider_message_id: &str) -> courier_core::Result<()> {
        let url = self.config.messages_url();
        let body = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": provider_message_id,
        });
        self.transport
            .execute(|client| {
                client
                    .post(&url)
                    .bearer_auth(&self.config.access_token)
                    .json(&body)
            })
            .await?;
        Ok(())
    }

    fn verify_webhook(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        meta::verify_challenge(mode, token, &self.config.webhook_verify_token, challenge)
    }

    fn verify_signature(&self, body: &[u8], signature: &str) -> courier_core::Result<bool> {
        meta::verify_hub_signature(self.config.app_secret.as_deref(), body, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use courier_core::{Attachment, LocationPayload};

    fn adapter() -> WhatsAppAdapter {
        let config = WhatsAppConfig::new("token", "PN1", "WABA1").with_webhook_verify_token("verify");
        WhatsAppAdapter::new(config).expect("Failed to create adapter")
    }

    #[test]
    fn test_text_payload() {
        let msg = OutgoingMessage::text("+1 (555) 123-4567", "Hello").reply_to("wamid.0");
        let payload = build_payload(&msg).unwrap();
        assert_eq!(payload["to"], "15551234567");
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "Hello");
        assert_eq!(payload["context"]["message_id"], "wamid.0");
    }

    #[test]
    fn test_template_payload() {
        let template = TemplateRef::new("order_update", "en_US")
            .with_params(vec!["#42".to_string(), "shipped".to_string()]);
        let payload = build_payload(&OutgoingMessage::template("15551234567", template)).unwrap();
        assert_eq!(payload["type"], "template");
        assert_eq!(payload["template"]["language"]["code"], "en_US");
        assert_eq!(
            payload["template"]["components"][0]["parameters"][1]["text"],
            "shipped"
        );
    }

    #[test]
    fn test_media_payload_prefers_media_id() {
        let doc = Attachment::from_provider_media(AttachmentType::Document, "MEDIA1")
            .with_file_name("invoice.pdf")
            .with_caption("Your invoice");
        let payload = build_payload(&OutgoingMessage::media("15551234567", doc)).unwrap();
        assert_eq!(payload["type"], "document");
        assert_eq!(payload["document"]["id"], "MEDIA1");
        assert_eq!(payload["document"]["filename"], "invoice.pdf");
        assert_eq!(payload["document"]["caption"], "Your invoice");

        let voice = Attachment::from_url(AttachmentType::Audio, "https://cdn/x.ogg").with_caption("ignored");
        let payload = build_payload(&OutgoingMessage::media("15551234567", voice)).unwrap();
        assert_eq!(payload["audio"]["link"], "https://cdn/x.ogg");
        assert!(payload["audio"].get("caption").is_none());
    }

    #[test]
    fn test_location_payload() {
        let mut msg = OutgoingMessage::text("15551234567", "");
        msg.message_type = MessageType::Location;
        assert!(build_payload(&msg).is_err());

        msg.options.location = Some(LocationPayload {
            latitude: 1.5,
            longitude: 2.5,
            name: Some("Shop".into()),
            address: None,
        });
        let payload = build_payload(&msg).unwrap();
        assert_eq!(payload["location"]["latitude"], 1.5);
    }

    #[test]
    fn test_validate_recipient_and_window() {
        let adapter = adapter();
        assert!(adapter
            .validate_message(&OutgoingMessage::text("15551234567", "hi"))
            .is_empty());

        let bad = adapter.validate_message(&OutgoingMessage::text("123", "hi"));
        assert!(bad.iter().any(|r| r.code == "INVALID_RECIPIENT"));

        let stale = OutgoingMessage::text("15551234567", "hi")
            .with_last_inbound_at(Utc::now() - Duration::hours(25));
        let results = adapter.validate_message(&stale);
        assert!(results.iter().any(|r| r.code == "OUTSIDE_MESSAGING_WINDOW"));

        let template = OutgoingMessage::template("15551234567", TemplateRef::new("hello", "en"))
            .with_last_inbound_at(Utc::now() - Duration::hours(25));
        assert!(adapter.validate_message(&template).is_empty());
    }

    #[tokio::test]
    async fn test_window_violation_is_a_failed_result() {
        let adapter = adapter();
        let stale = OutgoingMessage::text("15551234567", "hi")
            .with_last_inbound_at(Utc::now() - Duration::hours(48));
        let result = adapter.send_message("conv-1", stale).await;
        assert!(!result.is_sent());
        assert_eq!(
            result.error_code,
            Some(courier_core::ErrorCode::ValidationFailed)
        );
    }

    #[test]
    fn test_verify_webhook() {
        let adapter = adapter();
        assert_eq!(
            adapter.verify_webhook("subscribe", "verify", "challenge_123"),
            Some("challenge_123".to_string())
        );
        assert_eq!(adapter.verify_webhook("subscribe", "wrong", "challenge_123"), None);
        assert!(adapter.verify_signature(b"{}", "sha256=00").is_err());
    }
}
