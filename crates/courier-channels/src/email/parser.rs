//! Inbound e-mail parsing
//!
//! The inbound transport delivers an already-parsed message (subject,
//! addresses, text/html parts, attachments, headers). This module turns
//! it into a [`ChannelMessage`] and classifies bounces and auto-replies.

use crate::util::parse_timestamp;
use chrono::{DateTime, Utc};
use courier_core::{
    Attachment, AttachmentType, ChannelDetails, ChannelMessage, ChannelType, Error, Result,
    SenderType,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
        .expect("SCRIPT_OR_STYLE is a compile-time constant")
});

static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|blockquote)>")
        .expect("BLOCK_BREAK is a compile-time constant")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("TAG is a compile-time constant"));

static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("BLANK_LINES is a compile-time constant")
});

static BOUNCE_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(undeliverable|undelivered mail|delivery status notification|returned mail|mail delivery failed|delivery failure|failure notice)",
    )
    .expect("BOUNCE_SUBJECT is a compile-time constant")
});

static AUTO_REPLY_SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^auto(matic)?[ -]?reply|^autoresponse|out of (the )?office|on vacation)")
        .expect("AUTO_REPLY_SUBJECT is a compile-time constant")
});

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(.*?)\s*<([^>]+)>|([^<>\s]+))\s*$")
        .expect("ADDRESS is a compile-time constant")
});

/// One address or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddressField {
    /// Comma separated string
    One(String),
    /// List of addresses
    Many(Vec<String>),
}

impl AddressField {
    fn addresses(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::One(s) => s.split(',').collect(),
            Self::Many(list) => list.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .filter_map(|a| parse_address(a).map(|(_, addr)| addr))
            .collect()
    }
}

/// References as a whitespace separated string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReferencesField {
    /// Header value
    One(String),
    /// Parsed list
    Many(Vec<String>),
}

impl ReferencesField {
    fn ids(&self) -> Vec<String> {
        match self {
            Self::One(s) => s.split_whitespace().map(str::to_string).collect(),
            Self::Many(list) => list.clone(),
        }
    }
}

/// Parsed inbound attachment
#[derive(Debug, Clone, Deserialize)]
pub struct InboundAttachment {
    /// File name
    #[serde(alias = "fileName")]
    pub filename: Option<String>,
    /// MIME type
    #[serde(alias = "contentType", alias = "content_type")]
    pub mime_type: Option<String>,
    /// Size in bytes
    pub size: Option<u64>,
    /// Stored location
    pub url: Option<String>,
    /// Content-ID for inline parts
    #[serde(alias = "contentId")]
    pub content_id: Option<String>,
}

/// Parsed inbound e-mail
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEmail {
    /// Subject
    #[serde(default)]
    pub subject: String,
    /// Sender (`Name <addr>` or bare address)
    pub from: Option<String>,
    /// To
    pub to: Option<AddressField>,
    /// Cc
    pub cc: Option<AddressField>,
    /// Bcc
    pub bcc: Option<AddressField>,
    /// Plain text part
    pub text: Option<String>,
    /// HTML part
    pub html: Option<String>,
    /// Attachments
    #[serde(default)]
    pub attachments: Vec<InboundAttachment>,
    /// `Message-ID`
    #[serde(alias = "messageId")]
    pub message_id: Option<String>,
    /// `In-Reply-To`
    #[serde(alias = "inReplyTo")]
    pub in_reply_to: Option<String>,
    /// `References`
    pub references: Option<ReferencesField>,
    /// Raw headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Date
    pub date: Option<String>,
}

impl InboundEmail {
    /// Header value, case-insensitive
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
    }

    fn sender(&self) -> Option<(Option<String>, String)> {
        self.from
            .as_deref()
            .or_else(|| self.header("From"))
            .and_then(parse_address)
    }

    /// Delivery status notification
    #[must_use]
    pub fn is_bounce(&self) -> bool {
        let from_daemon = self.sender().is_some_and(|(_, addr)| {
            let local = addr.split('@').next().unwrap_or_default();
            local.eq_ignore_ascii_case("mailer-daemon") || local.eq_ignore_ascii_case("postmaster")
        });
        from_daemon
            || self.header("X-Failed-Recipients").is_some()
            || BOUNCE_SUBJECT.is_match(&self.subject)
            || self
                .header("Content-Type")
                .is_some_and(|ct| ct.to_ascii_lowercase().contains("report-type=delivery-status"))
    }

    /// Out-of-office or other machine-generated reply
    #[must_use]
    pub fn is_auto_reply(&self) -> bool {
        self.header("Auto-Submitted")
            .is_some_and(|v| !v.eq_ignore_ascii_case("no"))
            || self.header("X-Autoreply").is_some()
            || self.header("X-Autorespond").is_some()
            || self
                .header("Precedence")
                .is_some_and(|v| v.eq_ignore_ascii_case("auto_reply"))
            || AUTO_REPLY_SUBJECT.is_match(self.subject.trim())
    }

    /// `References` ids, falling back to the header
    #[must_use]
    pub fn reference_ids(&self) -> Vec<String> {
        match &self.references {
            Some(refs) => refs.ids(),
            None => self
                .header("References")
                .map(|r| r.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    /// Best-effort thread identifier: `In-Reply-To`, then the root of
    /// `References`, then custom thread headers
    #[must_use]
    pub fn thread_id(&self) -> Option<String> {
        self.in_reply_to
            .clone()
            .or_else(|| self.header("In-Reply-To").map(str::to_string))
            .or_else(|| self.reference_ids().into_iter().next())
            .or_else(|| {
                ["X-Thread-Id", "Thread-Index", "X-Conversation-Id"]
                    .iter()
                    .find_map(|h| self.header(h).map(str::to_string))
            })
            .filter(|t| !t.is_empty())
    }

    fn timestamp(&self) -> DateTime<Utc> {
        let raw = self.date.as_deref().or_else(|| self.header("Date"));
        match raw.and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok()) {
            Some(at) => at.with_timezone(&Utc),
            None => parse_timestamp(raw.map(|d| serde_json::Value::String(d.to_string())).as_ref()),
        }
    }
}

/// Split `Name <addr>` into display name and lowercased address
#[must_use]
pub fn parse_address(raw: &str) -> Option<(Option<String>, String)> {
    let caps = ADDRESS.captures(raw)?;
    let address = caps.get(2).or_else(|| caps.get(3))?.as_str().trim();
    if !address.contains('@') {
        return None;
    }
    let name = caps
        .get(1)
        .map(|m| m.as_str().trim().trim_matches('"').to_string())
        .filter(|n| !n.is_empty());
    Some((name, address.to_ascii_lowercase()))
}

/// Plain-text rendering of an HTML body
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, "");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}

/// Translate a parsed e-mail into a channel message
pub(crate) fn parse(payload: &serde_json::Value) -> Result<ChannelMessage> {
    let email: InboundEmail = serde_json::from_value(payload.clone())
        .map_err(|e| Error::InvalidPayload(format!("email: {e}")))?;
    let (name, from) = email
        .sender()
        .ok_or_else(|| Error::InvalidPayload("missing or malformed from address".to_string()))?;

    let mut content = match (&email.text, &email.html) {
        (Some(text), _) if !text.trim().is_empty() => text.clone(),
        (_, Some(html)) => html_to_text(html),
        _ => String::new(),
    };
    if content.trim().is_empty() && email.attachments.is_empty() {
        content.clone_from(&email.subject);
    }

    let is_bounce = email.is_bounce();
    let is_auto_reply = !is_bounce && email.is_auto_reply();

    let mut message = ChannelMessage::new(ChannelType::Email, from.clone(), content)
        .at(email.timestamp());
    if let Some(id) = email.message_id.clone().or_else(|| email.header("Message-ID").map(str::to_string)) {
        message = message.with_provider_id(id);
    }
    if is_bounce || is_auto_reply {
        message.sender_type = SenderType::System;
    }

    for part in &email.attachments {
        let mime = part.mime_type.clone();
        let kind = mime
            .as_deref()
            .map_or(AttachmentType::Other, AttachmentType::from_mime);
        let mut attachment = Attachment::new(kind);
        attachment.url.clone_from(&part.url);
        attachment.file_name.clone_from(&part.filename);
        attachment.mime_type = mime;
        attachment.size = part.size;
        attachment.inline = part.content_id.is_some();
        message.attachments.push(attachment);
    }

    let in_reply_to = email
        .in_reply_to
        .clone()
        .or_else(|| email.header("In-Reply-To").map(str::to_string));
    message.channel_data.reply_to_id.clone_from(&in_reply_to);
    message.channel_data.profile_name = name;
    message.channel_data.details = ChannelDetails::Email {
        subject: email.subject.clone(),
        from,
        to: email.to.as_ref().map(AddressField::addresses).unwrap_or_default(),
        cc: email.cc.as_ref().map(AddressField::addresses).unwrap_or_default(),
        bcc: email.bcc.as_ref().map(AddressField::addresses).unwrap_or_default(),
        in_reply_to,
        references: email.reference_ids(),
        thread_id: email.thread_id(),
        html: email.html.clone(),
        is_auto_reply,
        is_bounce,
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("\"Ana Lima\" <Ana@Example.com>"),
            Some((Some("Ana Lima".to_string()), "ana@example.com".to_string()))
        );
        assert_eq!(
            parse_address("bob@example.com"),
            Some((None, "bob@example.com".to_string()))
        );
        assert_eq!(parse_address("not an address"), None);
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><style>p{color:red}</style><p>Hello&nbsp;there</p><p>Line&amp;two<br>three</p></html>";
        assert_eq!(html_to_text(html), "Hello there\nLine&two\nthree");
    }

    #[test]
    fn test_plain_email() {
        let msg = parse(&json!({
            "subject": "Order #42",
            "from": "Ana <ana@example.com>",
            "to": "support@shop.com, sales@shop.com",
            "text": "Where is my order?",
            "messageId": "<m1@example.com>",
            "date": "Tue, 14 Nov 2023 22:13:20 +0000"
        }))
        .unwrap();

        assert_eq!(msg.sender_id, "ana@example.com");
        assert_eq!(msg.channel_data.profile_name.as_deref(), Some("Ana"));
        assert_eq!(msg.provider_message_id(), Some("<m1@example.com>"));
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
        match &msg.channel_data.details {
            ChannelDetails::Email { to, is_bounce, is_auto_reply, .. } => {
                assert_eq!(to.len(), 2);
                assert!(!is_bounce);
                assert!(!is_auto_reply);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_html_only_email_falls_back_to_text() {
        let msg = parse(&json!({
            "subject": "Hi",
            "from": "ana@example.com",
            "html": "<div>Hello <b>team</b></div>"
        }))
        .unwrap();
        assert_eq!(msg.content, "Hello team");
    }

    #[test]
    fn test_bounce_detection() {
        let msg = parse(&json!({
            "subject": "Delivery Status Notification (Failure)",
            "from": "MAILER-DAEMON@mx.example.com",
            "text": "The message could not be delivered",
            "headers": {"X-Failed-Recipients": "gone@example.com"}
        }))
        .unwrap();
        assert_eq!(msg.sender_type, SenderType::System);
        assert!(matches!(msg.channel_data.details, ChannelDetails::Email { is_bounce: true, .. }));
    }

    #[test]
    fn test_auto_reply_detection() {
        let by_header = parse(&json!({
            "subject": "Re: your ticket",
            "from": "ana@example.com",
            "text": "I am away",
            "headers": {"auto-submitted": "auto-replied"}
        }))
        .unwrap();
        assert!(matches!(
            by_header.channel_data.details,
            ChannelDetails::Email { is_auto_reply: true, .. }
        ));

        let by_subject = parse(&json!({
            "subject": "Out of Office: back Monday",
            "from": "ana@example.com",
            "text": "I am away"
        }))
        .unwrap();
        assert_eq!(by_subject.sender_type, SenderType::System);
    }

    #[test]
    fn test_thread_id_sources() {
        let reply = parse(&json!({
            "subject": "Re: Order",
            "from": "ana@example.com",
            "text": "thanks",
            "inReplyTo": "<out-1@shop.com>",
            "references": "<root@shop.com> <out-1@shop.com>"
        }))
        .unwrap();
        assert_eq!(reply.channel_data.reply_to_id.as_deref(), Some("<out-1@shop.com>"));
        match &reply.channel_data.details {
            ChannelDetails::Email { thread_id, references, .. } => {
                assert_eq!(thread_id.as_deref(), Some("<out-1@shop.com>"));
                assert_eq!(references.len(), 2);
            }
            other => panic!("unexpected details {other:?}"),
        }

        let custom = parse(&json!({
            "subject": "Order",
            "from": "ana@example.com",
            "text": "hi",
            "headers": {"X-Thread-Id": "T-9"}
        }))
        .unwrap();
        assert!(matches!(
            custom.channel_data.details,
            ChannelDetails::Email { ref thread_id, .. } if thread_id.as_deref() == Some("T-9")
        ));
    }

    #[test]
    fn test_attachments_and_missing_sender() {
        let msg = parse(&json!({
            "subject": "Invoice",
            "from": "ana@example.com",
            "attachments": [
                {"filename": "a.pdf", "contentType": "application/pdf", "size": 1200, "url": "https://store/a.pdf"},
                {"filename": "logo.png", "contentType": "image/png", "contentId": "logo"}
            ]
        }))
        .unwrap();
        assert_eq!(msg.attachments.len(), 2);
        assert!(msg.attachments[1].inline);
        assert_eq!(msg.attachments[0].size, Some(1200));

        assert!(matches!(
            parse(&json!({"subject": "x", "text": "y"})),
            Err(Error::InvalidPayload(_))
        ));
    }
}
