//! Content normalization
//!
//! Produces the searchable, channel-neutral text of an inbound message:
//! chat emphasis markers are removed, e-mail quotes, forwarded trailers and
//! signatures are cut, and whitespace is tidied.

use crate::message::ChannelType;
use regex::Regex;
use std::sync::LazyLock;

static BOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(\[])\*([^*\n]+)\*([\s).,!?:;\]]|$)")
        .expect("BOLD is a compile-time constant")
});
static ITALIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(\[])_([^_\n]+)_([\s).,!?:;\]]|$)")
        .expect("ITALIC is a compile-time constant")
});
static STRIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(\[])~([^~\n]+)~([\s).,!?:;\]]|$)")
        .expect("STRIKE is a compile-time constant")
});
static REPLY_ATTRIBUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*on .+ wrote:\s*$").expect("REPLY_ATTRIBUTION is a compile-time constant")
});
static FORWARD_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(-{2,}\s*(original message|forwarded message)\s*-{2,}|begin forwarded message:)\s*$")
        .expect("FORWARD_MARKER is a compile-time constant")
});
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("BLANK_RUNS is a compile-time constant")
});

/// A normalization pass that changed the content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationStep {
    /// Chat emphasis markers (`*`, `_`, `~`, code fences) removed
    StripFormatting,
    /// `>` quoted lines and reply attributions removed
    StripQuotedLines,
    /// Forwarded / original-message trailer cut
    StripForwarded,
    /// Signature block cut
    StripSignature,
    /// Runs of blank lines collapsed
    CollapseBlankLines,
    /// Leading/trailing whitespace trimmed
    TrimWhitespace,
}

impl NormalizationStep {
    /// Get the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StripFormatting => "strip_formatting",
            Self::StripQuotedLines => "strip_quoted_lines",
            Self::StripForwarded => "strip_forwarded",
            Self::StripSignature => "strip_signature",
            Self::CollapseBlankLines => "collapse_blank_lines",
            Self::TrimWhitespace => "trim_whitespace",
        }
    }
}

impl std::fmt::Display for NormalizationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized text plus the passes that changed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Normalized content
    pub content: String,
    /// Applied steps, in order
    pub steps: Vec<NormalizationStep>,
}

/// Normalize inbound content for a channel
#[must_use]
pub fn normalize_content(channel: ChannelType, content: &str) -> Normalized {
    let mut steps = Vec::new();
    let mut text = content.replace("\r\n", "\n");

    match channel {
        ChannelType::WhatsApp | ChannelType::Instagram | ChannelType::Messenger => {
            let stripped = strip_chat_formatting(&text);
            if stripped != text {
                steps.push(NormalizationStep::StripFormatting);
                text = stripped;
            }
        }
        ChannelType::Email => {
            let (stripped, email_steps) = strip_email_trailers(&text);
            steps.extend(email_steps);
            text = stripped;
        }
        ChannelType::Sms | ChannelType::Web => {}
    }

    let collapsed = BLANK_RUNS.replace_all(&text, "\n\n");
    if collapsed != text {
        steps.push(NormalizationStep::CollapseBlankLines);
        text = collapsed.into_owned();
    }

    let trimmed = text.trim();
    if trimmed.len() != text.len() {
        steps.push(NormalizationStep::TrimWhitespace);
        text = trimmed.to_string();
    }

    Normalized {
        content: text,
        steps,
    }
}

/// Remove WhatsApp-style emphasis markers
#[must_use]
pub fn strip_chat_formatting(text: &str) -> String {
    let mut text = text.replace("```", "");
    for marker in [&*BOLD, &*ITALIC, &*STRIKE] {
        text = strip_marker(marker, text);
    }
    text
}

/// A match consumes the boundary after its closing delimiter, so an
/// adjacent span only becomes matchable on the next pass.
fn strip_marker(marker: &Regex, mut text: String) -> String {
    loop {
        let next = marker.replace_all(&text, "$1$2$3").into_owned();
        if next == text {
            return text;
        }
        text = next;
    }
}

/// Cut quoted lines, forwarded trailers and signature blocks from an e-mail body
#[must_use]
pub fn strip_email_trailers(text: &str) -> (String, Vec<NormalizationStep>) {
    let mut kept: Vec<&str> = Vec::new();
    let mut quoted = false;
    let mut cut = None;

    for line in text.lines() {
        if line == "-- " || line.trim_end() == "--" {
            cut = Some(NormalizationStep::StripSignature);
            break;
        }
        if FORWARD_MARKER.is_match(line) {
            cut = Some(NormalizationStep::StripForwarded);
            break;
        }
        if line.trim_start().starts_with('>') || REPLY_ATTRIBUTION.is_match(line) {
            quoted = true;
            continue;
        }
        kept.push(line);
    }

    let mut steps = Vec::new();
    if quoted {
        steps.push(NormalizationStep::StripQuotedLines);
    }
    if let Some(step) = cut {
        steps.push(step);
    }
    (kept.join("\n"), steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_quotes_and_signature_are_stripped() {
        let body = "Thanks, that fixed it.\n\
                    One more question about billing.\n\
                    \n\
                    On Tue, Mar 4, 2025 at 10:00 AM Support <help@acme.test> wrote:\n\
                    > Please restart the router.\n\
                    > Regards\n\
                    --\n\
                    Jane Doe\n\
                    ACME Corp";

        let out = normalize_content(ChannelType::Email, body);
        assert_eq!(
            out.content,
            "Thanks, that fixed it.\nOne more question about billing."
        );
        assert!(out.steps.contains(&NormalizationStep::StripQuotedLines));
        assert!(out.steps.contains(&NormalizationStep::StripSignature));
        assert!(!out.content.contains("router"));
        assert!(!out.content.contains("Jane"));
    }

    #[test]
    fn test_rfc_signature_delimiter() {
        let (text, steps) = strip_email_trailers("Hi\n-- \nBob");
        assert_eq!(text, "Hi");
        assert_eq!(steps, vec![NormalizationStep::StripSignature]);
    }

    #[test]
    fn test_forwarded_trailer_is_cut() {
        let body = "See below\n---------- Forwarded message ----------\nFrom: someone";
        let out = normalize_content(ChannelType::Email, body);
        assert_eq!(out.content, "See below");
        assert_eq!(out.steps, vec![NormalizationStep::StripForwarded]);
    }

    #[test]
    fn test_double_dash_inside_text_is_kept() {
        let (text, steps) = strip_email_trailers("Price is 10 -- 20 EUR");
        assert_eq!(text, "Price is 10 -- 20 EUR");
        assert!(steps.is_empty());
    }

    #[test]
    fn test_whatsapp_formatting_is_stripped() {
        let out = normalize_content(
            ChannelType::WhatsApp,
            "  *Order* _late_ ~again~ ```code```  ",
        );
        assert_eq!(out.content, "Order late again code");
        assert_eq!(
            out.steps,
            vec![
                NormalizationStep::StripFormatting,
                NormalizationStep::TrimWhitespace
            ]
        );
    }

    #[test]
    fn test_adjacent_emphasis_spans_are_all_stripped() {
        let out = normalize_content(ChannelType::WhatsApp, "*Hello* *World* _a_ _b_");
        assert_eq!(out.content, "Hello World a b");

        let out = normalize_content(ChannelType::Messenger, "~one~ ~two~ ~three~");
        assert_eq!(out.content, "one two three");
    }

    #[test]
    fn test_identifiers_are_not_mangled() {
        let out = normalize_content(ChannelType::WhatsApp, "my order_id is 2*3*4");
        assert_eq!(out.content, "my order_id is 2*3*4");
        assert!(out.steps.is_empty());
    }

    #[test]
    fn test_sms_only_trims() {
        let out = normalize_content(ChannelType::Sms, "*hello*\n\n\n\nthere ");
        assert_eq!(out.content, "*hello*\n\nthere");
        assert_eq!(
            out.steps,
            vec![
                NormalizationStep::CollapseBlankLines,
                NormalizationStep::TrimWhitespace
            ]
        );
    }
}
