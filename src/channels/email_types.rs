//! Email-specific helpers — quote stripping, thread ids, message parsing.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use mail_parser::{HeaderName, MessageParser, MimeHeaders};
use regex::Regex;

use crate::pipeline::types::InboundEmail;

static MESSAGE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<([^<>\s]+)>").unwrap());

/// Strip quoted text from an email body.
///
/// Removes:
/// - Lines starting with `>` (quoted reply lines)
/// - "On ... wrote:" attribution lines and everything after
/// - "--- Original Message ---" separators and everything after
///
/// Pure string parsing — no LLM calls.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        // "On Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:"
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Message ids in a `References` / `In-Reply-To` header, without brackets.
pub fn parse_message_ids(header: &str) -> Vec<String> {
    MESSAGE_ID
        .captures_iter(header)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Thread id for a message: the first `References` id, else `In-Reply-To`,
/// else the message's own id.
pub fn thread_root(references: Option<&str>, in_reply_to: Option<&str>, message_id: &str) -> String {
    references
        .and_then(|r| parse_message_ids(r).into_iter().next())
        .or_else(|| in_reply_to.and_then(|r| parse_message_ids(r).into_iter().next()))
        .unwrap_or_else(|| message_id.trim_matches(|c| c == '<' || c == '>').to_string())
}

/// `<id>` form for headers.
pub fn bracketed(id: &str) -> String {
    format!("<{}>", id.trim_matches(|c| c == '<' || c == '>'))
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

/// Parse a raw RFC 822 message into an inbound candidate.
///
/// `received_at` is the server's receipt time and wins over the `Date`
/// header; with neither, the timestamp is the Unix epoch so it stays stable
/// across listings. Returns `None` for unparseable input or a message
/// without a sender.
pub fn parse_inbound(raw: &[u8], received_at: Option<DateTime<Utc>>) -> Option<InboundEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let participant = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_lowercase())?;

    let message_id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("gen-{}", uuid::Uuid::new_v4()));

    let thread_id = thread_root(
        parsed.header_raw(HeaderName::References),
        parsed.header_raw(HeaderName::InReplyTo),
        &message_id,
    );

    let timestamp = received_at
        .or_else(|| {
            parsed
                .date()
                .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        })
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Some(InboundEmail {
        thread_id,
        message_id,
        participant,
        subject: parsed.subject().unwrap_or_default().to_string(),
        body: strip_quoted_text(&extract_text(&parsed)),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── strip_quoted_text tests ─────────────────────────────────

    #[test]
    fn strip_basic_quoted_lines() {
        let body = "Hello!\n\n> This is quoted\n> Another quoted line\nThanks";
        assert_eq!(strip_quoted_text(body), "Hello!\n\nThanks");
    }

    #[test]
    fn strip_on_wrote_attribution() {
        let body = "Sounds good!\n\nOn Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:\n> Original message";
        assert_eq!(strip_quoted_text(body), "Sounds good!");
    }

    #[test]
    fn strip_original_message_separator() {
        let body = "My reply\n\n--- Original Message ---\nOld stuff here";
        assert_eq!(strip_quoted_text(body), "My reply");
    }

    #[test]
    fn strip_no_quotes_or_empty() {
        let body = "Just a normal message\nWith multiple lines";
        assert_eq!(strip_quoted_text(body), body);
        assert_eq!(strip_quoted_text(""), "");
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<div><b>Bold</b>  and <i>italic</i></div>"), "Bold and italic");
    }

    // ── Thread ids ──────────────────────────────────────────────

    #[test]
    fn thread_root_prefers_first_reference() {
        assert_eq!(
            thread_root(Some("<root@x.com> <mid@x.com>"), Some("<mid@x.com>"), "self@x.com"),
            "root@x.com"
        );
        assert_eq!(thread_root(None, Some("<mid@x.com>"), "self@x.com"), "mid@x.com");
        assert_eq!(thread_root(None, None, "<self@x.com>"), "self@x.com");
        assert_eq!(thread_root(Some("garbage"), None, "self@x.com"), "self@x.com");
    }

    #[test]
    fn bracketed_is_idempotent() {
        assert_eq!(bracketed("a@b"), "<a@b>");
        assert_eq!(bracketed("<a@b>"), "<a@b>");
    }

    // ── parse_inbound ───────────────────────────────────────────

    #[test]
    fn parse_reply_in_existing_thread() {
        let raw = "From: Jane Doe <Jane@Co.com>\r\n\
To: me@mine.com\r\n\
Subject: Re: Hi Jane\r\n\
Message-ID: <m2@co.com>\r\n\
In-Reply-To: <root@mine.com>\r\n\
References: <root@mine.com>\r\n\
Date: Sun, 1 Mar 2026 09:30:00 +0000\r\n\
\r\n\
Tuesday works for me.\r\n\
\r\n\
On Sat, Feb 28, 2026 at 9:00 AM Me <me@mine.com> wrote:\r\n\
> Would you be interested in a demo?\r\n";

        let email = parse_inbound(raw.as_bytes(), None).unwrap();
        assert_eq!(email.participant, "jane@co.com");
        assert_eq!(email.message_id, "m2@co.com");
        assert_eq!(email.thread_id, "root@mine.com");
        assert_eq!(email.subject, "Re: Hi Jane");
        assert_eq!(email.body, "Tuesday works for me.");
        assert_eq!(email.timestamp.to_rfc3339(), "2026-03-01T09:30:00+00:00");
    }

    #[test]
    fn parse_new_conversation_uses_own_id() {
        let raw = "From: bob@x.com\r\nSubject: Question\r\nMessage-ID: <q1@x.com>\r\n\r\nHow much?\r\n";
        let email = parse_inbound(raw.as_bytes(), None).unwrap();
        assert_eq!(email.thread_id, "q1@x.com");
        assert_eq!(email.timestamp, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(parse_inbound(raw.as_bytes(), None).unwrap().timestamp, email.timestamp);
    }

    #[test]
    fn receipt_time_wins_over_date_header() {
        let raw = "From: bob@x.com\r\nMessage-ID: <q2@x.com>\r\n\
Date: Sun, 1 Mar 2026 09:30:00 +0000\r\n\r\nHi\r\n";
        let received = DateTime::parse_from_rfc3339("2026-03-02T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let email = parse_inbound(raw.as_bytes(), Some(received)).unwrap();
        assert_eq!(email.timestamp, received);
    }
}
