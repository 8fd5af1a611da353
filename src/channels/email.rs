//! Email provider — IMAP for inbound, SMTP via lettre for outbound.
//!
//! Pure I/O. Listing uses `BODY.PEEK[]` so it never marks mail as read, and
//! stamps each message with the server's `INTERNALDATE`;
//! messages are marked read explicitly after a reply goes out.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::channels::email_types::{bracketed, parse_inbound};
use crate::error::{ConfigError, MailError};
use crate::pipeline::types::{InboundEmail, MailProvider, OutboundEmail, SentMessage};

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `EMAIL_IMAP_HOST` is not set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(imap_host) = std::env::var("EMAIL_IMAP_HOST") else {
            return Ok(None);
        };

        let imap_port = parse_port("EMAIL_IMAP_PORT", 993)?;
        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));
        let smtp_port = parse_port("EMAIL_SMTP_PORT", 587)?;

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Ok(Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        }))
    }

    /// Domain part of the from address, for generated Message-IDs.
    fn id_domain(&self) -> &str {
        self.from_address
            .rsplit_once('@')
            .map(|(_, d)| d.trim_end_matches('>'))
            .filter(|d| !d.is_empty())
            .unwrap_or("localhost")
    }
}

fn parse_port(key: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

// ── Provider ────────────────────────────────────────────────────────

/// IMAP + SMTP mailbox.
pub struct EmailProvider {
    config: Arc<EmailConfig>,
}

impl EmailProvider {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Build the RFC 5322 message for an outbound email.
    fn build_message(&self, email: &OutboundEmail, message_id: &str) -> Result<Message, MailError> {
        let from = self
            .config
            .from_address
            .parse()
            .map_err(|e| MailError::InvalidAddress {
                address: self.config.from_address.clone(),
                reason: format!("{e}"),
            })?;
        let to = email.to.parse().map_err(|e| MailError::InvalidAddress {
            address: email.to.clone(),
            reason: format!("{e}"),
        })?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(bracketed(message_id)));

        if let Some(parent) = &email.in_reply_to {
            builder = builder.in_reply_to(bracketed(parent));
            let mut references = Vec::new();
            if let Some(root) = &email.thread_id
                && root != parent
            {
                references.push(bracketed(root));
            }
            references.push(bracketed(parent));
            builder = builder.references(references.join(" "));
        }

        builder
            .body(email.body.clone())
            .map_err(|e| MailError::SendFailed {
                to: email.to.clone(),
                reason: format!("Failed to build email: {e}"),
            })
    }
}

#[async_trait]
impl MailProvider for EmailProvider {
    fn name(&self) -> &str {
        "email"
    }

    async fn list_unread(&self, limit: Option<usize>) -> Result<Vec<InboundEmail>, MailError> {
        let config = Arc::clone(&self.config);
        let messages = tokio::task::spawn_blocking(move || fetch_unread(&config, limit))
            .await
            .map_err(|e| MailError::FetchFailed(format!("IMAP task panicked: {e}")))?
            .map_err(|e| MailError::FetchFailed(e.to_string()))?;
        tracing::info!(count = messages.len(), host = %self.config.imap_host, "Fetched unread mail");
        Ok(messages)
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentMessage, MailError> {
        let message_id = format!("{}@{}", Uuid::new_v4(), self.config.id_domain());
        let message = self.build_message(email, &message_id)?;

        let config = Arc::clone(&self.config);
        let to = email.to.clone();
        tokio::task::spawn_blocking(move || smtp_send(&config, &message, &to))
            .await
            .map_err(|e| MailError::SendFailed {
                to: email.to.clone(),
                reason: format!("SMTP task panicked: {e}"),
            })??;

        tracing::info!(to = %email.to, "Email sent");
        Ok(SentMessage {
            thread_id: Some(email.thread_id.clone().unwrap_or_else(|| message_id.clone())),
            message_id,
        })
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailError> {
        let config = Arc::clone(&self.config);
        let id = message_id.to_string();
        tokio::task::spawn_blocking(move || mark_seen(&config, &id))
            .await
            .map_err(|e| MailError::FetchFailed(format!("IMAP task panicked: {e}")))?
            .map_err(|e| MailError::FetchFailed(e.to_string()))
    }
}

fn smtp_send(config: &EmailConfig, message: &Message, to: &str) -> Result<(), MailError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );
    let relay = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    };
    let transport = relay
        .map_err(|e| MailError::SendFailed {
            to: to.to_string(),
            reason: format!("SMTP relay error: {e}"),
        })?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    transport.send(message).map_err(|e| MailError::SendFailed {
        to: to.to_string(),
        reason: format!("SMTP send failed: {e}"),
    })?;
    Ok(())
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for IMAP operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A logged-in IMAP session over TLS (blocking — run in spawn_blocking).
struct ImapSession {
    tls: TlsStream,
    tag: u32,
}

impl ImapSession {
    fn connect(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag: 0,
        };
        let _greeting = session.read_line()?;

        let login = session.command(&format!(
            "LOGIN {} {}",
            imap_quote(&config.username),
            imap_quote(config.password.expose_secret())
        ))?;
        if !login.last().is_some_and(|l| l.contains("OK")) {
            return Err("IMAP login failed".into());
        }

        let select = session.command("SELECT \"INBOX\"")?;
        if !select.last().is_some_and(|l| l.contains("OK")) {
            return Err("IMAP SELECT INBOX failed".into());
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a tagged command; returns every response line up to and
    /// including the tagged completion.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        IoWrite::write_all(&mut self.tls, format!("{tag} {cmd}\r\n").as_bytes())?;
        IoWrite::flush(&mut self.tls)?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&format!("{tag} "));
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

static INTERNALDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"INTERNALDATE "([^"]+)""#).unwrap());

/// IMAP quoted string, with `\` and `"` escaped.
fn imap_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Server receipt time from the untagged FETCH header line.
fn internal_date(lines: &[String]) -> Option<DateTime<Utc>> {
    let raw = INTERNALDATE.captures(lines.first()?)?.get(1)?.as_str();
    DateTime::parse_from_str(raw.trim(), "%d-%b-%Y %H:%M:%S %z")
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// UIDs from `* SEARCH` response lines.
fn parse_search(lines: &[String]) -> Vec<u32> {
    let mut uids: Vec<u32> = lines
        .iter()
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2))
        .filter_map(|n| n.parse().ok())
        .collect();
    uids.sort_unstable();
    uids
}

/// Message literal from a FETCH response: everything between the untagged
/// header line and the closing `)` + tagged completion.
fn fetch_literal(lines: &[String]) -> String {
    lines
        .iter()
        .skip(1)
        .take(lines.len().saturating_sub(3))
        .cloned()
        .collect()
}

/// Oldest unread messages, without setting `\Seen`.
fn fetch_unread(config: &EmailConfig, limit: Option<usize>) -> Result<Vec<InboundEmail>, ImapError> {
    let mut session = ImapSession::connect(config)?;

    let mut uids = parse_search(&session.command("UID SEARCH UNSEEN")?);
    if let Some(limit) = limit {
        uids.truncate(limit);
    }

    let mut results = Vec::with_capacity(uids.len());
    for uid in uids {
        let lines = session.command(&format!("UID FETCH {uid} (INTERNALDATE BODY.PEEK[])"))?;
        let raw = fetch_literal(&lines);
        match parse_inbound(raw.as_bytes(), internal_date(&lines)) {
            Some(email) => results.push(email),
            None => tracing::warn!(uid, "Skipping unparseable message"),
        }
    }

    session.logout();
    Ok(results)
}

/// Set `\Seen` on the message with this Message-ID.
fn mark_seen(config: &EmailConfig, message_id: &str) -> Result<(), ImapError> {
    let mut session = ImapSession::connect(config)?;
    let uids = parse_search(&session.command(&format!(
        "UID SEARCH HEADER Message-ID {}",
        imap_quote(&bracketed(message_id))
    ))?);
    for uid in &uids {
        session.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
    }
    session.logout();
    if uids.is_empty() {
        tracing::debug!(message_id, "No mailbox message matched for mark-read");
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            imap_host: "imap.example.com".into(),
            imap_port: 993,
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            username: "me@mine.com".into(),
            password: SecretString::from("secret"),
            from_address: "Me <me@mine.com>".into(),
        }
    }

    #[test]
    fn parse_search_collects_sorted_uids() {
        let lines = vec![
            "* SEARCH 12 4 7\r\n".to_string(),
            "A3 OK SEARCH completed\r\n".to_string(),
        ];
        assert_eq!(parse_search(&lines), vec![4, 7, 12]);
        assert!(parse_search(&["* SEARCH\r\n".to_string()]).is_empty());
    }

    #[test]
    fn fetch_literal_strips_envelope_lines() {
        let lines = vec![
            "* 1 FETCH (UID 4 BODY[] {30}\r\n".to_string(),
            "From: a@b.com\r\n".to_string(),
            "\r\n".to_string(),
            "hi\r\n".to_string(),
            ")\r\n".to_string(),
            "A4 OK FETCH completed\r\n".to_string(),
        ];
        assert_eq!(fetch_literal(&lines), "From: a@b.com\r\n\r\nhi\r\n");
    }

    #[test]
    fn internal_date_read_from_fetch_header() {
        let lines = vec![
            "* 1 FETCH (UID 4 INTERNALDATE \"17-Jul-2026 02:44:25 -0700\" BODY[] {30}\r\n".to_string(),
            "From: a@b.com\r\n".to_string(),
        ];
        let expected = DateTime::parse_from_rfc3339("2026-07-17T09:44:25Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(internal_date(&lines), Some(expected));

        let padded = vec!["* 2 FETCH (UID 9 INTERNALDATE \" 7-Jul-2026 02:44:25 +0000\" BODY[] {2}\r\n".to_string()];
        assert_eq!(internal_date(&padded).unwrap().to_rfc3339(), "2026-07-07T02:44:25+00:00");

        assert_eq!(internal_date(&["* 3 FETCH (UID 5 BODY[] {2}\r\n".to_string()]), None);
    }

    #[test]
    fn quoted_strings_escape_quotes_and_backslashes() {
        assert_eq!(imap_quote("me@mine.com"), "\"me@mine.com\"");
        assert_eq!(imap_quote(r#"<a"b\c@x>"#), r#""<a\"b\\c@x>""#);
    }

    #[test]
    fn id_domain_from_display_address() {
        assert_eq!(config().id_domain(), "mine.com");
        let bare = EmailConfig {
            from_address: "nobody".into(),
            ..config()
        };
        assert_eq!(bare.id_domain(), "localhost");
    }

    #[test]
    fn reply_carries_threading_headers() {
        let provider = EmailProvider::new(config());
        let email = OutboundEmail {
            thread_id: Some("root@co.com".into()),
            in_reply_to: Some("m2@co.com".into()),
            to: "jane@co.com".into(),
            subject: "Re: Demo".into(),
            body: "Tuesday it is.".into(),
        };
        let message = provider.build_message(&email, "out1@mine.com").unwrap();
        let text = String::from_utf8(message.formatted()).unwrap();
        assert!(text.contains("In-Reply-To: <m2@co.com>"));
        assert!(text.contains("References: <root@co.com> <m2@co.com>"));
        assert!(text.contains("Message-ID: <out1@mine.com>"));
    }

    #[test]
    fn invalid_recipient_is_rejected_before_sending() {
        let provider = EmailProvider::new(config());
        let email = OutboundEmail {
            thread_id: None,
            in_reply_to: None,
            to: "not an address".into(),
            subject: "Hi".into(),
            body: "Hello".into(),
        };
        assert!(matches!(
            provider.build_message(&email, "x@mine.com"),
            Err(MailError::InvalidAddress { .. })
        ));
    }
}
