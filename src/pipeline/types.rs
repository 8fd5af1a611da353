//! Shared types for the workflow pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailError;
use crate::ledger::SchedulingStatus;

// ── Inbound ─────────────────────────────────────────────────────────

/// An unread message as reported by the mail provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Provider thread id.
    pub thread_id: String,
    /// Provider message id.
    pub message_id: String,
    /// Sender address.
    pub participant: String,
    #[serde(default)]
    pub subject: String,
    /// Body with quoted history already stripped.
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

// ── Outbound ────────────────────────────────────────────────────────

/// A message ready to hand to the mail provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    /// Existing thread to reply in, `None` to start a new one.
    pub thread_id: Option<String>,
    /// Message being answered, for threading headers.
    pub in_reply_to: Option<String>,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// What the provider reports after a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    /// Thread the message landed in, when the provider knows it.
    pub thread_id: Option<String>,
}

// ── Drafts ──────────────────────────────────────────────────────────

/// Ledger change a reply carries for the thread's scheduling subflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingEffect {
    None,
    /// The reply offers a meeting; `None → Proposed` on success.
    Propose,
    /// The customer accepted the outstanding offer; `Proposed → Confirmed`.
    Confirm,
}

/// What a draft is for, and so which ledger it commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftKind {
    Reply {
        inbound: InboundEmail,
        scheduling: SchedulingEffect,
        /// Status at drafting time, shown to the operator.
        status: SchedulingStatus,
    },
    Marketing {
        campaign: String,
        recipient: String,
        /// Body offers a meeting; the new thread starts `Proposed`.
        proposes_meeting: bool,
    },
}

/// A rendered outbound action awaiting the operator's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Conversation history shown alongside the body.
    pub context: Option<String>,
    /// Warnings for the operator (e.g. a re-proposed meeting).
    pub notes: Vec<String>,
    pub kind: DraftKind,
}

impl Draft {
    /// Thread id for replies, `None` for a new marketing thread.
    pub fn thread_id(&self) -> Option<&str> {
        match &self.kind {
            DraftKind::Reply { inbound, .. } => Some(&inbound.thread_id),
            DraftKind::Marketing { .. } => None,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self.kind {
            DraftKind::Reply { .. } => "reply",
            DraftKind::Marketing { .. } => "marketing",
        }
    }

    pub fn to_outbound(&self) -> OutboundEmail {
        let in_reply_to = match &self.kind {
            DraftKind::Reply { inbound, .. } => Some(inbound.message_id.clone()),
            DraftKind::Marketing { .. } => None,
        };
        OutboundEmail {
            thread_id: self.thread_id().map(String::from),
            in_reply_to,
            to: self.to.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
        }
    }
}

/// `Re: <subject>`, without stacking prefixes.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.len() >= 3 && trimmed[..3].eq_ignore_ascii_case("re:") {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

// ── Mail provider ───────────────────────────────────────────────────

/// Mail provider capability — pure I/O, no state.
///
/// Dedup, approval, and ledger logic live in the pipeline; providers only
/// move messages.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Unread messages, oldest first. With a `limit`, the oldest `limit`.
    async fn list_unread(&self, limit: Option<usize>) -> Result<Vec<InboundEmail>, MailError>;

    /// Deliver a message. Called only after operator approval.
    async fn send(&self, email: &OutboundEmail) -> Result<SentMessage, MailError>;

    /// Mark a handled inbound message as read.
    async fn mark_read(&self, message_id: &str) -> Result<(), MailError>;
}
