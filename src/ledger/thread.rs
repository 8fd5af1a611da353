//! Thread ledger — per-conversation history, watermark, and scheduling state.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Excerpts are truncated to this many characters.
pub const MAX_EXCERPT_CHARS: usize = 500;

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Meeting-scheduling status of a thread.
///
/// `None → Proposed → Confirmed`. The only way back is an explicit
/// operator reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingStatus {
    #[default]
    None,
    Proposed,
    Confirmed,
}

impl SchedulingStatus {
    /// Check if an automatic transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: SchedulingStatus) -> bool {
        use SchedulingStatus::*;
        matches!((self, target), (None, Proposed) | (Proposed, Confirmed))
    }

    /// Whether the scheduling subflow is finished for this thread.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

impl std::fmt::Display for SchedulingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
        };
        write!(f, "{s}")
    }
}

/// Result of asking to propose a meeting on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalDecision {
    /// The thread moved `None → Proposed`.
    Allow,
    /// A proposal is outstanding or the meeting is already confirmed.
    Suppressed,
}

/// One message in a thread. Entries are append-only and chronological.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    /// Body excerpt, at most [`MAX_EXCERPT_CHARS`] characters.
    pub excerpt: String,
    /// Provider message id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Everything the ledger knows about one conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    /// Counterpart email address.
    pub participant: String,
    pub messages: Vec<ThreadMessage>,
    #[serde(default)]
    pub scheduling_status: SchedulingStatus,
    /// Id of the newest inbound message already handled.
    #[serde(default)]
    pub last_processed_message_id: Option<String>,
    /// Timestamp of the newest inbound message already handled.
    #[serde(default)]
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Thread was opened by a marketing send.
    #[serde(default)]
    pub is_marketing_thread: bool,
    /// Set when the thread went quiet for longer than the expiration window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThreadRecord {
    pub fn new(thread_id: impl Into<String>, participant: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            participant: participant.into(),
            messages: Vec::new(),
            scheduling_status: SchedulingStatus::None,
            last_processed_message_id: None,
            last_processed_at: None,
            is_marketing_thread: false,
            expired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an inbound message is at or below the processing watermark.
    ///
    /// Provider ids are opaque, so "below" is judged by timestamp; an exact
    /// id match (watermark or history) also counts as handled.
    pub fn has_processed(&self, message_id: &str, received_at: DateTime<Utc>) -> bool {
        if self.last_processed_message_id.as_deref() == Some(message_id) {
            return true;
        }
        if self
            .messages
            .iter()
            .any(|m| m.direction == Direction::Inbound && m.message_id.as_deref() == Some(message_id))
        {
            return true;
        }
        self.last_processed_at.is_some_and(|w| received_at <= w)
    }

    pub fn is_expired(&self) -> bool {
        self.expired_at.is_some()
    }

    /// Last activity: newest message, or creation time for an empty thread.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.messages
            .last()
            .map(|m| m.timestamp)
            .unwrap_or(self.created_at)
    }

    /// Whether the operator spoke last (waiting on the customer).
    pub fn last_sender_is_operator(&self) -> bool {
        self.messages
            .last()
            .is_some_and(|m| m.direction == Direction::Outbound)
    }

    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            thread_id: self.thread_id.clone(),
            participant: self.participant.clone(),
            message_count: self.messages.len(),
            scheduling_status: self.scheduling_status,
            is_marketing_thread: self.is_marketing_thread,
            created_at: self.created_at,
            last_activity: self.last_activity(),
        }
    }
}

/// Compact view of a thread for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub participant: String,
    pub message_count: usize,
    pub scheduling_status: SchedulingStatus,
    pub is_marketing_thread: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl std::fmt::Display for ThreadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | {} message(s) | scheduling: {}{} | last activity {}",
            short_id(&self.thread_id),
            self.participant,
            self.message_count,
            self.scheduling_status,
            if self.is_marketing_thread { " | marketing" } else { "" },
            self.last_activity.format("%Y-%m-%d %H:%M"),
        )
    }
}

/// First eight characters of an id, for log lines and listings.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Truncate text to an excerpt.
pub fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_EXCERPT_CHARS - 1).collect();
    out.push('…');
    out
}

/// All known threads, keyed by provider thread id.
///
/// Serializes as `{ <thread_id>: ThreadRecord }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadLedger {
    threads: BTreeMap<String, ThreadRecord>,
}

impl ThreadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Read-only view of a thread.
    pub fn get_context(&self, thread_id: &str) -> Option<&ThreadRecord> {
        self.threads.get(thread_id)
    }

    pub fn scheduling_status(&self, thread_id: &str) -> SchedulingStatus {
        self.threads
            .get(thread_id)
            .map(|t| t.scheduling_status)
            .unwrap_or_default()
    }

    fn upsert(&mut self, thread_id: &str, participant: &str, now: DateTime<Utc>) -> &mut ThreadRecord {
        let record = self
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadRecord::new(thread_id, participant, now));
        if record.participant.is_empty() && !participant.is_empty() {
            record.participant = participant.to_string();
        }
        record
    }

    /// Append an inbound message and advance the thread's watermark.
    ///
    /// Returns `false` (and changes nothing) when the message is at or below
    /// the watermark.
    pub fn record_inbound(
        &mut self,
        thread_id: &str,
        participant: &str,
        message_id: &str,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> bool {
        if self
            .threads
            .get(thread_id)
            .is_some_and(|t| t.has_processed(message_id, timestamp))
        {
            debug!(thread_id = %short_id(thread_id), message_id, "Inbound already recorded");
            return false;
        }

        let record = self.upsert(thread_id, participant, timestamp);
        record.messages.push(ThreadMessage {
            direction: Direction::Inbound,
            timestamp,
            excerpt: excerpt(text),
            message_id: Some(message_id.to_string()),
        });
        record.last_processed_message_id = Some(message_id.to_string());
        record.last_processed_at = Some(
            record
                .last_processed_at
                .map_or(timestamp, |w| w.max(timestamp)),
        );
        record.updated_at = timestamp;
        true
    }

    /// Append a reply the operator sent.
    pub fn record_outbound(
        &mut self,
        thread_id: &str,
        message_id: Option<&str>,
        text: &str,
        timestamp: DateTime<Utc>,
    ) {
        let record = self.upsert(thread_id, "", timestamp);
        record.messages.push(ThreadMessage {
            direction: Direction::Outbound,
            timestamp,
            excerpt: excerpt(text),
            message_id: message_id.map(String::from),
        });
        record.updated_at = timestamp;
    }

    /// Open (or extend) a thread started by a marketing send.
    pub fn record_marketing_outbound(
        &mut self,
        thread_id: &str,
        recipient: &str,
        message_id: Option<&str>,
        text: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.upsert(thread_id, recipient, timestamp).is_marketing_thread = true;
        self.record_outbound(thread_id, message_id, text, timestamp);
    }

    /// `None → Proposed`. Suppressed while a proposal is outstanding or the
    /// meeting is confirmed.
    pub fn propose_scheduling(&mut self, thread_id: &str) -> ProposalDecision {
        let now = Utc::now();
        let record = self.upsert(thread_id, "", now);
        if !record
            .scheduling_status
            .can_transition_to(SchedulingStatus::Proposed)
        {
            debug!(
                thread_id = %short_id(thread_id),
                status = %record.scheduling_status,
                "Meeting proposal suppressed"
            );
            return ProposalDecision::Suppressed;
        }
        record.scheduling_status = SchedulingStatus::Proposed;
        record.updated_at = now;
        info!(thread_id = %short_id(thread_id), "Meeting proposed");
        ProposalDecision::Allow
    }

    /// `Proposed → Confirmed`. Anything else is a tolerated no-op.
    ///
    /// Returns whether the thread transitioned.
    pub fn confirm_scheduling(&mut self, thread_id: &str) -> bool {
        let Some(record) = self.threads.get_mut(thread_id) else {
            debug!(thread_id = %short_id(thread_id), "Confirmation for unknown thread ignored");
            return false;
        };
        if !record
            .scheduling_status
            .can_transition_to(SchedulingStatus::Confirmed)
        {
            debug!(
                thread_id = %short_id(thread_id),
                status = %record.scheduling_status,
                "Out-of-order confirmation ignored"
            );
            return false;
        }
        record.scheduling_status = SchedulingStatus::Confirmed;
        record.updated_at = Utc::now();
        info!(thread_id = %short_id(thread_id), "Meeting confirmed");
        true
    }

    /// Operator reset back to `None`. Returns the previous status, or `None`
    /// if the thread is unknown.
    pub fn reset_scheduling(&mut self, thread_id: &str) -> Option<SchedulingStatus> {
        let record = self.threads.get_mut(thread_id)?;
        let previous = record.scheduling_status;
        record.scheduling_status = SchedulingStatus::None;
        record.updated_at = Utc::now();
        warn!(
            thread_id = %short_id(thread_id),
            previous = %previous,
            "Scheduling status reset by operator"
        );
        Some(previous)
    }

    /// Mark threads idle for longer than `max_age` as expired.
    ///
    /// Threads with a confirmed meeting never expire. Returns how many
    /// threads were newly expired. A window reaching past the start of the
    /// calendar expires nothing.
    pub fn expire_stale(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let Some(cutoff) = now.checked_sub_signed(max_age) else {
            return 0;
        };
        let mut expired = 0;
        for record in self.threads.values_mut() {
            if record.is_expired() || record.scheduling_status.is_terminal() {
                continue;
            }
            if record.last_activity() < cutoff {
                record.expired_at = Some(now);
                record.updated_at = now;
                expired += 1;
                info!(thread_id = %short_id(&record.thread_id), "Thread marked as expired");
            }
        }
        expired
    }

    /// Threads that are neither expired nor finished scheduling.
    pub fn active_threads(&self) -> Vec<&ThreadRecord> {
        self.threads
            .values()
            .filter(|t| !t.is_expired() && !t.scheduling_status.is_terminal())
            .collect()
    }

    /// Full thread id for an exact id or a unique prefix.
    pub fn resolve_thread_id(&self, prefix: &str) -> Option<&str> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return None;
        }
        if let Some((id, _)) = self.threads.get_key_value(prefix) {
            return Some(id.as_str());
        }
        let mut matches = self
            .threads
            .keys()
            .map(String::as_str)
            .filter(|id| id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Some(id),
            _ => None,
        }
    }

    /// The last `limit` messages of a thread formatted for a prompt,
    /// oldest first.
    pub fn context_window(&self, thread_id: &str, limit: usize) -> Option<String> {
        let record = self.threads.get(thread_id)?;
        let skip = record.messages.len().saturating_sub(limit);
        let parts: Vec<String> = record
            .messages
            .iter()
            .skip(skip)
            .filter(|m| !m.excerpt.is_empty())
            .map(|m| {
                let who = match m.direction {
                    Direction::Inbound => "Customer",
                    Direction::Outbound => "You",
                };
                format!("{who} ({}):\n{}", m.timestamp.format("%Y-%m-%d %H:%M"), m.excerpt)
            })
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("\n---\n"))
    }
}
