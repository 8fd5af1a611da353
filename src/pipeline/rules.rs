//! Dedup and scheduling rules.
//!
//! Runs before any draft is requested and again at the approval gate, right
//! before a send:
//! - marketing send already recorded as SENT → Skip
//! - reply to a message at or below the thread watermark → Skip
//! - reply on an expired thread → Skip
//! - meeting proposal while one is outstanding or confirmed → Skip
//!
//! Rules are total over the snapshot: they never fail and never mutate.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::ledger::{SchedulingStatus, Snapshot};

/// A candidate outbound action.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    MarketingSend {
        campaign: &'a str,
        recipient: &'a str,
    },
    Reply {
        thread_id: &'a str,
        message_id: &'a str,
        received_at: DateTime<Utc>,
    },
    ProposeMeeting {
        thread_id: &'a str,
    },
}

impl Action<'_> {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MarketingSend { .. } => "marketing_send",
            Self::Reply { .. } => "reply",
            Self::ProposeMeeting { .. } => "propose_meeting",
        }
    }
}

/// Why an action was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySent,
    AlreadyHandled,
    ThreadExpired,
    MeetingProposed,
    MeetingConfirmed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AlreadySent => "already sent for this campaign",
            Self::AlreadyHandled => "message already handled",
            Self::ThreadExpired => "thread expired",
            Self::MeetingProposed => "meeting already proposed",
            Self::MeetingConfirmed => "meeting already confirmed",
        };
        write!(f, "{s}")
    }
}

/// Rule outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Skip(SkipReason),
    /// Reserved for policy rules such as opt-out lists; nothing returns it
    /// yet.
    Block { reason: String },
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decide whether `action` may proceed given the current ledgers.
pub fn decide(action: &Action<'_>, ledgers: &Snapshot<'_>) -> Verdict {
    let verdict = match *action {
        Action::MarketingSend {
            campaign,
            recipient,
        } => {
            if ledgers.marketing.has_sent(campaign, recipient) {
                Verdict::Skip(SkipReason::AlreadySent)
            } else {
                Verdict::Allow
            }
        }
        Action::Reply {
            thread_id,
            message_id,
            received_at,
        } => match ledgers.threads.get_context(thread_id) {
            Some(record) if record.has_processed(message_id, received_at) => {
                Verdict::Skip(SkipReason::AlreadyHandled)
            }
            Some(record) if record.is_expired() => Verdict::Skip(SkipReason::ThreadExpired),
            _ => Verdict::Allow,
        },
        Action::ProposeMeeting { thread_id } => {
            match ledgers.threads.scheduling_status(thread_id) {
                SchedulingStatus::None => Verdict::Allow,
                SchedulingStatus::Proposed => Verdict::Skip(SkipReason::MeetingProposed),
                SchedulingStatus::Confirmed => Verdict::Skip(SkipReason::MeetingConfirmed),
            }
        }
    };

    if !verdict.is_allow() {
        debug!(action = action.label(), verdict = ?verdict, "Rule did not allow action");
    }
    verdict
}
