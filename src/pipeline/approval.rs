//! Approval gate — the human checkpoint in front of every outbound send.
//!
//! `Drafted → Approved → {Sent | SendFailed}`, or `Drafted → {Rejected |
//! Deferred}`. The send outcome is always known before any ledger mutation,
//! and a successful send is committed and flushed before `run` returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::error::{MailError, StoreError};
use crate::ledger::{Ledgers, thread::short_id};
use crate::pipeline::rules::{self, Action, SkipReason, Verdict};
use crate::pipeline::types::{Draft, DraftKind, MailProvider, OutboundEmail, SchedulingEffect, SentMessage};

/// The operator's answer to a presented draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    /// Dropped for this run; resurfaces next run.
    Reject,
    /// No answer this time; resurfaces next run.
    Defer,
}

/// Where drafts are shown to a human.
///
/// `present` blocks the workflow until a decision is made. There is no
/// timeout.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn present(&self, draft: &Draft) -> ApprovalDecision;
}

/// Lifecycle of one draft through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Drafted,
    Approved,
    Rejected,
    Deferred,
    Sent,
    SendFailed,
}

impl GateState {
    pub fn can_transition_to(&self, target: GateState) -> bool {
        use GateState::*;
        matches!(
            (self, target),
            (Drafted, Approved | Rejected | Deferred) | (Approved, Sent | SendFailed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Drafted | Self::Approved)
    }
}

/// What happened to a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Sent(SentMessage),
    Rejected,
    Deferred,
    /// Final delivery attempt failed; the action stays eligible for retry.
    SendFailed(String),
    /// A rule re-check after approval no longer allows the action.
    Skipped(SkipReason),
    /// The commit would have broken a ledger invariant; nothing recorded.
    Aborted(String),
}

/// Retry and pacing for approved sends.
#[derive(Debug, Clone)]
pub struct SendPolicy {
    /// Delivery attempts per approved draft, at least one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Bounds of the random pause before a reply goes out.
    pub min_reply_delay: Duration,
    pub max_reply_delay: Duration,
}

impl SendPolicy {
    /// One attempt, no pauses.
    pub fn immediate() -> Self {
        Self {
            max_retries: 1,
            retry_delay: Duration::ZERO,
            min_reply_delay: Duration::ZERO,
            max_reply_delay: Duration::ZERO,
        }
    }

    /// Uniformly random pause in `[min_reply_delay, max_reply_delay]`.
    pub fn reply_delay(&self) -> Duration {
        if self.max_reply_delay <= self.min_reply_delay {
            return self.min_reply_delay;
        }
        let min = self.min_reply_delay.as_millis() as u64;
        let max = self.max_reply_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            min_reply_delay: Duration::from_secs(30),
            max_reply_delay: Duration::from_secs(120),
        }
    }
}

/// Wraps the operator's decision, the send, and the ledger commit.
pub struct ApprovalGate {
    mail: Arc<dyn MailProvider>,
    approval: Arc<dyn ApprovalChannel>,
    policy: SendPolicy,
}

impl ApprovalGate {
    pub fn new(
        mail: Arc<dyn MailProvider>,
        approval: Arc<dyn ApprovalChannel>,
        policy: SendPolicy,
    ) -> Self {
        Self {
            mail,
            approval,
            policy,
        }
    }

    /// Drive one draft through the gate.
    ///
    /// Only a store failure is returned as an error; every other outcome is
    /// scoped to this draft.
    pub async fn run(&self, ledgers: &mut Ledgers, draft: &Draft) -> Result<GateOutcome, StoreError> {
        let mut state = GateState::Drafted;

        let decision = self.approval.present(draft).await;
        match decision {
            ApprovalDecision::Reject => {
                transition(&mut state, GateState::Rejected);
                info!(kind = draft.label(), to = %draft.to, "Draft rejected by operator");
                return Ok(GateOutcome::Rejected);
            }
            ApprovalDecision::Defer => {
                transition(&mut state, GateState::Deferred);
                info!(kind = draft.label(), to = %draft.to, "Draft deferred by operator");
                return Ok(GateOutcome::Deferred);
            }
            ApprovalDecision::Approve => transition(&mut state, GateState::Approved),
        }

        match recheck(ledgers, draft) {
            Verdict::Allow => {}
            Verdict::Skip(reason) => {
                warn!(kind = draft.label(), to = %draft.to, %reason, "Approved draft no longer allowed");
                return Ok(GateOutcome::Skipped(reason));
            }
            Verdict::Block { reason } => {
                warn!(kind = draft.label(), to = %draft.to, %reason, "Approved draft blocked");
                return Ok(GateOutcome::Aborted(reason));
            }
        }

        if matches!(draft.kind, DraftKind::Reply { .. }) {
            let pause = self.policy.reply_delay();
            if !pause.is_zero() {
                info!(secs = pause.as_secs(), "Waiting before sending reply");
                tokio::time::sleep(pause).await;
            }
        }

        let outbound = draft.to_outbound();
        match self.send_with_retries(&outbound).await {
            Ok(sent) => {
                transition(&mut state, GateState::Sent);
                if let Err(reason) = commit_sent(ledgers, draft, &sent) {
                    error!(kind = draft.label(), %reason, "Ledger commit aborted");
                    return Ok(GateOutcome::Aborted(reason));
                }
                ledgers.flush().await?;
                info!(
                    kind = draft.label(),
                    to = %draft.to,
                    message_id = %short_id(&sent.message_id),
                    "Draft sent and recorded"
                );
                Ok(GateOutcome::Sent(sent))
            }
            Err(e) => {
                transition(&mut state, GateState::SendFailed);
                let reason = e.to_string();
                if let DraftKind::Marketing {
                    campaign,
                    recipient,
                    ..
                } = &draft.kind
                {
                    ledgers
                        .marketing_mut()
                        .record_failed(campaign, recipient, Utc::now(), &reason);
                    ledgers.flush().await?;
                }
                Ok(GateOutcome::SendFailed(reason))
            }
        }
    }

    async fn send_with_retries(&self, email: &OutboundEmail) -> Result<SentMessage, MailError> {
        let attempts = self.policy.max_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.mail.send(email).await {
                Ok(sent) => return Ok(sent),
                Err(e) => {
                    warn!(
                        provider = self.mail.name(),
                        attempt,
                        attempts,
                        error = %e,
                        "Send attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts && !self.policy.retry_delay.is_zero() {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| MailError::SendFailed {
            to: email.to.clone(),
            reason: "no delivery attempt was made".into(),
        }))
    }
}

fn transition(state: &mut GateState, next: GateState) {
    debug_assert!(state.can_transition_to(next), "{state:?} -> {next:?}");
    debug!(from = ?state, to = ?next, "Gate transition");
    *state = next;
}

/// Rules again, right before the send.
fn recheck(ledgers: &Ledgers, draft: &Draft) -> Verdict {
    let snapshot = ledgers.snapshot();
    match &draft.kind {
        DraftKind::Reply { inbound, .. } => rules::decide(
            &Action::Reply {
                thread_id: &inbound.thread_id,
                message_id: &inbound.message_id,
                received_at: inbound.timestamp,
            },
            &snapshot,
        ),
        DraftKind::Marketing {
            campaign,
            recipient,
            ..
        } => rules::decide(
            &Action::MarketingSend {
                campaign,
                recipient,
            },
            &snapshot,
        ),
    }
}

/// Apply every ledger change a delivered draft implies.
fn commit_sent(ledgers: &mut Ledgers, draft: &Draft, sent: &SentMessage) -> Result<(), String> {
    let now = Utc::now();
    match &draft.kind {
        DraftKind::Reply {
            inbound,
            scheduling,
            ..
        } => {
            let thread_id = inbound.thread_id.as_str();
            let threads = ledgers.threads_mut();
            threads.record_inbound(
                thread_id,
                &inbound.participant,
                &inbound.message_id,
                &inbound.body,
                inbound.timestamp,
            );
            threads.record_outbound(thread_id, Some(&sent.message_id), &draft.body, now);
            match scheduling {
                SchedulingEffect::Propose => {
                    threads.propose_scheduling(thread_id);
                }
                SchedulingEffect::Confirm => {
                    threads.confirm_scheduling(thread_id);
                }
                SchedulingEffect::None => {}
            }
        }
        DraftKind::Marketing {
            campaign,
            recipient,
            proposes_meeting,
        } => {
            ledgers
                .marketing_mut()
                .record_sent(campaign, recipient, now)
                .map_err(|e| e.to_string())?;
            let thread_id = sent.thread_id.as_deref().unwrap_or(sent.message_id.as_str());
            let threads = ledgers.threads_mut();
            threads.record_marketing_outbound(
                thread_id,
                recipient,
                Some(&sent.message_id),
                &draft.body,
                now,
            );
            if *proposes_meeting {
                threads.propose_scheduling(thread_id);
            }
        }
    }
    ledgers.watermark_mut().note_committed();
    Ok(())
}
