//! Orchestrator — drives inbox and campaign runs.
//!
//! Inbox run:
//! 1. Expire stale threads
//! 2. `MailProvider::list_unread()` bounded by the first-run cap
//! 3. Drop anything at or below the global watermark unless its thread
//!    still owes the sender an answer
//! 4. Ignore ourselves and senders off the allowlist; keep the newest
//!    candidate per thread
//! 5. Dedup rules → draft → scheduling classification → approval gate
//! 6. Advance the watermark to just below the first unhandled candidate
//!    and flush
//!
//! Every outbound message goes through the approval gate. Per-candidate
//! failures are recorded in the run summary and never stop the run; only a
//! store failure does.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::campaign::{CampaignTemplate, Customer};
use crate::error::{Error, StoreError};
use crate::ledger::{Ledgers, SchedulingStatus, thread::short_id};
use crate::llm::{CompletionProvider, PromptContext};
use crate::pipeline::approval::{ApprovalChannel, ApprovalGate, GateOutcome, SendPolicy};
use crate::pipeline::classifier::SchedulingClassifier;
use crate::pipeline::filter::SenderFilter;
use crate::pipeline::rules::{self, Action, SkipReason, Verdict};
use crate::pipeline::types::{
    Draft, DraftKind, InboundEmail, MailProvider, SchedulingEffect, reply_subject,
};

/// Knobs for a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Candidate cap for the first run that finds any unread mail.
    pub first_run_limit: usize,
    pub thread_expiration: Duration,
    /// Messages of history included in a reply prompt.
    pub context_messages: usize,
    /// Appended to campaign bodies.
    pub signature: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            first_run_limit: 10,
            thread_expiration: Duration::days(30),
            context_messages: 10,
            signature: String::new(),
        }
    }
}

/// Collaborators the orchestrator drives.
pub struct OrchestratorDeps {
    pub mail: Arc<dyn MailProvider>,
    pub llm: Arc<dyn CompletionProvider>,
    pub approval: Arc<dyn ApprovalChannel>,
}

/// Tally of one run, shown to the operator afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub considered: usize,
    pub sent: usize,
    /// `(who, reason)` for candidates the rules skipped.
    pub skipped: Vec<(String, SkipReason)>,
    /// Senders outside the allowlist, or ourselves.
    pub ignored: usize,
    /// Older messages of a thread answered by a newer one in the same run.
    pub superseded: usize,
    pub rejected: usize,
    pub deferred: usize,
    /// `(who, reason)` for send, generation, and commit failures.
    pub failed: Vec<(String, String)>,
    pub expired_threads: usize,
}

impl RunSummary {
    pub fn is_empty(&self) -> bool {
        self.considered == 0 && self.expired_threads == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Considered: {}", self.considered)?;
        writeln!(f, "Sent:       {}", self.sent)?;
        writeln!(f, "Skipped:    {}", self.skipped.len())?;
        for (who, reason) in &self.skipped {
            writeln!(f, "  - {who}: {reason}")?;
        }
        if self.ignored > 0 {
            writeln!(f, "Ignored:    {}", self.ignored)?;
        }
        if self.superseded > 0 {
            writeln!(f, "Superseded: {}", self.superseded)?;
        }
        writeln!(f, "Rejected:   {}", self.rejected)?;
        writeln!(f, "Deferred:   {}", self.deferred)?;
        writeln!(f, "Failed:     {}", self.failed.len())?;
        for (who, reason) in &self.failed {
            writeln!(f, "  - {who}: {reason}")?;
        }
        if self.expired_threads > 0 {
            writeln!(f, "Expired threads: {}", self.expired_threads)?;
        }
        Ok(())
    }
}

/// What happened to one inbox candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Disposition {
    Sent,
    Skipped(SkipReason),
    Ignored,
    Superseded,
    Rejected,
    Deferred,
    Failed(String),
}

impl Disposition {
    /// Handled candidates let the global watermark move past them.
    fn is_handled(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Skipped(_) | Self::Ignored | Self::Superseded
        )
    }

    fn from_gate(outcome: GateOutcome) -> Self {
        match outcome {
            GateOutcome::Sent(_) => Self::Sent,
            GateOutcome::Rejected => Self::Rejected,
            GateOutcome::Deferred => Self::Deferred,
            GateOutcome::Skipped(reason) => Self::Skipped(reason),
            GateOutcome::SendFailed(reason) | GateOutcome::Aborted(reason) => Self::Failed(reason),
        }
    }

    fn tally(&self, who: String, summary: &mut RunSummary) {
        match self {
            Self::Sent => summary.sent += 1,
            Self::Skipped(reason) => summary.skipped.push((who, *reason)),
            Self::Ignored => summary.ignored += 1,
            Self::Superseded => summary.superseded += 1,
            Self::Rejected => summary.rejected += 1,
            Self::Deferred => summary.deferred += 1,
            Self::Failed(reason) => summary.failed.push((who, reason.clone())),
        }
    }
}

pub struct Orchestrator {
    mail: Arc<dyn MailProvider>,
    llm: Arc<dyn CompletionProvider>,
    gate: ApprovalGate,
    classifier: SchedulingClassifier,
    filter: SenderFilter,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        deps: OrchestratorDeps,
        policy: SendPolicy,
        filter: SenderFilter,
        settings: RunSettings,
    ) -> Self {
        let gate = ApprovalGate::new(Arc::clone(&deps.mail), deps.approval, policy);
        Self {
            mail: deps.mail,
            llm: deps.llm,
            gate,
            classifier: SchedulingClassifier::default_rules(),
            filter,
            settings,
        }
    }

    /// Replace the built-in scheduling phrase tables.
    pub fn with_classifier(mut self, classifier: SchedulingClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Answer unread customer mail.
    pub async fn check_inbox(&self, ledgers: &mut Ledgers) -> Result<RunSummary, Error> {
        let now = Utc::now();
        let mut summary = RunSummary::default();

        let expired = ledgers
            .threads_mut()
            .expire_stale(now, self.settings.thread_expiration);
        summary.expired_threads = expired;
        ledgers.flush().await?;

        let limit = ledgers
            .watermark()
            .candidate_limit(self.settings.first_run_limit);
        let mut candidates = self.mail.list_unread(limit).await?;
        candidates.sort_by_key(|c| c.timestamp);
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }
        let listed = candidates.len();
        let view: &Ledgers = ledgers;
        candidates.retain(|c| {
            view.watermark().admits(c.timestamp) || self.still_unanswered(view, c)
        });
        summary.considered = candidates.len();
        info!(
            provider = self.mail.name(),
            listed,
            candidates = candidates.len(),
            first_run = limit.is_some(),
            "Inbox candidates"
        );

        let admitted: Vec<bool> = candidates
            .iter()
            .map(|c| self.filter.admits(&c.participant))
            .collect();
        let newest = newest_per_thread(&candidates, &admitted);
        let mut dispositions = Vec::with_capacity(candidates.len());
        for (idx, email) in candidates.iter().enumerate() {
            let disposition = if !admitted[idx] {
                Disposition::Ignored
            } else if newest.get(email.thread_id.as_str()) != Some(&idx) {
                Disposition::Superseded
            } else {
                self.handle_reply(ledgers, email).await?
            };
            disposition.tally(
                format!("{} ({})", email.participant, short_id(&email.thread_id)),
                &mut summary,
            );
            dispositions.push(disposition);
        }

        let watermark = ledgers.watermark_mut();
        if let Some(target) = watermark_target(&candidates, &dispositions) {
            watermark.advance_to(target);
        }
        watermark.finish_run(now, listed);
        ledgers.flush().await?;

        info!(
            sent = summary.sent,
            skipped = summary.skipped.len(),
            rejected = summary.rejected,
            deferred = summary.deferred,
            failed = summary.failed.len(),
            "Inbox run finished"
        );
        Ok(summary)
    }

    /// A customer message at or below the global watermark whose thread has
    /// not handled it, e.g. late delivery or an earlier rejection.
    fn still_unanswered(&self, ledgers: &Ledgers, email: &InboundEmail) -> bool {
        self.filter.admits(&email.participant)
            && rules::decide(
                &Action::Reply {
                    thread_id: &email.thread_id,
                    message_id: &email.message_id,
                    received_at: email.timestamp,
                },
                &ledgers.snapshot(),
            ) == Verdict::Allow
    }

    async fn handle_reply(
        &self,
        ledgers: &mut Ledgers,
        email: &InboundEmail,
    ) -> Result<Disposition, StoreError> {
        let thread_id = email.thread_id.as_str();
        let verdict = rules::decide(
            &Action::Reply {
                thread_id,
                message_id: &email.message_id,
                received_at: email.timestamp,
            },
            &ledgers.snapshot(),
        );
        if let Verdict::Skip(reason) = verdict {
            return Ok(Disposition::Skipped(reason));
        }

        let status = ledgers.threads().scheduling_status(thread_id);
        let history = ledgers
            .threads()
            .context_window(thread_id, self.settings.context_messages);
        let context = PromptContext {
            participant: email.participant.clone(),
            customer_message: email.body.clone(),
            history: history.clone(),
            scheduling_status: status,
        };

        let body = match self.llm.generate(&context).await {
            Ok(body) => body,
            Err(e) => {
                error!(thread_id = %short_id(thread_id), error = %e, "Draft generation failed");
                return Ok(Disposition::Failed(e.to_string()));
            }
        };

        let (scheduling, notes) = self.classify_scheduling(ledgers, thread_id, status, email, &body);
        let draft = Draft {
            to: email.participant.clone(),
            subject: reply_subject(&email.subject),
            body,
            context: history,
            notes,
            kind: DraftKind::Reply {
                inbound: email.clone(),
                scheduling,
                status,
            },
        };

        let outcome = self.gate.run(ledgers, &draft).await?;
        if matches!(outcome, GateOutcome::Sent(_))
            && let Err(e) = self.mail.mark_read(&email.message_id).await
        {
            warn!(message_id = %email.message_id, error = %e, "Failed to mark message read");
        }
        Ok(Disposition::from_gate(outcome))
    }

    /// Ledger effect a reply carries, plus operator notes.
    fn classify_scheduling(
        &self,
        ledgers: &Ledgers,
        thread_id: &str,
        status: SchedulingStatus,
        email: &InboundEmail,
        draft_body: &str,
    ) -> (SchedulingEffect, Vec<String>) {
        let mut notes = Vec::new();

        if status == SchedulingStatus::Proposed
            && (self.classifier.detect_confirmation(&email.body)
                || self.classifier.detect_confirmation(draft_body))
        {
            notes.push("Customer accepted the proposed meeting; sending marks it confirmed.".into());
            return (SchedulingEffect::Confirm, notes);
        }

        if !self.classifier.detect_proposal(draft_body) {
            return (SchedulingEffect::None, notes);
        }
        match rules::decide(&Action::ProposeMeeting { thread_id }, &ledgers.snapshot()) {
            Verdict::Allow => {
                notes.push("Draft proposes a meeting; sending marks it proposed.".into());
                (SchedulingEffect::Propose, notes)
            }
            Verdict::Skip(reason) => {
                notes.push(format!(
                    "Draft proposes a meeting but {reason}; scheduling status stays {status}."
                ));
                (SchedulingEffect::None, notes)
            }
            Verdict::Block { reason } => {
                notes.push(format!("Meeting proposal blocked: {reason}"));
                (SchedulingEffect::None, notes)
            }
        }
    }

    /// Send a templated campaign to every customer the dedup rule allows.
    pub async fn send_campaign(
        &self,
        ledgers: &mut Ledgers,
        campaign_id: &str,
        template: &CampaignTemplate,
        customers: &[Customer],
    ) -> Result<RunSummary, Error> {
        let mut summary = RunSummary {
            considered: customers.len(),
            ..RunSummary::default()
        };

        for customer in customers {
            let verdict = rules::decide(
                &Action::MarketingSend {
                    campaign: campaign_id,
                    recipient: &customer.email,
                },
                &ledgers.snapshot(),
            );
            let disposition = match verdict {
                Verdict::Skip(reason) => Disposition::Skipped(reason),
                Verdict::Block { reason } => Disposition::Failed(reason),
                Verdict::Allow => {
                    let draft = self.marketing_draft(campaign_id, template, customer);
                    Disposition::from_gate(self.gate.run(ledgers, &draft).await?)
                }
            };
            disposition.tally(customer.email.clone(), &mut summary);
        }

        info!(
            campaign = campaign_id,
            sent = summary.sent,
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Campaign run finished"
        );
        Ok(summary)
    }

    fn marketing_draft(
        &self,
        campaign_id: &str,
        template: &CampaignTemplate,
        customer: &Customer,
    ) -> Draft {
        let (subject, mut body) = template.render(&customer.name);
        let signature = self.settings.signature.trim();
        if !signature.is_empty() {
            body.push_str("\n\n");
            body.push_str(signature);
        }
        let proposes_meeting = self.classifier.detect_proposal(&body);
        Draft {
            to: customer.mailbox(),
            subject,
            body,
            context: None,
            notes: Vec::new(),
            kind: DraftKind::Marketing {
                campaign: campaign_id.to_string(),
                recipient: customer.email.clone(),
                proposes_meeting,
            },
        }
    }
}

/// Newest timestamp the global watermark may move to: the last handled
/// candidate strictly older than the first unhandled one. Candidates are
/// sorted oldest first.
fn watermark_target(candidates: &[InboundEmail], dispositions: &[Disposition]) -> Option<DateTime<Utc>> {
    let first_unhandled = candidates
        .iter()
        .zip(dispositions)
        .find(|(_, d)| !d.is_handled())
        .map(|(c, _)| c.timestamp);
    candidates
        .iter()
        .zip(dispositions)
        .take_while(|(c, d)| d.is_handled() && first_unhandled.is_none_or(|ts| c.timestamp < ts))
        .map(|(c, _)| c.timestamp)
        .last()
}

/// Index of the newest admitted candidate for each thread.
fn newest_per_thread<'a>(candidates: &'a [InboundEmail], admitted: &[bool]) -> HashMap<&'a str, usize> {
    let mut newest: HashMap<&str, usize> = HashMap::new();
    for (idx, email) in candidates.iter().enumerate() {
        if !admitted[idx] {
            continue;
        }
        let entry = newest.entry(email.thread_id.as_str()).or_insert(idx);
        if candidates[*entry].timestamp <= email.timestamp {
            *entry = idx;
        }
    }
    newest
}
