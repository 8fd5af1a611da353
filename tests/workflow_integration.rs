//! End-to-end workflow tests: orchestrator, gate and ledgers over stub
//! mail, completion and approval collaborators with in-memory stores.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use mailpilot::campaign::{Customer, DEFAULT_CAMPAIGN, TemplateSet};
use mailpilot::error::{Error, LlmError, MailError, StoreError};
use mailpilot::ledger::{Ledgers, MarketingLedger, SchedulingStatus, SendStatus, StateStores};
use mailpilot::llm::{CompletionProvider, PromptContext};
use mailpilot::pipeline::filter::SenderFilter;
use mailpilot::pipeline::rules::SkipReason;
use mailpilot::pipeline::{
    ApprovalChannel, ApprovalDecision, Draft, InboundEmail, MailProvider, Orchestrator,
    OrchestratorDeps, OutboundEmail, RunSettings, SendPolicy, SentMessage,
};
use mailpilot::store::MemoryStore;

const OWN_ADDRESS: &str = "me@mine.com";

static BASE: LazyLock<DateTime<Utc>> = LazyLock::new(|| Utc::now() - Duration::days(1));

fn at(minute: i64) -> DateTime<Utc> {
    *BASE + Duration::minutes(minute)
}

fn inbound(thread: &str, id: &str, from: &str, body: &str, minute: i64) -> InboundEmail {
    InboundEmail {
        thread_id: thread.into(),
        message_id: id.into(),
        participant: from.into(),
        subject: "Question".into(),
        body: body.into(),
        timestamp: at(minute),
    }
}

// ── Stubs ───────────────────────────────────────────────────────────

#[derive(Default)]
struct StubMail {
    inbox: Mutex<Vec<InboundEmail>>,
    read: Mutex<Vec<String>>,
    sent: Mutex<Vec<OutboundEmail>>,
    limits: Mutex<Vec<Option<usize>>>,
    failing_sends: AtomicUsize,
}

impl StubMail {
    fn deliver(&self, email: InboundEmail) {
        self.inbox.lock().unwrap().push(email);
    }

    fn fail_next_sends(&self, count: usize) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailProvider for StubMail {
    fn name(&self) -> &str {
        "stub"
    }

    async fn list_unread(&self, limit: Option<usize>) -> Result<Vec<InboundEmail>, MailError> {
        self.limits.lock().unwrap().push(limit);
        let read = self.read.lock().unwrap().clone();
        let mut unread: Vec<InboundEmail> = self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !read.contains(&e.message_id))
            .cloned()
            .collect();
        unread.sort_by_key(|e| e.timestamp);
        if let Some(limit) = limit {
            unread.truncate(limit);
        }
        Ok(unread)
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentMessage, MailError> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(MailError::SendFailed {
                to: email.to.clone(),
                reason: "connection reset".into(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        let message_id = format!("out-{}@mine.com", sent.len());
        Ok(SentMessage {
            thread_id: Some(email.thread_id.clone().unwrap_or_else(|| message_id.clone())),
            message_id,
        })
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailError> {
        self.read.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct StubLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<PromptContext>>,
}

impl StubLlm {
    fn queue(&self, reply: Result<&str, LlmError>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(reply.map(String::from));
    }
}

#[async_trait]
impl CompletionProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub-model"
    }

    async fn generate(&self, context: &PromptContext) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(context.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Thanks for reaching out!".to_string()))
    }
}

/// Answers from a script, approving once the script runs out.
#[derive(Default)]
struct ScriptedApproval {
    answers: Mutex<VecDeque<ApprovalDecision>>,
    presented: Mutex<Vec<Draft>>,
}

impl ScriptedApproval {
    fn script(&self, answers: &[ApprovalDecision]) {
        self.answers.lock().unwrap().extend(answers.iter().copied());
    }

    fn presented_threads(&self) -> Vec<String> {
        self.presented
            .lock()
            .unwrap()
            .iter()
            .filter_map(|d| d.thread_id().map(String::from))
            .collect()
    }
}

#[async_trait]
impl ApprovalChannel for ScriptedApproval {
    async fn present(&self, draft: &Draft) -> ApprovalDecision {
        self.presented.lock().unwrap().push(draft.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ApprovalDecision::Approve)
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    mail: Arc<StubMail>,
    llm: Arc<StubLlm>,
    approval: Arc<ScriptedApproval>,
    marketing_store: Arc<MemoryStore<MarketingLedger>>,
    stores: StateStores,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new() -> Self {
        Self::with_filter(SenderFilter::allow_all(Some(OWN_ADDRESS)))
    }

    fn with_filter(filter: SenderFilter) -> Self {
        let mail = Arc::new(StubMail::default());
        let llm = Arc::new(StubLlm::default());
        let approval = Arc::new(ScriptedApproval::default());
        let marketing_store = Arc::new(MemoryStore::new());
        let stores = StateStores {
            marketing: marketing_store.clone(),
            ..StateStores::in_memory()
        };
        let orchestrator = Orchestrator::new(
            OrchestratorDeps {
                mail: mail.clone(),
                llm: llm.clone(),
                approval: approval.clone(),
            },
            SendPolicy::immediate(),
            filter,
            RunSettings {
                signature: "Sam from MailPilot".into(),
                ..RunSettings::default()
            },
        );
        Self {
            mail,
            llm,
            approval,
            marketing_store,
            stores,
            orchestrator,
        }
    }

    async fn ledgers(&self) -> Ledgers {
        Ledgers::open(self.stores.clone()).await.unwrap()
    }
}

fn jane() -> Vec<Customer> {
    vec![Customer {
        name: "Jane".into(),
        email: "jane@co.com".into(),
    }]
}

// ── Marketing ───────────────────────────────────────────────────────

#[tokio::test]
async fn campaign_sends_each_customer_once_across_restarts() {
    let h = Harness::new();
    let templates = TemplateSet::builtin();
    let template = templates.get(DEFAULT_CAMPAIGN).unwrap();

    let mut ledgers = h.ledgers().await;
    let first = h
        .orchestrator
        .send_campaign(&mut ledgers, DEFAULT_CAMPAIGN, template, &jane())
        .await
        .unwrap();
    assert_eq!(first.sent, 1);
    assert!(ledgers.marketing().has_sent(DEFAULT_CAMPAIGN, "jane@co.com"));

    // The campaign body offers a Zoom demo, so the new thread starts proposed.
    assert_eq!(
        ledgers.threads().scheduling_status("out-1@mine.com"),
        SchedulingStatus::Proposed
    );
    let sent = h.mail.sent();
    assert_eq!(sent[0].to, "Jane <jane@co.com>");
    assert!(sent[0].subject.contains("Hi Jane"));
    assert!(sent[0].body.ends_with("Sam from MailPilot"));
    drop(ledgers);

    // Fresh process over the same stores.
    let mut ledgers = h.ledgers().await;
    let second = h
        .orchestrator
        .send_campaign(&mut ledgers, DEFAULT_CAMPAIGN, template, &jane())
        .await
        .unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(
        second.skipped,
        vec![("jane@co.com".to_string(), SkipReason::AlreadySent)]
    );
    assert_eq!(h.mail.sent().len(), 1);
    assert_eq!(h.approval.presented.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_campaign_send_is_recorded_and_retried_later() {
    let h = Harness::new();
    let templates = TemplateSet::builtin();
    let template = templates.get(DEFAULT_CAMPAIGN).unwrap();
    let mut ledgers = h.ledgers().await;

    h.mail.fail_next_sends(usize::MAX);
    let summary = h
        .orchestrator
        .send_campaign(&mut ledgers, DEFAULT_CAMPAIGN, template, &jane())
        .await
        .unwrap();
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].1.contains("connection reset"));

    let record = ledgers.marketing().get(DEFAULT_CAMPAIGN, "jane@co.com").unwrap();
    assert_eq!(record.status, SendStatus::Failed);
    assert!(!ledgers.marketing().has_sent(DEFAULT_CAMPAIGN, "jane@co.com"));
    assert!(ledgers.threads().is_empty());

    h.mail.fail_next_sends(0);
    let retry = h
        .orchestrator
        .send_campaign(&mut ledgers, DEFAULT_CAMPAIGN, template, &jane())
        .await
        .unwrap();
    assert_eq!(retry.sent, 1);
    let record = ledgers.marketing().get(DEFAULT_CAMPAIGN, "jane@co.com").unwrap();
    assert_eq!(record.status, SendStatus::Sent);
    assert_eq!(record.attempts, 2);
}

#[tokio::test]
async fn unpersisted_send_fails_the_run() {
    let h = Harness::new();
    let templates = TemplateSet::builtin();
    let template = templates.get(DEFAULT_CAMPAIGN).unwrap();
    let mut ledgers = h.ledgers().await;

    h.marketing_store.fail_next_saves(1);
    let result = h
        .orchestrator
        .send_campaign(&mut ledgers, DEFAULT_CAMPAIGN, template, &jane())
        .await;

    assert!(matches!(result, Err(Error::Store(StoreError::Io(_)))));
    assert_eq!(h.mail.sent().len(), 1);
    assert!(h.marketing_store.raw().is_none());
    assert!(ledgers.has_unsaved_changes());

    // The next flush writes the pending record.
    ledgers.flush().await.unwrap();
    let reopened = h.ledgers().await;
    assert!(reopened.marketing().has_sent(DEFAULT_CAMPAIGN, "jane@co.com"));
}

// ── Inbox ───────────────────────────────────────────────────────────

#[tokio::test]
async fn first_run_is_capped_then_watermark_takes_over() {
    let h = Harness::new();
    for i in 0..25 {
        h.mail.deliver(inbound(
            &format!("t{i}@co.com"),
            &format!("m{i}@co.com"),
            &format!("c{i}@co.com"),
            "Tell me more",
            i,
        ));
    }

    let mut ledgers = h.ledgers().await;
    let first = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(first.considered, 10);
    assert_eq!(first.sent, 10);
    assert!(!ledgers.watermark().is_first_run());
    assert_eq!(ledgers.watermark().last_seen_at, Some(at(9)));

    let second = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(second.considered, 15);
    assert_eq!(second.sent, 15);
    assert_eq!(ledgers.watermark().last_seen_at, Some(at(24)));
    assert_eq!(*h.mail.limits.lock().unwrap(), vec![Some(10), None]);
    assert_eq!(h.mail.sent().len(), 25);
}

#[tokio::test]
async fn equal_timestamps_do_not_hide_a_rejected_reply() {
    let h = Harness::new();
    h.mail.deliver(inbound("a@co.com", "m1@co.com", "ann@co.com", "Pricing?", 1));
    h.mail.deliver(inbound("b@co.com", "m2@co.com", "bob@co.com", "Refunds?", 1));
    h.approval
        .script(&[ApprovalDecision::Approve, ApprovalDecision::Reject]);

    let mut ledgers = h.ledgers().await;
    let first = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!((first.sent, first.rejected), (1, 1));
    assert_eq!(ledgers.watermark().last_seen_at, None);

    let second = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(second.considered, 1);
    assert_eq!(second.sent, 1);
    assert_eq!(
        h.approval.presented_threads(),
        vec!["a@co.com", "b@co.com", "b@co.com"]
    );
    assert_eq!(ledgers.watermark().last_seen_at, Some(at(1)));
}

#[tokio::test]
async fn first_run_of_ignored_mail_does_not_starve_customers() {
    let h = Harness::with_filter(SenderFilter::new(
        vec!["jane@co.com".to_string()],
        Some(OWN_ADDRESS),
    ));
    for i in 0..10 {
        h.mail.deliver(inbound(
            &format!("n{i}@letters.com"),
            &format!("n{i}@letters.com"),
            "news@letters.com",
            "This week's deals",
            i,
        ));
    }
    h.mail.deliver(inbound("j@co.com", "j1@co.com", "jane@co.com", "Pricing?", 10));

    let mut ledgers = h.ledgers().await;
    let first = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(first.considered, 10);
    assert_eq!(first.ignored, 10);
    assert_eq!(first.sent, 0);
    assert!(!ledgers.watermark().is_first_run());

    let second = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(second.considered, 1);
    assert_eq!(second.sent, 1);
    assert_eq!(h.mail.sent()[0].to, "jane@co.com");
    assert_eq!(*h.mail.limits.lock().unwrap(), vec![Some(10), None]);
}

#[tokio::test]
async fn late_mail_older_than_watermark_is_still_answered() {
    let h = Harness::new();
    h.mail.deliver(inbound("a@co.com", "a2@co.com", "ann@co.com", "Pricing?", 10));

    let mut ledgers = h.ledgers().await;
    h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(ledgers.watermark().last_seen_at, Some(at(10)));

    // Delivered late into a fresh thread, plus an older note in a thread
    // that has already been answered.
    h.mail.deliver(inbound("b@co.com", "b1@co.com", "bob@co.com", "Refunds?", 5));
    h.mail.deliver(inbound("a@co.com", "a1@co.com", "ann@co.com", "Earlier note", 3));

    let second = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(second.considered, 1);
    assert_eq!(second.sent, 1);
    assert_eq!(h.mail.sent().len(), 2);
    assert_eq!(h.mail.sent()[1].to, "bob@co.com");
    assert!(ledgers.threads().get_context("b@co.com").is_some());
    assert_eq!(ledgers.watermark().last_seen_at, Some(at(10)));
}

#[tokio::test]
async fn rejected_reply_is_presented_again_next_run() {
    let h = Harness::new();
    h.mail.deliver(inbound("a@co.com", "m1@co.com", "ann@co.com", "Pricing?", 1));
    h.mail.deliver(inbound("b@co.com", "m2@co.com", "bob@co.com", "Refunds?", 2));
    h.approval
        .script(&[ApprovalDecision::Reject, ApprovalDecision::Approve]);

    let mut ledgers = h.ledgers().await;
    let first = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(first.rejected, 1);
    assert_eq!(first.sent, 1);
    // Nothing recorded for the rejected thread, and the watermark holds.
    assert!(ledgers.threads().get_context("a@co.com").is_none());
    assert_eq!(ledgers.watermark().last_seen_at, None);

    let second = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(second.sent, 1);
    assert_eq!(
        h.approval.presented_threads(),
        vec!["a@co.com", "b@co.com", "a@co.com"]
    );
    assert_eq!(ledgers.watermark().last_seen_at, Some(at(1)));
}

#[tokio::test]
async fn own_mail_is_ignored_and_older_messages_superseded() {
    let h = Harness::new();
    h.mail.deliver(inbound("x@co.com", "x1@co.com", "jane@co.com", "Hello", 1));
    h.mail.deliver(inbound("x@co.com", "x2@co.com", "jane@co.com", "Also, pricing?", 2));
    h.mail.deliver(inbound("y@mine.com", "y1@mine.com", OWN_ADDRESS, "Sent copy", 3));

    let mut ledgers = h.ledgers().await;
    let summary = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(summary.superseded, 1);
    assert_eq!(summary.ignored, 1);
    assert_eq!(summary.sent, 1);
    assert_eq!(ledgers.watermark().last_seen_at, Some(at(3)));

    let prompts = h.llm.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].customer_message, "Also, pricing?");

    let record = ledgers.threads().get_context("x@co.com").unwrap();
    assert_eq!(record.last_processed_message_id.as_deref(), Some("x2@co.com"));
}

#[tokio::test]
async fn completion_failure_only_affects_its_candidate() {
    let h = Harness::new();
    h.mail.deliver(inbound("a@co.com", "m1@co.com", "ann@co.com", "Pricing?", 1));
    h.mail.deliver(inbound("b@co.com", "m2@co.com", "bob@co.com", "Refunds?", 2));
    h.llm.queue(Err(LlmError::RequestFailed {
        provider: "stub".into(),
        reason: "timeout".into(),
    }));

    let mut ledgers = h.ledgers().await;
    let summary = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].0.starts_with("ann@co.com"));
    assert!(summary.failed[0].1.contains("timeout"));
    assert_eq!(summary.sent, 1);
    assert_eq!(ledgers.watermark().last_seen_at, None);

    // Retried on the next run.
    let retry = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(retry.sent, 1);
    assert!(ledgers.threads().get_context("a@co.com").is_some());
}

#[tokio::test]
async fn meeting_moves_from_proposed_to_confirmed() {
    let h = Harness::new();
    let thread = "deal@co.com";
    let mut ledgers = h.ledgers().await;

    h.mail.deliver(inbound(thread, "d1@co.com", "jane@co.com", "Can you tell me more?", 1));
    h.llm
        .queue(Ok("Would you be interested in a quick Zoom call this week?"));
    h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(
        ledgers.threads().scheduling_status(thread),
        SchedulingStatus::Proposed
    );

    h.mail.deliver(inbound(thread, "d2@co.com", "jane@co.com", "Thursday works for me.", 2));
    h.llm.queue(Ok("Perfect, talk soon."));
    h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(
        ledgers.threads().scheduling_status(thread),
        SchedulingStatus::Confirmed
    );
    assert_eq!(
        h.llm.prompts.lock().unwrap()[1].scheduling_status,
        SchedulingStatus::Proposed
    );

    // A later draft that offers a call is still sent but cannot re-propose.
    h.mail.deliver(inbound(thread, "d3@co.com", "jane@co.com", "One more thing.", 3));
    h.llm.queue(Ok("Happy to set up a call if that helps."));
    let summary = h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(
        ledgers.threads().scheduling_status(thread),
        SchedulingStatus::Confirmed
    );
    let presented = h.approval.presented.lock().unwrap();
    let last = presented.last().unwrap();
    assert!(
        last.notes
            .iter()
            .any(|n| n.contains("scheduling status stays confirmed"))
    );

    let record = ledgers.threads().get_context(thread).unwrap();
    assert_eq!(record.messages.len(), 6);
}

#[tokio::test]
async fn operator_reset_allows_a_new_proposal() {
    let h = Harness::new();
    let thread = "deal@co.com";
    let mut ledgers = h.ledgers().await;

    h.mail.deliver(inbound(thread, "d1@co.com", "jane@co.com", "Interested.", 1));
    h.llm.queue(Ok("Could we schedule a call on Friday?"));
    h.orchestrator.check_inbox(&mut ledgers).await.unwrap();
    assert_eq!(
        ledgers.threads().scheduling_status(thread),
        SchedulingStatus::Proposed
    );

    let resolved = ledgers.threads().resolve_thread_id("deal").map(String::from);
    assert_eq!(resolved.as_deref(), Some(thread));
    assert_eq!(
        ledgers.threads_mut().reset_scheduling(thread),
        Some(SchedulingStatus::Proposed)
    );
    ledgers.flush().await.unwrap();

    let reopened = h.ledgers().await;
    assert_eq!(
        reopened.threads().scheduling_status(thread),
        SchedulingStatus::None
    );
}
