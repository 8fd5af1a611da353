//! Console channel — stdin/stdout operator menu and approval prompt.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::ledger::thread::short_id;
use crate::ledger::ThreadSummary;
use crate::pipeline::{ApprovalChannel, ApprovalDecision, Draft, RunSummary};

/// Top-level menu choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    SendMarketing,
    CheckInbox,
    ViewThreads,
    ResetScheduling,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::SendMarketing),
            "2" => Some(Self::CheckInbox),
            "3" => Some(Self::ViewThreads),
            "4" => Some(Self::ResetScheduling),
            "5" | "q" | "quit" | "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// Operator answer to an approval prompt. `None` means "ask again".
pub fn parse_decision(input: &str) -> Option<ApprovalDecision> {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(ApprovalDecision::Approve),
        "n" | "no" => Some(ApprovalDecision::Reject),
        "s" | "skip" => Some(ApprovalDecision::Defer),
        _ => None,
    }
}

/// Render a draft the way the operator sees it.
pub fn render_draft(draft: &Draft) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n──── {} ────\n", draft.label()));
    out.push_str(&format!("To:      {}\n", draft.to));
    out.push_str(&format!("Subject: {}\n", draft.subject));
    if let Some(thread) = draft.thread_id() {
        out.push_str(&format!("Thread:  {}\n", short_id(thread)));
    }
    if let Some(context) = &draft.context {
        out.push_str("\nContext:\n");
        out.push_str(context);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&draft.body);
    out.push('\n');
    for note in &draft.notes {
        out.push_str(&format!("\n[note] {note}\n"));
    }
    out
}

/// Stdin-backed operator console.
pub struct ConsoleApproval {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleApproval {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Print `prompt` and read one trimmed line. `None` on EOF.
    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        eprint!("{prompt}");
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Error reading stdin: {}", e);
                None
            }
        }
    }

    /// Show the menu and wait for a valid choice. EOF exits.
    pub async fn menu(&self) -> MenuChoice {
        loop {
            eprintln!("\n1. Send marketing emails");
            eprintln!("2. Check inbox");
            eprintln!("3. View active threads");
            eprintln!("4. Reset scheduling for a thread");
            eprintln!("5. Exit");
            let Some(line) = self.read_line("> ").await else {
                return MenuChoice::Exit;
            };
            match MenuChoice::parse(&line) {
                Some(choice) => return choice,
                None => eprintln!("Invalid choice: {line}"),
            }
        }
    }
}

impl Default for ConsoleApproval {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalChannel for ConsoleApproval {
    async fn present(&self, draft: &Draft) -> ApprovalDecision {
        println!("{}", render_draft(draft));
        loop {
            let Some(line) = self.read_line("Send? [y]es / [n]o / [s]kip: ").await else {
                return ApprovalDecision::Defer;
            };
            if let Some(decision) = parse_decision(&line) {
                return decision;
            }
            eprintln!("Please answer y, n or s.");
        }
    }
}

/// Table of active threads.
pub fn render_threads(threads: &[ThreadSummary]) -> String {
    if threads.is_empty() {
        return "No active threads.".to_string();
    }
    let mut out = String::new();
    for t in threads {
        out.push_str(&format!(
            "{:<12} {:<32} {:>3} msgs  {:<9}{}  last {}\n",
            short_id(&t.thread_id),
            t.participant,
            t.message_count,
            t.scheduling_status.to_string(),
            if t.is_marketing_thread { " [mkt]" } else { "" },
            t.last_activity.format("%Y-%m-%d %H:%M"),
        ));
    }
    out
}

pub fn print_summary(title: &str, summary: &RunSummary) {
    println!("\n{title}\n{summary}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::DEFAULT_CAMPAIGN;
    use crate::ledger::SchedulingStatus;
    use crate::pipeline::DraftKind;
    use chrono::Utc;

    #[test]
    fn decision_answers() {
        assert_eq!(parse_decision("y"), Some(ApprovalDecision::Approve));
        assert_eq!(parse_decision(" YES "), Some(ApprovalDecision::Approve));
        assert_eq!(parse_decision("n"), Some(ApprovalDecision::Reject));
        assert_eq!(parse_decision("skip"), Some(ApprovalDecision::Defer));
        assert_eq!(parse_decision("maybe"), None);
        assert_eq!(parse_decision(""), None);
    }

    #[test]
    fn menu_choices() {
        assert_eq!(MenuChoice::parse("1"), Some(MenuChoice::SendMarketing));
        assert_eq!(MenuChoice::parse(" 4 "), Some(MenuChoice::ResetScheduling));
        assert_eq!(MenuChoice::parse("quit"), Some(MenuChoice::Exit));
        assert_eq!(MenuChoice::parse("9"), None);
    }

    #[test]
    fn draft_rendering_includes_notes() {
        let draft = Draft {
            to: "jane@co.com".into(),
            subject: "Hi Jane".into(),
            body: "Let's talk.".into(),
            context: None,
            notes: vec!["Draft proposes a meeting".into()],
            kind: DraftKind::Marketing {
                campaign: DEFAULT_CAMPAIGN.into(),
                recipient: "jane@co.com".into(),
                proposes_meeting: true,
            },
        };
        let text = render_draft(&draft);
        assert!(text.contains("To:      jane@co.com"));
        assert!(text.contains("Let's talk."));
        assert!(text.contains("[note] Draft proposes a meeting"));
        assert!(!text.contains("Thread:"));
    }

    #[test]
    fn thread_table() {
        assert_eq!(render_threads(&[]), "No active threads.");
        let now = Utc::now();
        let row = ThreadSummary {
            thread_id: "abcdef1234567890@co.com".into(),
            participant: "jane@co.com".into(),
            message_count: 3,
            scheduling_status: SchedulingStatus::Proposed,
            is_marketing_thread: true,
            created_at: now,
            last_activity: now,
        };
        let text = render_threads(&[row]);
        assert!(text.contains("jane@co.com"));
        assert!(text.contains("[mkt]"));
    }
}
