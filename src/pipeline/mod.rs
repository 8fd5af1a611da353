//! Outbound workflow pipeline.
//!
//! Every candidate flows through:
//! 1. `rules::decide()` — dedup and scheduling rules over a ledger snapshot
//! 2. `CompletionProvider::generate()` or a campaign template — the draft
//! 3. `ApprovalGate::run()` — operator decision, send, ledger commit
//!
//! **No auto-send path exists.** Every outbound message requires approval.

pub mod approval;
pub mod classifier;
pub mod filter;
pub mod orchestrator;
pub mod rules;
pub mod types;

pub use approval::{ApprovalChannel, ApprovalDecision, ApprovalGate, GateOutcome, SendPolicy};
pub use orchestrator::{Orchestrator, OrchestratorDeps, RunSettings, RunSummary};
pub use types::{Draft, DraftKind, InboundEmail, MailProvider, OutboundEmail, SentMessage};
