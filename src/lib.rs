//! MailPilot — approval-gated email auto-responder and campaign sender.

pub mod campaign;
pub mod channels;
pub mod config;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod store;
