//! Operator-facing I/O: the mailbox and the console.

pub mod cli;
pub mod email;
pub mod email_types;

pub use cli::{ConsoleApproval, MenuChoice};
pub use email::{EmailConfig, EmailProvider};
pub use email_types::parse_inbound;
