//! Error types for MailPilot.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable state errors.
///
/// `Corrupt` is run-fatal: every dedup guarantee depends on the ledgers
/// having been read intact, so a corrupt file is never overwritten.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Send to {to} failed: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Fetching unread mail failed: {0}")]
    FetchFailed(String),

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Completion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned an empty draft")]
    EmptyResponse { provider: String },
}

/// Ledger invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// An ALLOW path was about to record a send that already exists.
    #[error("Duplicate send would be recorded for {key}")]
    DedupViolation { key: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
