//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::campaign::DEFAULT_CAMPAIGN;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::{RunSettings, SendPolicy};

/// Longest thread expiration window accepted, about a century.
const MAX_THREAD_EXPIRATION_DAYS: i64 = 36_500;

/// Application configuration, read from `MAILPILOT_*` and provider
/// environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the three ledger files.
    pub data_dir: PathBuf,
    pub customer_list: PathBuf,
    pub log_dir: PathBuf,
    /// Candidate cap for the first run that finds unread mail.
    pub first_run_limit: usize,
    pub thread_expiration_days: i64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub min_response_delay: Duration,
    pub max_response_delay: Duration,
    /// Messages of history included in a reply prompt.
    pub context_messages: usize,
    /// Campaign sent from the menu.
    pub campaign: String,
    /// Optional JSON map of extra campaign templates.
    pub templates_file: Option<PathBuf>,
    pub llm_backend: LlmBackend,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub signature: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            customer_list: PathBuf::from("./config/customer_emails.txt"),
            log_dir: PathBuf::from("./logs"),
            first_run_limit: 10,
            thread_expiration_days: 30,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            min_response_delay: Duration::from_secs(30),
            max_response_delay: Duration::from_secs(120),
            context_messages: 10,
            campaign: DEFAULT_CAMPAIGN.to_string(),
            templates_file: None,
            llm_backend: LlmBackend::OpenAi,
            api_key: None,
            model: default_model(LlmBackend::OpenAi).to_string(),
            signature: String::new(),
        }
    }
}

fn default_model(backend: LlmBackend) -> &'static str {
    match backend {
        LlmBackend::OpenAi => "gpt-4o",
        LlmBackend::Anthropic => "claude-sonnet-4-20250514",
    }
}

fn api_key_var(backend: LlmBackend) -> &'static str {
    match backend {
        LlmBackend::OpenAi => "OPENAI_API_KEY",
        LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
    }
}

/// Parse `key` if set, else `default`. Unparseable values are an error.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);

        let llm_backend = match lookup("MAILPILOT_LLM_BACKEND") {
            Some(raw) => raw.parse::<LlmBackend>().map_err(|message| ConfigError::InvalidValue {
                key: "MAILPILOT_LLM_BACKEND".to_string(),
                message,
            })?,
            None => defaults.llm_backend,
        };

        let config = Self {
            data_dir: path("MAILPILOT_DATA_DIR", defaults.data_dir),
            customer_list: path("MAILPILOT_CUSTOMER_LIST", defaults.customer_list),
            log_dir: path("MAILPILOT_LOG_DIR", defaults.log_dir),
            first_run_limit: parse_or(&lookup, "MAILPILOT_FIRST_RUN_LIMIT", defaults.first_run_limit)?,
            thread_expiration_days: parse_or(
                &lookup,
                "MAILPILOT_THREAD_EXPIRATION_DAYS",
                defaults.thread_expiration_days,
            )?,
            max_retries: parse_or(&lookup, "MAILPILOT_MAX_RETRIES", defaults.max_retries)?,
            retry_delay: Duration::from_secs(parse_or(&lookup, "MAILPILOT_RETRY_DELAY_SECS", 1)?),
            min_response_delay: Duration::from_secs(parse_or(
                &lookup,
                "MAILPILOT_MIN_RESPONSE_DELAY_SECS",
                30,
            )?),
            max_response_delay: Duration::from_secs(parse_or(
                &lookup,
                "MAILPILOT_MAX_RESPONSE_DELAY_SECS",
                120,
            )?),
            context_messages: parse_or(&lookup, "MAILPILOT_CONTEXT_MESSAGES", defaults.context_messages)?,
            campaign: lookup("MAILPILOT_CAMPAIGN").unwrap_or(defaults.campaign),
            templates_file: lookup("MAILPILOT_TEMPLATES_FILE").map(PathBuf::from),
            llm_backend,
            api_key: lookup(api_key_var(llm_backend)).map(SecretString::from),
            model: lookup("MAILPILOT_MODEL").unwrap_or_else(|| default_model(llm_backend).to_string()),
            signature: lookup("MAILPILOT_SIGNATURE")
                .or_else(|| lookup("EMAIL_FROM_ADDRESS"))
                .unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILPILOT_MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.first_run_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILPILOT_FIRST_RUN_LIMIT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(1..=MAX_THREAD_EXPIRATION_DAYS).contains(&self.thread_expiration_days) {
            return Err(ConfigError::InvalidValue {
                key: "MAILPILOT_THREAD_EXPIRATION_DAYS".to_string(),
                message: format!("must be between 1 and {MAX_THREAD_EXPIRATION_DAYS}"),
            });
        }
        if self.min_response_delay > self.max_response_delay {
            return Err(ConfigError::InvalidValue {
                key: "MAILPILOT_MIN_RESPONSE_DELAY_SECS".to_string(),
                message: "exceeds MAILPILOT_MAX_RESPONSE_DELAY_SECS".to_string(),
            });
        }
        Ok(())
    }

    pub fn send_policy(&self) -> SendPolicy {
        SendPolicy {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            min_reply_delay: self.min_response_delay,
            max_reply_delay: self.max_response_delay,
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            first_run_limit: self.first_run_limit,
            thread_expiration: chrono::Duration::days(self.thread_expiration_days),
            context_messages: self.context_messages,
            signature: self.signature.clone(),
        }
    }

    /// Completion provider settings. The backend's API key is required.
    pub fn llm_config(&self) -> Result<LlmConfig, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar(api_key_var(self.llm_backend).to_string()))?;
        Ok(LlmConfig {
            backend: self.llm_backend,
            api_key,
            model: self.model.clone(),
            signature: self.signature.clone(),
        })
    }
}
