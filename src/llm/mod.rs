//! Completion provider for reply drafts.
//!
//! Supports:
//! - **OpenAI**: Direct API access via rig-core
//! - **Anthropic**: Direct API access via rig-core
//!
//! The orchestrator only sees the `CompletionProvider` trait; `RigCompletion`
//! bridges a rig agent to it.

pub mod prompt;

pub use prompt::{PromptContext, SYSTEM_PROMPT, system_prompt};

use std::sync::Arc;

use async_trait::async_trait;
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Sampling temperature for drafts.
pub const TEMPERATURE: f64 = 0.7;
/// Upper bound on draft length.
pub const MAX_TOKENS: u64 = 500;

/// Draft generation capability. Stateless: every call carries its own
/// context.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce a reply body. An empty draft is an error.
    async fn generate(&self, context: &PromptContext) -> Result<String, LlmError>;
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

impl std::str::FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown LLM backend '{other}'")),
        }
    }
}

/// Configuration for creating a completion provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Appended to the system prompt.
    pub signature: String,
}

/// Create a completion provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, LlmError> {
    match config.backend {
        LlmBackend::OpenAi => create_openai_provider(config),
        LlmBackend::Anthropic => create_anthropic_provider(config),
    }
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(&system_prompt(&config.signature))
        .temperature(TEMPERATURE)
        .max_tokens(MAX_TOKENS)
        .build();
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigCompletion::new(agent, "openai", &config.model)))
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(&system_prompt(&config.signature))
        .temperature(TEMPERATURE)
        .max_tokens(MAX_TOKENS)
        .build();
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigCompletion::new(agent, "anthropic", &config.model)))
}

/// A rig agent with the sales persona baked into its preamble.
pub struct RigCompletion<M: CompletionModel> {
    agent: Agent<M>,
    provider: &'static str,
    model: String,
}

impl<M: CompletionModel> RigCompletion<M> {
    pub fn new(agent: Agent<M>, provider: &'static str, model: &str) -> Self {
        Self {
            agent,
            provider,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl<M> CompletionProvider for RigCompletion<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, context: &PromptContext) -> Result<String, LlmError> {
        let prompt = context.render();
        let reply = self
            .agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: self.provider.to_string(),
            });
        }
        tracing::debug!(provider = self.provider, chars = reply.len(), "Draft generated");
        Ok(reply.to_string())
    }
}
