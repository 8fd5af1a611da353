//! Prompt assembly for reply drafts.

use crate::ledger::SchedulingStatus;

/// Sales persona for reply drafts.
pub const SYSTEM_PROMPT: &str = "You are a professional sales representative for YouTube Shorts Auto Generator.
Keep responses concise, friendly, and focused on scheduling a Zoom demo.
Always maintain a helpful and enthusiastic tone.
Address the customer by name when possible.
If they express interest, provide a specific time suggestion for the Zoom meeting.";

/// System prompt with the signature instruction appended.
pub fn system_prompt(signature: &str) -> String {
    let signature = signature.trim();
    if signature.is_empty() {
        return SYSTEM_PROMPT.to_string();
    }
    format!("{SYSTEM_PROMPT}\n\nAlways sign emails with:\n{signature}")
}

/// Everything the completion provider sees for one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub participant: String,
    /// Newest customer message, quotes stripped.
    pub customer_message: String,
    /// Formatted window of earlier messages, oldest first.
    pub history: Option<String>,
    pub scheduling_status: SchedulingStatus,
}

impl PromptContext {
    /// User prompt text.
    pub fn render(&self) -> String {
        let mut prompt = format!(
            "Customer: {}\n\nCurrent Customer Message:\n{}\n\n",
            self.participant,
            self.customer_message.trim()
        );
        if let Some(history) = self.history.as_deref().filter(|h| !h.trim().is_empty()) {
            prompt.push_str("Conversation History:\n");
            prompt.push_str(history);
            prompt.push_str("\n\n");
        }
        prompt.push_str(scheduling_instruction(self.scheduling_status));
        prompt.push_str("\n\nWrite a professional and personalized email response below:");
        prompt
    }
}

fn scheduling_instruction(status: SchedulingStatus) -> &'static str {
    match status {
        SchedulingStatus::None => {
            "Meeting status: no meeting proposed yet. You may suggest a specific time for a Zoom demo."
        }
        SchedulingStatus::Proposed => {
            "Meeting status: a Zoom demo has already been proposed and awaits the customer's answer. \
             Do not propose a new meeting. If the customer accepts, confirm the time."
        }
        SchedulingStatus::Confirmed => {
            "Meeting status: a Zoom demo is already confirmed. Do not propose another meeting."
        }
    }
}
