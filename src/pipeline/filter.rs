//! Inbox filtering: who the auto-responder is allowed to answer.

use std::sync::LazyLock;

use regex::Regex;

static ANGLE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<([^<>]+)>").unwrap());

/// Bare lower-cased address from `Name <addr>` or `addr`.
pub fn extract_address(raw: &str) -> String {
    ANGLE_ADDRESS
        .captures(raw)
        .map_or(raw, |caps| caps.get(1).map_or(raw, |m| m.as_str()))
        .trim()
        .to_lowercase()
}

/// Check if a sender email is in the allowlist.
///
/// - empty list → deny all
/// - `*` in list → allow all
/// - `@example.com` or `example.com` → domain match
/// - `user@example.com` → exact match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = extract_address(email);
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(&email_lower)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

/// Allowlist plus self-loop prevention.
#[derive(Debug, Clone, Default)]
pub struct SenderFilter {
    allowed: Vec<String>,
    own_address: Option<String>,
}

impl SenderFilter {
    pub fn new(allowed: Vec<String>, own_address: Option<&str>) -> Self {
        Self {
            allowed,
            own_address: own_address
                .map(extract_address)
                .filter(|a| !a.is_empty()),
        }
    }

    /// Allow every sender except ourselves.
    pub fn allow_all(own_address: Option<&str>) -> Self {
        Self::new(vec!["*".to_string()], own_address)
    }

    pub fn admits(&self, sender: &str) -> bool {
        let address = extract_address(sender);
        if self.own_address.as_deref() == Some(address.as_str()) {
            return false;
        }
        is_sender_allowed(&self.allowed, &address)
    }
}
