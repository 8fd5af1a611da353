//! Marketing campaigns: customer list and message templates.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::ledger::Snapshot;
use crate::pipeline::rules::{self, Action};

/// Name used when a customer line has no display name.
pub const DEFAULT_NAME: &str = "Customer";

/// Campaign used when none is configured.
pub const DEFAULT_CAMPAIGN: &str = "youtube_shorts";

static NAMED_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*<(.+?)>$").unwrap());

/// One recipient from the customer list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub name: String,
    /// Lower-cased address.
    pub email: String,
}

impl Customer {
    /// `Name <email>` for the To header.
    pub fn mailbox(&self) -> String {
        if self.name == DEFAULT_NAME {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

/// Parse a customer list: one `Name <email>` or bare `email` per line.
///
/// Blank lines and `#` comments are skipped. Duplicate addresses keep their
/// first entry.
pub fn parse_customer_list(text: &str) -> Vec<Customer> {
    let mut customers: Vec<Customer> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let customer = match NAMED_ADDRESS.captures(line) {
            Some(caps) => Customer {
                name: caps[1].trim().trim_matches('"').to_string(),
                email: caps[2].trim().to_lowercase(),
            },
            None => Customer {
                name: DEFAULT_NAME.to_string(),
                email: line.to_lowercase(),
            },
        };
        if !customer.email.contains('@') {
            warn!(line, "Skipping customer line without an address");
            continue;
        }
        if customers.iter().any(|c| c.email == customer.email) {
            continue;
        }
        customers.push(customer);
    }
    customers
}

/// Read and parse the customer list file.
pub async fn load_customers(path: &Path) -> Result<Vec<Customer>, ConfigError> {
    let text = tokio::fs::read_to_string(path).await?;
    let customers = parse_customer_list(&text);
    info!(path = %path.display(), count = customers.len(), "Customer list loaded");
    Ok(customers)
}

/// Subject and body with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignTemplate {
    pub subject: String,
    pub body: String,
}

impl CampaignTemplate {
    /// `(subject, body)` with `{name}` substituted.
    pub fn render(&self, name: &str) -> (String, String) {
        (
            self.subject.replace("{name}", name),
            self.body.replace("{name}", name),
        )
    }

    /// The built-in YouTube Shorts outreach message.
    pub fn youtube_shorts() -> Self {
        Self {
            subject: "Hi {name} - Transform Your Content Creation with AI 🚀".to_string(),
            body: YOUTUBE_SHORTS_BODY.to_string(),
        }
    }
}

const YOUTUBE_SHORTS_BODY: &str = "Hi {name},

I hope this email finds you well! I wanted to reach out because I've been working on something that I think could really help content creators like yourself.

Have you ever wished you could create engaging YouTube Shorts faster and more efficiently? I've developed YouTube Shorts Auto Generator - an AI-powered tool that helps you:

✨ Generate viral-worthy short videos in minutes
🎯 Optimize content for maximum engagement
🎨 Create eye-catching thumbnails automatically
📊 Analyze trends to stay ahead of the curve
⏰ Save hours of editing time

The best part? It's designed to maintain your unique style while boosting your productivity 10x.

I'd love to show you how it works and discuss how it could fit into your content creation workflow. Would you be interested in a quick 15-minute Zoom demo? I'm confident it could transform the way you create content.

Looking forward to hearing your thoughts!

Warm regards,";

/// Templates keyed by campaign id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateSet {
    templates: BTreeMap<String, CampaignTemplate>,
}

impl TemplateSet {
    /// Just the built-in templates.
    pub fn builtin() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(DEFAULT_CAMPAIGN.to_string(), CampaignTemplate::youtube_shorts());
        Self { templates }
    }

    /// Built-ins overlaid with a JSON file of `{ campaign: {subject, body} }`.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let overrides: TemplateSet = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        let mut set = Self::builtin();
        set.templates.extend(overrides.templates);
        info!(path = %path.display(), campaigns = set.templates.len(), "Templates loaded");
        Ok(set)
    }

    pub fn get(&self, campaign_id: &str) -> Option<&CampaignTemplate> {
        self.templates.get(campaign_id)
    }

    pub fn campaigns(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Customers the dedup rule still allows for `campaign_id`.
pub fn unsent_recipients<'a>(
    campaign_id: &str,
    customers: &'a [Customer],
    ledgers: &Snapshot<'_>,
) -> Vec<&'a Customer> {
    customers
        .iter()
        .filter(|c| {
            rules::decide(
                &Action::MarketingSend {
                    campaign: campaign_id,
                    recipient: &c.email,
                },
                ledgers,
            )
            .is_allow()
        })
        .collect()
}
