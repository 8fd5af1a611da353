//! Marketing ledger — per-campaign, per-recipient send records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LedgerError;

/// Delivery outcome of a marketing send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Failed,
}

/// The latest send record for one campaign × recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketingSendRecord {
    pub sent_at: DateTime<Utc>,
    pub status: SendStatus,
    /// Delivery attempts so far, across runs.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Serializes as `{ <campaign_id>: { <recipient>: MarketingSendRecord } }`.
///
/// Campaigns are independent namespaces: a recipient who got one campaign can
/// still receive another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketingLedger {
    campaigns: BTreeMap<String, BTreeMap<String, MarketingSendRecord>>,
}

/// Recipients are keyed case-insensitively.
fn recipient_key(recipient: &str) -> String {
    recipient.trim().to_lowercase()
}

impl MarketingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, campaign_id: &str, recipient: &str) -> Option<&MarketingSendRecord> {
        self.campaigns
            .get(campaign_id)?
            .get(&recipient_key(recipient))
    }

    /// Whether a `SENT` record exists for this campaign × recipient.
    pub fn has_sent(&self, campaign_id: &str, recipient: &str) -> bool {
        self.get(campaign_id, recipient)
            .is_some_and(|r| r.status == SendStatus::Sent)
    }

    /// Record a delivered send.
    ///
    /// Only call once delivery is known to have succeeded. Recording a
    /// second `SENT` for the same key is an invariant violation.
    pub fn record_sent(
        &mut self,
        campaign_id: &str,
        recipient: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.has_sent(campaign_id, recipient) {
            return Err(LedgerError::DedupViolation {
                key: format!("{campaign_id}/{}", recipient_key(recipient)),
            });
        }
        let attempts = self
            .get(campaign_id, recipient)
            .map_or(0, |r| r.attempts);
        self.campaigns
            .entry(campaign_id.to_string())
            .or_default()
            .insert(
                recipient_key(recipient),
                MarketingSendRecord {
                    sent_at: timestamp,
                    status: SendStatus::Sent,
                    attempts: attempts + 1,
                    last_error: None,
                },
            );
        info!(campaign = campaign_id, recipient, "Marketing send recorded");
        Ok(())
    }

    /// Record a failed delivery. Does not block a later retry, and never
    /// downgrades an existing `SENT`.
    pub fn record_failed(
        &mut self,
        campaign_id: &str,
        recipient: &str,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) {
        if self.has_sent(campaign_id, recipient) {
            warn!(
                campaign = campaign_id,
                recipient, "Ignoring failure for a recipient already marked sent"
            );
            return;
        }
        let attempts = self
            .get(campaign_id, recipient)
            .map_or(0, |r| r.attempts);
        self.campaigns
            .entry(campaign_id.to_string())
            .or_default()
            .insert(
                recipient_key(recipient),
                MarketingSendRecord {
                    sent_at: timestamp,
                    status: SendStatus::Failed,
                    attempts: attempts + 1,
                    last_error: Some(reason.to_string()),
                },
            );
        warn!(campaign = campaign_id, recipient, reason, "Marketing send failed");
    }

    /// Number of `SENT` records in a campaign.
    pub fn sent_count(&self, campaign_id: &str) -> usize {
        self.campaigns.get(campaign_id).map_or(0, |c| {
            c.values().filter(|r| r.status == SendStatus::Sent).count()
        })
    }
}
