//! Processing watermark — bounds which inbound messages a run considers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Global inbox watermark.
///
/// Until the first-run cap is consumed, a run considers at most a fixed
/// number of candidates. Afterwards messages newer than `last_seen_at` are
/// considered uncapped; older ones only while their thread still needs an
/// answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingWatermark {
    /// When the last inbox run finished.
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Newest inbound timestamp known to be fully handled.
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_run_cap_consumed: bool,
    /// Actions committed since the process started. Not persisted.
    #[serde(skip)]
    pub processed_count_this_session: u32,
}

impl ProcessingWatermark {
    pub fn is_first_run(&self) -> bool {
        !self.first_run_cap_consumed
    }

    /// Candidate cap for the next run: `Some(cap)` on the first run only.
    pub fn candidate_limit(&self, first_run_cap: usize) -> Option<usize> {
        self.is_first_run().then_some(first_run_cap)
    }

    /// Whether a message received at `received_at` is past the watermark.
    pub fn admits(&self, received_at: DateTime<Utc>) -> bool {
        self.last_seen_at.is_none_or(|w| received_at > w)
    }

    /// Move the watermark forward. Never moves backwards.
    pub fn advance_to(&mut self, received_at: DateTime<Utc>) {
        if self.admits(received_at) {
            self.last_seen_at = Some(received_at);
        }
    }

    pub fn note_committed(&mut self) {
        self.processed_count_this_session += 1;
    }

    /// Close out a run. The first-run cap is consumed by the first run that
    /// listed any candidates, whatever became of them.
    pub fn finish_run(&mut self, now: DateTime<Utc>, listed: usize) {
        self.last_run_at = Some(now);
        if listed > 0 {
            self.first_run_cap_consumed = true;
        }
    }
}
