//! Scheduling classifier — phrase matching over message text.
//!
//! A heuristic, not language understanding: expect both false positives and
//! false negatives. A wrong confirmation is undone with an operator reset.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

static DEFAULT: LazyLock<SchedulingClassifier> = LazyLock::new(SchedulingClassifier::default_rules);

/// Affirmative scheduling language, using the built-in phrase table.
pub fn detect_confirmation(text: &str) -> bool {
    DEFAULT.detect_confirmation(text)
}

/// Whether text offers a call, demo, or meeting, using the built-in table.
pub fn detect_proposal(text: &str) -> bool {
    DEFAULT.detect_proposal(text)
}

/// Case-insensitive phrase tables for confirmation and proposal.
pub struct SchedulingClassifier {
    confirmations: Vec<Regex>,
    proposals: Vec<Regex>,
    /// Phrases that cancel a confirmation ("that time doesn't work").
    negations: Vec<Regex>,
}

impl SchedulingClassifier {
    /// Built-in phrase tables.
    pub fn default_rules() -> Self {
        let confirmations = [
            // outgoing confirmations
            r"(?i)zoom meeting (is )?(scheduled|confirmed)",
            r"(?i)calendar invite (sent|is on its way)",
            r"(?i)meeting (is )?confirmed",
            r"(?i)see you on zoom",
            r"(?i)zoom link:",
            r"(?i)meeting id:",
            r"(?i)join zoom meeting",
            r"(?i)(i|we) have scheduled our (zoom )?(call|meeting|demo)",
            // customer acceptance
            r"(?i)\b(that|this|the) (time|slot|day) works\b",
            r"(?i)\bworks (for|with) me\b",
            r"(?i)\bsee you (then|there|on (mon|tues|wednes|thurs|fri|satur|sun)day)\b",
            r"(?i)\bi'?ll be there\b",
            r"(?i)\b(booked|confirmed) (it|the (call|meeting|demo))\b",
            r"(?i)\blooking forward to (the|our) (call|meeting|demo|chat)\b",
        ];
        let proposals = [
            r"(?i)\b(zoom|video) (demo|call|meeting)\b",
            r"(?i)\bquick (\d+[- ]minute )?(call|demo|chat|meeting)\b",
            r"(?i)\bschedule (a|an|our) (call|demo|meeting|chat)\b",
            r"(?i)\bset up (a|an) (call|demo|meeting)\b",
            r"(?i)\bwould you be (interested in|available for|open to) (a|an)\b",
            r"(?i)\bdoes (\w+ )+work for you\?",
            r"(?i)\bare you (free|available) (on|at|this|next|tomorrow)\b",
        ];
        let negations = [
            r"(?i)\b(doesn'?t|does not|won'?t|will not) work\b",
            r"(?i)\b(can'?t|cannot|unable to) (make|attend|join)\b",
            r"(?i)\bnot (available|free|interested)\b",
            r"(?i)\b(cancel|reschedule)\b",
        ];
        Self {
            // Constant patterns; unwrap is on compile-time strings.
            confirmations: confirmations.iter().map(|p| Regex::new(p).unwrap()).collect(),
            proposals: proposals.iter().map(|p| Regex::new(p).unwrap()).collect(),
            negations: negations.iter().map(|p| Regex::new(p).unwrap()).collect(),
        }
    }

    /// No phrases; matches nothing until rules are added.
    pub fn empty() -> Self {
        Self {
            confirmations: Vec::new(),
            proposals: Vec::new(),
            negations: Vec::new(),
        }
    }

    pub fn add_confirmation(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.confirmations.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn add_proposal(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.proposals.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn add_negation(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.negations.push(Regex::new(pattern)?);
        Ok(())
    }

    /// Affirmative scheduling language not cancelled by a negation.
    pub fn detect_confirmation(&self, text: &str) -> bool {
        let Some(hit) = self.confirmations.iter().find(|r| r.is_match(text)) else {
            return false;
        };
        if self.negations.iter().any(|r| r.is_match(text)) {
            debug!(pattern = hit.as_str(), "Confirmation cancelled by negation");
            return false;
        }
        debug!(pattern = hit.as_str(), "Confirmation detected");
        true
    }

    pub fn detect_proposal(&self, text: &str) -> bool {
        self.proposals.iter().any(|r| r.is_match(text))
    }
}

impl Default for SchedulingClassifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_positive() {
        for text in [
            "Zoom meeting scheduled for tomorrow",
            "The zoom meeting is confirmed",
            "I have scheduled our Zoom call",
            "See you on Zoom!",
            "ZOOM MEETING CONFIRMED",
            "Thursday at 3pm works for me.",
            "Great, that time works. See you then!",
        ] {
            assert!(detect_confirmation(text), "expected confirmation: {text}");
        }
    }

    #[test]
    fn confirmation_negative() {
        for text in [
            "Let me schedule a meeting",
            "Can we have a zoom call?",
            "Zoom would be great",
            "Thanks for the info.",
            "Unfortunately Thursday doesn't work, see you then is not possible",
            "I can't make it, sorry. Works for me to reschedule next week.",
        ] {
            assert!(!detect_confirmation(text), "unexpected confirmation: {text}");
        }
    }

    #[test]
    fn proposal_detection() {
        assert!(detect_proposal(
            "Would you be interested in a quick 15-minute Zoom demo?"
        ));
        assert!(detect_proposal("Does Tuesday at 2pm work for you?"));
        assert!(detect_proposal("Happy to schedule a call whenever suits."));
        assert!(!detect_proposal("Thanks for getting back to me, here is the pricing."));
    }

    #[test]
    fn empty_matches_nothing() {
        let classifier = SchedulingClassifier::empty();
        assert!(!classifier.detect_confirmation("meeting confirmed"));
        assert!(!classifier.detect_proposal("zoom demo"));
    }

    #[test]
    fn custom_rules() {
        let mut classifier = SchedulingClassifier::empty();
        classifier.add_confirmation(r"(?i)\bjusqu'à jeudi\b").unwrap();
        classifier.add_proposal(r"(?i)\bcoffee chat\b").unwrap();
        classifier.add_negation(r"(?i)\bpas\b").unwrap();

        assert!(classifier.detect_confirmation("Jusqu'à jeudi !"));
        assert!(!classifier.detect_confirmation("pas jusqu'à jeudi"));
        assert!(classifier.detect_proposal("Fancy a coffee chat?"));
        assert!(classifier.add_proposal("(unclosed").is_err());
    }
}
