use std::sync::Arc;

use memchr::memmem;

/// Outcome of [`FunctionCallSniffer::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not enough text yet; nothing may be emitted.
    Undecided,
    PlainText,
    FunctionCall,
}

/// Threshold and marker shared by every request.
///
/// GLM tool calls open with the tool name and the deployed tools are named
/// `get_*`. The test is a plain substring match, so prose that mentions the
/// marker early is classified as a call.
#[derive(Debug, Clone)]
pub struct SniffPolicy {
    threshold: usize,
    marker: memmem::Finder<'static>,
}

pub const DEFAULT_THRESHOLD: usize = 7;
pub const DEFAULT_MARKER: &str = "get_";

impl SniffPolicy {
    #[must_use]
    pub fn new(threshold: usize, marker: &str) -> Self {
        Self {
            threshold,
            marker: memmem::Finder::new(marker.as_bytes()).into_owned(),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// More than `threshold` characters are available.
    #[inline]
    #[must_use]
    pub fn past_threshold(&self, text: &str) -> bool {
        text.len() > self.threshold && text.chars().nth(self.threshold).is_some()
    }

    #[inline]
    #[must_use]
    pub fn contains_marker(&self, text: &str) -> bool {
        self.marker.find(text.as_bytes()).is_some()
    }
}

impl Default for SniffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MARKER)
    }
}

/// Per-request classifier. The first decision is final.
#[derive(Debug, Clone)]
pub struct FunctionCallSniffer {
    policy: Arc<SniffPolicy>,
    decision: Option<Classification>,
    evaluations: u32,
}

impl FunctionCallSniffer {
    #[must_use]
    pub fn new(policy: Arc<SniffPolicy>) -> Self {
        Self {
            policy,
            decision: None,
            evaluations: 0,
        }
    }

    /// Classify the cumulative text of the latest step.
    ///
    /// Returns `Undecided` while the text has at most `threshold` characters.
    /// After that the marker is tested once and the result is returned for
    /// every later call without looking at the text again.
    pub fn classify(&mut self, cumulative_text: &str) -> Classification {
        if let Some(decision) = self.decision {
            return decision;
        }
        if !self.policy.past_threshold(cumulative_text) {
            return Classification::Undecided;
        }

        self.evaluations += 1;
        let decision = if self.policy.contains_marker(cumulative_text) {
            Classification::FunctionCall
        } else {
            Classification::PlainText
        };
        self.decision = Some(decision);
        decision
    }

    #[must_use]
    pub fn decision(&self) -> Option<Classification> {
        self.decision
    }

    /// How many times the marker predicate ran. Never more than one.
    #[must_use]
    pub fn evaluations(&self) -> u32 {
        self.evaluations
    }
}
