use serde::{Deserialize, Serialize};
use std::fmt;

/// Rough weight of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactTier {
    High,
    Medium,
    Low,
}

impl ImpactTier {
    /// Guesses a tier from words in a change description
    pub fn infer(description: &str) -> Option<ImpactTier> {
        let lowered = description.to_lowercase();
        let high = ["significant", "major", "o(n", "quadratic", "vulnerab", "critical", "rewr"];
        let low = ["minor", "rename", "style", "whitespace", "typo", "comment", "format"];
        if high.iter().any(|k| lowered.contains(k)) {
            Some(ImpactTier::High)
        } else if low.iter().any(|k| lowered.contains(k)) {
            Some(ImpactTier::Low)
        } else {
            None
        }
    }
}

impl fmt::Display for ImpactTier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ImpactTier::High => write!(f, "high"),
            ImpactTier::Medium => write!(f, "medium"),
            ImpactTier::Low => write!(f, "low"),
        }
    }
}

/// Inclusive, 1-based line span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

/// One discrete, described edit between two code versions.
///
/// Produced by the response parser or the pattern patcher and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub category: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<LineRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactTier>,
}

impl ChangeRecord {
    pub fn new(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
            lines: None,
            before: None,
            after: None,
            impact: None,
        }
    }

    pub fn with_lines(mut self, lines: LineRange) -> Self {
        self.lines = Some(lines);
        self
    }

    pub fn with_snippets(mut self, before: Option<String>, after: Option<String>) -> Self {
        self.before = before;
        self.after = after;
        self
    }

    pub fn with_impact(mut self, impact: Option<ImpactTier>) -> Self {
        self.impact = impact;
        self
    }

    /// True when the `after` snippet (if any) occurs in `code`
    pub fn consistent_with(&self, code: &str) -> bool {
        match &self.after {
            Some(after) => code.contains(after.as_str()),
            None => true,
        }
    }
}

/// Span of lines in `candidate` that differ from `previous`.
///
/// Computed by trimming the common prefix and suffix of the two line lists;
/// `None` when the texts have identical lines. A pure deletion reports the
/// line the deletion happened at.
pub fn changed_lines(previous: &str, candidate: &str) -> Option<LineRange> {
    let old: Vec<&str> = previous.lines().collect();
    let new: Vec<&str> = candidate.lines().collect();
    if old == new {
        return None;
    }

    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    // a pure trailing deletion points at the last remaining line
    let last = new.len().max(1);
    let start = (prefix + 1).min(last);
    let end = (new.len() - suffix).clamp(start, last);
    Some(LineRange { start, end })
}
