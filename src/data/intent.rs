use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::request::InputError;

/// The goal a transformation works toward.
///
/// Declaration order is the tie-break order used by [`select_intent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformationIntent {
    Performance,
    Memory,
    Readability,
    Maintainability,
    Security,
    General,
}

impl TransformationIntent {
    /// All intents, in tie-break order
    pub const ALL: [TransformationIntent; 6] = [
        TransformationIntent::Performance,
        TransformationIntent::Memory,
        TransformationIntent::Readability,
        TransformationIntent::Maintainability,
        TransformationIntent::Security,
        TransformationIntent::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationIntent::Performance => "performance",
            TransformationIntent::Memory => "memory",
            TransformationIntent::Readability => "readability",
            TransformationIntent::Maintainability => "maintainability",
            TransformationIntent::Security => "security",
            TransformationIntent::General => "general",
        }
    }

    /// Keywords that vote for this intent when scoring free text.
    ///
    /// Matching is substring-based on the lowercased text, so stems like
    /// `optimi` cover both "optimise" and "optimize".
    pub fn vocabulary(&self) -> &'static [&'static str] {
        match self {
            TransformationIntent::Performance => &[
                "faster", "speed", "efficient", "performance", "fast", "quick", "slow",
                "optimi", "latency", "throughput", "loop", "built-in", "builtin", "vectori",
                "complexity o(",
            ],
            TransformationIntent::Memory => &[
                "memory", "generator", "leak", "allocat", "footprint", "lazy",
                "iterator", "yield", "copies",
            ],
            TransformationIntent::Readability => &[
                "readable", "readability", "clean", "clarity", "clear", "naming", "rename",
                "simplif", "pythonic", "docstring", "comment", "understand",
            ],
            TransformationIntent::Maintainability => &[
                "maintain", "modular", "refactor", "extract", "duplicat", "reuse", "testab",
                "decouple", "structure", "helper function",
            ],
            TransformationIntent::Security => &[
                "secur", "vulnerab", "injection", "sanitiz", "sanitis", "unsafe", "password",
                "secret", "eval(", "exploit",
            ],
            TransformationIntent::General => &[],
        }
    }

    /// Number of vocabulary hits in `text`
    pub fn score(&self, text: &str) -> usize {
        let lowered = text.to_lowercase();
        self.vocabulary()
            .iter()
            .filter(|keyword| lowered.contains(*keyword))
            .count()
    }
}

impl fmt::Display for TransformationIntent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransformationIntent {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransformationIntent::ALL
            .iter()
            .copied()
            .find(|intent| intent.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| InputError::UnknownIntent(s.to_string()))
    }
}

/// Infers the intent of a natural-language query by keyword scoring.
///
/// Total and deterministic: the highest-scoring intent wins, ties go to the
/// earlier intent in [`TransformationIntent::ALL`], and no match at all
/// yields `General`.
pub fn select_intent(query: &str) -> TransformationIntent {
    let mut best = TransformationIntent::General;
    let mut best_score = 0;
    for intent in TransformationIntent::ALL {
        let score = intent.score(query);
        if score > best_score {
            best = intent;
            best_score = score;
        }
    }
    best
}

/// Picks the category for a described change.
///
/// Falls back to `active` when nothing matches or when `active` ties with
/// the best match.
pub fn categorize(description: &str, active: TransformationIntent) -> TransformationIntent {
    let active_score = active.score(description);
    let best = select_intent(description);
    if best.score(description) > active_score {
        best
    } else {
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_intent_keywords() {
        assert_eq!(select_intent("make it faster"), TransformationIntent::Performance);
        assert_eq!(select_intent("use a generator to save memory"), TransformationIntent::Memory);
        assert_eq!(select_intent("more readable please"), TransformationIntent::Readability);
        assert_eq!(select_intent("refactor into modular pieces"), TransformationIntent::Maintainability);
        assert_eq!(select_intent("avoid sql injection"), TransformationIntent::Security);
    }

    #[test]
    fn test_select_intent_no_match_is_general() {
        assert_eq!(select_intent("do something"), TransformationIntent::General);
        assert_eq!(select_intent(""), TransformationIntent::General);
    }

    #[test]
    fn test_select_intent_tie_break_prefers_performance() {
        // one performance hit ("speed"), one memory hit ("memory")
        assert_eq!(select_intent("speed and memory"), TransformationIntent::Performance);
        // one memory hit, one readability hit
        assert_eq!(select_intent("memory but clean"), TransformationIntent::Memory);
    }

    #[test]
    fn test_select_intent_is_deterministic() {
        let query = "make this loop faster and cleaner";
        let first = select_intent(query);
        for _ in 0..10 {
            assert_eq!(select_intent(query), first);
        }
    }

    #[test]
    fn test_categorize_prefers_active_on_tie() {
        assert_eq!(
            categorize("tidied things up", TransformationIntent::Security),
            TransformationIntent::Security
        );
        assert_eq!(
            categorize("replaced loop with built-in sum", TransformationIntent::General),
            TransformationIntent::Performance
        );
    }

    #[test]
    fn test_intent_from_str() {
        assert_eq!("Memory".parse::<TransformationIntent>().unwrap(), TransformationIntent::Memory);
        assert!("speedy".parse::<TransformationIntent>().is_err());
    }
}
