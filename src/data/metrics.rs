use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural metrics of a piece of source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricsSnapshot {
    /// Decision points plus one per function
    pub cyclomatic_complexity: usize,
    /// Non-blank, non-comment lines
    pub lines_of_code: usize,
    pub function_count: usize,
    pub class_count: usize,
    pub complexity_per_line: f64,
    pub smell_count: usize,
    /// Set when the text did not parse; counts are then line-based estimates
    pub parse_error: bool,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "complexity: {}, loc: {}, functions: {}, classes: {}, complexity/line: {:.3}, smells: {}{}",
            self.cyclomatic_complexity,
            self.lines_of_code,
            self.function_count,
            self.class_count,
            self.complexity_per_line,
            self.smell_count,
            if self.parse_error { " (parse error)" } else { "" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmellKind {
    LongLine,
    NestedLoop,
    GlobalMutable,
    MagicNumber,
}

impl fmt::Display for SmellKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SmellKind::LongLine => write!(f, "long-line"),
            SmellKind::NestedLoop => write!(f, "nested-loop"),
            SmellKind::GlobalMutable => write!(f, "global-mutable"),
            SmellKind::MagicNumber => write!(f, "magic-number"),
        }
    }
}

/// A code smell found on a specific (1-based) line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmellRecord {
    pub kind: SmellKind,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SmellRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: [{}] {}", self.line, self.kind, self.message)
    }
}
