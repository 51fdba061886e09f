//! Structural analyzer: complexity metrics and smell detection.
//!
//! Metrics come from the tree-sitter parse when it succeeds. Smell detection
//! is deliberately line/token based and has known blind spots:
//! - strings spanning several lines (docstrings) are scanned as code, so
//!   numbers inside them can be reported as magic numbers;
//! - continuation lines of a bracketed expression that start in column 0 can
//!   be mistaken for module-level assignments;
//! - any module-level assignment to a non-UPPER_CASE name is reported as a
//!   global mutable binding, even if it is never rebound.

use regex::Regex;
use std::sync::OnceLock;

use super::syntax_tree::{parse_python, walk};
use crate::data::{MetricsSnapshot, SmellKind, SmellRecord};

/// Lines longer than this are reported
pub const MAX_LINE_LENGTH: usize = 100;

/// Node kinds that add a decision point
const DECISION_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "for_statement",
    "while_statement",
    "except_clause",
    "conditional_expression",
    "boolean_operator",
    "for_in_clause",
    "if_clause",
    "case_clause",
];

/// Computes metrics for `code` without executing it.
///
/// Never fails: text that does not parse yields a snapshot with
/// `parse_error` set and line-based estimates.
pub fn analyze(code: &str) -> MetricsSnapshot {
    let lines_of_code = count_loc(code);
    let smell_count = find_smells(code).len();

    let tree = parse_python(code);
    let parsed = tree.as_ref().filter(|t| !t.root_node().has_error());

    let (decisions, function_count, class_count, parse_error) = match parsed {
        Some(tree) => {
            let mut decisions = 0;
            let mut functions = 0;
            let mut classes = 0;
            walk(tree.root_node(), &mut |node| match node.kind() {
                "function_definition" => functions += 1,
                "class_definition" => classes += 1,
                kind if DECISION_KINDS.contains(&kind) => decisions += 1,
                _ => {}
            });
            (decisions, functions, classes, false)
        }
        None => {
            let (decisions, functions, classes) = estimate_from_lines(code);
            (decisions, functions, classes, true)
        }
    };

    let cyclomatic_complexity = decisions + function_count;
    MetricsSnapshot {
        cyclomatic_complexity,
        lines_of_code,
        function_count,
        class_count,
        complexity_per_line: cyclomatic_complexity as f64 / lines_of_code.max(1) as f64,
        smell_count,
        parse_error,
    }
}

fn count_loc(code: &str) -> usize {
    code.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count()
}

fn estimate_from_lines(code: &str) -> (usize, usize, usize) {
    let mut decisions = 0;
    let mut functions = 0;
    let mut classes = 0;
    for line in code.lines() {
        let stripped = strip_strings_and_comments(line);
        if def_re().is_match(&stripped) {
            functions += 1;
        }
        if class_re().is_match(&stripped) {
            classes += 1;
        }
        decisions += decision_word_re().find_iter(&stripped).count();
    }
    (decisions, functions, classes)
}

/// Scans `code` for smells, in line order
pub fn find_smells(code: &str) -> Vec<SmellRecord> {
    let mut smells = Vec::new();
    // indentation of each loop whose block is still open
    let mut open_loops: Vec<usize> = Vec::new();

    for (idx, raw) in code.lines().enumerate() {
        let line_no = idx + 1;

        let length = raw.chars().count();
        if length > MAX_LINE_LENGTH {
            smells.push(SmellRecord {
                kind: SmellKind::LongLine,
                line: line_no,
                message: format!("line is {} characters (limit {})", length, MAX_LINE_LENGTH),
            });
        }

        let code_part = strip_strings_and_comments(raw);
        if code_part.trim().is_empty() {
            continue;
        }
        let indent = raw.len() - raw.trim_start().len();

        while open_loops.last().is_some_and(|&open| open >= indent) {
            open_loops.pop();
        }
        if loop_re().is_match(&code_part) {
            let depth = open_loops.len() + 1;
            if depth >= 2 {
                smells.push(SmellRecord {
                    kind: SmellKind::NestedLoop,
                    line: line_no,
                    message: format!("loop nested {} levels deep", depth),
                });
            }
            if code_part.trim_end().ends_with(':') {
                open_loops.push(indent);
            }
        }

        if let Some(name) = global_binding(raw, &code_part, indent) {
            smells.push(SmellRecord {
                kind: SmellKind::GlobalMutable,
                line: line_no,
                message: format!("module-level mutable binding `{}`", name),
            });
        }

        for literal in magic_numbers(&code_part) {
            smells.push(SmellRecord {
                kind: SmellKind::MagicNumber,
                line: line_no,
                message: format!("magic number {}", literal),
            });
        }
    }

    smells
}

fn global_binding(raw: &str, code_part: &str, indent: usize) -> Option<String> {
    if let Some(cap) = global_stmt_re().captures(code_part) {
        return cap.get(1).map(|m| m.as_str().to_string());
    }
    if indent != 0 || raw.starts_with(char::is_whitespace) {
        return None;
    }
    let cap = module_assign_re().captures(code_part)?;
    let name = cap.get(1)?.as_str();
    if ["else", "try", "finally", "lambda", "with", "if", "elif", "while", "for"].contains(&name) {
        return None;
    }
    let is_constant = name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if is_constant || (name.starts_with("__") && name.ends_with("__")) {
        return None;
    }
    Some(name.to_string())
}

fn magic_numbers(code_part: &str) -> Vec<String> {
    let trimmed = code_part.trim_start();
    let conditional = conditional_re().is_match(trimmed) || comparison_re().is_match(code_part);

    let mut found = Vec::new();
    for m in number_re().find_iter(code_part) {
        let before = &code_part[..m.start()];
        let after = &code_part[m.end()..];
        // part of an identifier or a dotted number
        if before
            .chars()
            .last()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            continue;
        }

        let before_trim = before.trim_end();
        let negative = before_trim.ends_with('-')
            && !before_trim[..before_trim.len() - 1]
                .trim_end()
                .chars()
                .last()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == ')' || c == ']');
        let literal = if negative {
            format!("-{}", m.as_str())
        } else {
            m.as_str().to_string()
        };
        let value: f64 = literal.parse().unwrap_or(0.0);
        if value == 0.0 || value == 1.0 || value == -1.0 {
            continue;
        }

        let operand_before = if negative {
            before_trim[..before_trim.len() - 1].trim_end()
        } else {
            before_trim
        };
        let arithmetic = operand_before.ends_with(['+', '-', '*', '/', '%'])
            || operand_before.ends_with("+=")
            || operand_before.ends_with("-=")
            || operand_before.ends_with("*=")
            || operand_before.ends_with("/=")
            || operand_before.ends_with("%=")
            || after.trim_start().starts_with(['+', '-', '*', '/', '%']);

        if conditional || arithmetic {
            found.push(literal);
        }
    }
    found
}

/// Removes string literal contents and trailing comments from one line
fn strip_strings_and_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                    out.push(c);
                }
            }
            None => {
                if c == '#' {
                    break;
                }
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(async\s+)?def\s+\w+").expect("valid regex"))
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*class\s+\w+").expect("valid regex"))
}

fn decision_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(if|elif|for|while|except|and|or|case)\b").expect("valid regex")
    })
}

fn loop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(async\s+)?(for|while)\b").expect("valid regex"))
}

fn global_stmt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*global\s+([A-Za-z_]\w*)").expect("valid regex"))
}

fn module_assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_]\w*)\s*(?::[^=]+)?(?:=|\+=|-=|\*=|/=|\|=|&=)(?:[^=]|$)")
            .expect("valid regex")
    })
}

fn conditional_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(if|elif|while|assert)\b").expect("valid regex"))
}

fn comparison_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"==|!=|<=|>=|<|>").expect("valid regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"))
}
