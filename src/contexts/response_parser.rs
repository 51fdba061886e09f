//! Extracts candidate code and change records from a free-text reply.
//!
//! Every input is accepted. Malformed replies degrade to fewer extracted
//! changes or to `no_code_found`; nothing here returns an error or panics.

use regex::Regex;
use std::sync::OnceLock;

use crate::data::{categorize, ChangeRecord, ImpactTier, TransformationIntent};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub code: String,
    pub changes: Vec<ChangeRecord>,
    /// Set when neither a fenced block nor code-like text was found
    pub no_code_found: bool,
}

impl ParsedResponse {
    fn empty() -> Self {
        Self {
            code: String::new(),
            changes: Vec::new(),
            no_code_found: true,
        }
    }
}

/// Splits a reply into code and described changes.
///
/// The first fenced block using the dominant fence marker is the code; an
/// unclosed fence runs to the end of the reply. Without any fence the whole
/// reply is taken as code only when it looks like code.
pub fn parse(raw: &str, intent: TransformationIntent) -> ParsedResponse {
    let lines: Vec<&str> = raw.lines().collect();
    let marker = dominant_fence(&lines);

    let (code, narrative) = match marker.and_then(|m| fenced_span(&lines, m)) {
        Some((open, close)) => {
            let code = lines[open + 1..close].join("\n");
            let mut narrative: Vec<&str> = lines[..open].to_vec();
            if close < lines.len() {
                narrative.extend_from_slice(&lines[close + 1..]);
            }
            (code, narrative)
        }
        None if looks_like_code(&lines) => (raw.trim().to_string(), Vec::new()),
        None => return ParsedResponse::empty(),
    };

    if code.trim().is_empty() {
        return ParsedResponse::empty();
    }

    ParsedResponse {
        code,
        changes: extract_changes(&narrative, intent),
        no_code_found: false,
    }
}

/// Change records from bullet lines and `change:` / `fix:` lines
pub fn extract_changes(narrative: &[&str], intent: TransformationIntent) -> Vec<ChangeRecord> {
    let mut changes: Vec<ChangeRecord> = Vec::new();
    for line in narrative {
        let Some(description) = change_description(line) else {
            continue;
        };
        if changes.iter().any(|c| c.description == description) {
            continue;
        }
        let (before, after) = snippets(&description);
        let category = categorize(&description, intent);
        changes.push(
            ChangeRecord::new(category.as_str(), description.clone())
                .with_snippets(before, after)
                .with_impact(ImpactTier::infer(&description)),
        );
    }
    changes
}

fn change_description(line: &str) -> Option<String> {
    let captured = bullet_re()
        .captures(line)
        .or_else(|| prefix_re().captures(line))?;
    let text = captured.get(1)?.as_str().trim();
    let text = text.trim_matches('*').trim();
    // headings such as "- Changes:" describe nothing
    if text.is_empty() || (text.ends_with(':') && !text.contains(' ')) {
        return None;
    }
    Some(text.to_string())
}

/// `before`/`after` snippets from "`a` -> `b`" style descriptions
fn snippets(description: &str) -> (Option<String>, Option<String>) {
    let spans: Vec<regex::Match> = backtick_re().find_iter(description).collect();
    if spans.len() < 2 {
        return (None, None);
    }
    let between = description[spans[0].end()..spans[1].start()].to_lowercase();
    let joined = ["->", "→", "=>", " with ", " to ", " by ", " into "]
        .iter()
        .any(|j| between.contains(j));
    if !joined {
        return (None, None);
    }
    let strip = |m: &regex::Match| m.as_str().trim_matches('`').to_string();
    (Some(strip(&spans[0])), Some(strip(&spans[1])))
}

/// "```" or "~~~", whichever opens more lines; `None` without fences
fn dominant_fence(lines: &[&str]) -> Option<&'static str> {
    let count = |marker: &str| {
        lines
            .iter()
            .filter(|l| l.trim_start().starts_with(marker))
            .count()
    };
    let backticks = count("```");
    let tildes = count("~~~");
    match (backticks, tildes) {
        (0, 0) => None,
        (b, t) if t > b => Some("~~~"),
        _ => Some("```"),
    }
}

/// Indices of the opening fence line and the closing fence line (or
/// `lines.len()` when the block is never closed)
fn fenced_span(lines: &[&str], marker: &str) -> Option<(usize, usize)> {
    let open = lines
        .iter()
        .position(|l| l.trim_start().starts_with(marker))?;
    let marker_char = marker.chars().next()?;
    let close = lines[open + 1..]
        .iter()
        .position(|l| {
            let trimmed = l.trim();
            trimmed.starts_with(marker) && trimmed.chars().all(|c| c == marker_char)
        })
        .map(|i| open + 1 + i)
        .unwrap_or(lines.len());
    Some((open, close))
}

fn looks_like_code(lines: &[&str]) -> bool {
    lines.iter().any(|l| block_opening_re().is_match(l))
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*•+]|\d+[.)])\s+(.+)$").expect("valid regex"))
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:change|changed|fix|fixed)\s*:\s*(.+)$").expect("valid regex")
    })
}

fn backtick_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`[^`]+`").expect("valid regex"))
}

fn block_opening_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?:async\s+)?def\s+\w+\s*\(|class\s+\w+\s*[(:]|(?:if|elif|for|while|with|try|except|else)\b.*:\s*$)",
        )
        .expect("valid regex")
    })
}
