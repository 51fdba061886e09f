//! Deterministic, text-level patches for a small set of runtime errors.
//!
//! Each strategy rewrites a single line. A patch that would turn valid code
//! into invalid code is withheld and reported as `NoDeterministicFix`.

use regex::Regex;
use std::sync::OnceLock;

use super::validator::validate_syntax;
use crate::data::{ChangeRecord, ErrorContext, ErrorKind, ImpactTier, LineRange};

/// Category given to change records produced by the patcher
pub const PATCH_CATEGORY: &str = "debugging";

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    Patched { code: String, change: ChangeRecord },
    NoDeterministicFix { reason: String },
}

impl PatchOutcome {
    pub fn is_patched(&self) -> bool {
        matches!(self, PatchOutcome::Patched { .. })
    }

    fn none(reason: impl Into<String>) -> Self {
        PatchOutcome::NoDeterministicFix {
            reason: reason.into(),
        }
    }
}

/// Applies the fix strategy for `ctx.kind` to `code`
pub fn patch(code: &str, ctx: &ErrorContext) -> PatchOutcome {
    let lines: Vec<&str> = code.lines().collect();
    let outcome = match &ctx.kind {
        ErrorKind::UndefinedName => declare_placeholder(&lines, ctx),
        ErrorKind::DivisionByZero => guard_division(&lines, ctx),
        ErrorKind::IndexOutOfRange => guard_index(&lines, ctx),
        ErrorKind::MissingAttribute => guard_attribute(&lines, ctx),
        ErrorKind::ImportFailure => {
            return PatchOutcome::none("import failures need a dependency or module fix, not a text patch");
        }
        ErrorKind::Other(name) => {
            return PatchOutcome::none(format!("no deterministic fix for {}", name));
        }
    };

    let Some(edit) = outcome else {
        return PatchOutcome::none(format!(
            "could not locate the {} pattern in the code",
            ctx.kind
        ));
    };

    let mut patched_lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let removed = edit.end - edit.start;
    patched_lines.splice(edit.start..edit.end, edit.replacement.iter().cloned()).for_each(drop);
    let mut patched = patched_lines.join("\n");
    if code.ends_with('\n') {
        patched.push('\n');
    }

    if validate_syntax(code).ok && !validate_syntax(&patched).ok {
        return PatchOutcome::none("the mechanical patch would break the syntax");
    }

    let before = lines[edit.start..edit.end].join("\n");
    let after = edit.replacement.join("\n");
    let range = LineRange {
        start: edit.start + 1,
        end: (edit.start + edit.replacement.len()).max(edit.start + 1),
    };
    let change = ChangeRecord::new(PATCH_CATEGORY, edit.description)
        .with_lines(range)
        .with_snippets((removed > 0).then_some(before), Some(after))
        .with_impact(Some(ImpactTier::Medium));
    PatchOutcome::Patched {
        code: patched,
        change,
    }
}

/// Replace lines `start..end` (0-based, end exclusive) with `replacement`
struct LineEdit {
    start: usize,
    end: usize,
    replacement: Vec<String>,
    description: String,
}

/// Index of the failing line: the reported number when it agrees with the
/// captured text, otherwise the first line with that text
fn target_line(lines: &[&str], ctx: &ErrorContext) -> Option<usize> {
    let wanted = ctx.line_text.trim();
    if ctx.line_number > 0 && ctx.line_number <= lines.len() {
        let index = ctx.line_number - 1;
        if wanted.is_empty() || lines[index].trim() == wanted {
            return Some(index);
        }
    }
    if wanted.is_empty() {
        return None;
    }
    lines.iter().position(|l| l.trim() == wanted)
}

/// Candidate lines to search: the failing line first, then every line
fn search_order(lines: &[&str], ctx: &ErrorContext) -> Vec<usize> {
    let target = target_line(lines, ctx);
    target
        .into_iter()
        .chain((0..lines.len()).filter(|i| Some(*i) != target))
        .collect()
}

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Splits a line into code and trailing `#` comment (quotes are not tracked)
fn code_part(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn declare_placeholder(lines: &[&str], ctx: &ErrorContext) -> Option<LineEdit> {
    let name = undefined_name_re()
        .captures(&ctx.message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())?;
    let word = Regex::new(&format!(r"\b{}\b", regex::escape(&name))).ok()?;

    let first_use = match target_line(lines, ctx) {
        Some(index) if word.is_match(code_part(lines[index])) => index,
        _ => lines.iter().position(|l| {
            let code = code_part(l);
            word.is_match(code) && !code.trim_start().starts_with("def ")
        })?,
    };

    let line = lines[first_use];
    let indent = indent_of(line);
    Some(LineEdit {
        start: first_use,
        end: first_use,
        replacement: vec![format!("{}{} = None", indent, name)],
        description: format!("declared placeholder `{}` before its first use", name),
    })
}

fn guard_division(lines: &[&str], ctx: &ErrorContext) -> Option<LineEdit> {
    for index in search_order(lines, ctx) {
        let line = lines[index];
        let Some(cap) = division_re().captures(code_part(line)) else {
            continue;
        };
        let whole = cap.get(0)?;
        let lhs = cap.name("lhs")?.as_str();
        let op = cap.name("op")?.as_str();
        let rhs = cap.name("rhs")?.as_str();
        let guarded = format!("({} {} {} if {} != 0 else 0)", lhs, op, rhs, rhs);
        let rewritten = format!("{}{}{}", &line[..whole.start()], guarded, &line[whole.end()..]);
        return Some(LineEdit {
            start: index,
            end: index + 1,
            replacement: vec![rewritten],
            description: format!("guarded division by `{}` against zero", rhs),
        });
    }
    None
}

fn guard_index(lines: &[&str], ctx: &ErrorContext) -> Option<LineEdit> {
    for index in search_order(lines, ctx) {
        let line = lines[index];
        let code = code_part(line);
        let Some(cap) = subscript_re().captures(code) else {
            continue;
        };
        let whole = cap.get(0)?;
        let seq = cap.name("seq")?.as_str();
        let idx = cap.name("idx")?.as_str().trim();
        let condition = format!("-len({seq}) <= {idx} < len({seq})");

        let replacement = if is_assignment_target(&code[whole.end()..]) {
            let indent = indent_of(line);
            vec![
                format!("{}if {}:", indent, condition),
                format!("{}    {}", indent, line.trim_start()),
            ]
        } else {
            let guarded = format!("({} if {} else None)", whole.as_str(), condition);
            vec![format!("{}{}{}", &line[..whole.start()], guarded, &line[whole.end()..])]
        };
        return Some(LineEdit {
            start: index,
            end: index + 1,
            replacement,
            description: format!("guarded `{}` with a bounds check", whole.as_str()),
        });
    }
    None
}

fn guard_attribute(lines: &[&str], ctx: &ErrorContext) -> Option<LineEdit> {
    let attr = missing_attribute_re()
        .captures(&ctx.message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())?;
    let access = Regex::new(&format!(
        r"(?P<obj>[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)\.{}\b",
        regex::escape(&attr)
    ))
    .ok()?;

    for index in search_order(lines, ctx) {
        let line = lines[index];
        let code = code_part(line);
        let Some(cap) = access.captures(code) else {
            continue;
        };
        let whole = cap.get(0)?;
        let obj = cap.name("obj")?.as_str();
        let condition = format!("hasattr({}, '{}')", obj, attr);

        let mut end = whole.end();
        if code[end..].starts_with('(') {
            end = matching_paren(code, end)? + 1;
        }

        let replacement = if is_assignment_target(&code[end..]) {
            let indent = indent_of(line);
            vec![
                format!("{}if {}:", indent, condition),
                format!("{}    {}", indent, line.trim_start()),
            ]
        } else {
            let expr = &code[whole.start()..end];
            let guarded = format!("({} if {} else None)", expr, condition);
            vec![format!("{}{}{}", &line[..whole.start()], guarded, &line[end..])]
        };
        return Some(LineEdit {
            start: index,
            end: index + 1,
            replacement,
            description: format!("guarded access to `{}.{}` with hasattr", obj, attr),
        });
    }
    None
}

/// True when `rest` (the text after an expression) starts an assignment
fn is_assignment_target(rest: &str) -> bool {
    let rest = rest.trim_start();
    if rest.starts_with("==") {
        return false;
    }
    rest.starts_with('=')
        || ["+=", "-=", "*=", "/=", "//=", "%=", "**=", "|=", "&=", "^="]
            .iter()
            .any(|op| rest.starts_with(op))
}

/// Byte index of the `)` closing the `(` at `open`
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn undefined_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:name|local variable) '([A-Za-z_]\w*)'").expect("valid regex")
    })
}

fn missing_attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"has no attribute '([A-Za-z_]\w*)'").expect("valid regex"))
}

fn division_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<lhs>[A-Za-z_0-9][\w.]*(?:\([^()]*\)|\[[^\[\]]*\])?)\s*(?P<op>//|/|%)\s*(?P<rhs>[A-Za-z_][\w.]*(?:\([^()]*\)|\[[^\[\]]*\])?|\d+(?:\.\d+)?|\([^()]*\))",
        )
        .expect("valid regex")
    })
}

fn subscript_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<seq>[A-Za-z_][\w.]*)\[(?P<idx>[^\[\]:]+)\]").expect("valid regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patched_code(outcome: PatchOutcome) -> String {
        match outcome {
            PatchOutcome::Patched { code, .. } => code,
            PatchOutcome::NoDeterministicFix { reason } => panic!("expected a patch: {}", reason),
        }
    }

    #[test]
    fn test_index_out_of_range_is_guarded() {
        let code = "lst = [1, 2, 3]\nprint(lst[10])\n";
        let ctx = ErrorContext::new(ErrorKind::IndexOutOfRange, "list index out of range", code, 2);
        let outcome = patch(code, &ctx);
        let PatchOutcome::Patched { code: patched, change } = outcome else {
            panic!("expected a patch");
        };
        assert_eq!(
            patched,
            "lst = [1, 2, 3]\nprint((lst[10] if -len(lst) <= 10 < len(lst) else None))\n"
        );
        assert!(validate_syntax(&patched).ok);
        assert_eq!(change.category, PATCH_CATEGORY);
        assert_eq!(change.lines, Some(LineRange { start: 2, end: 2 }));
        assert!(change.consistent_with(&patched));
    }

    #[test]
    fn test_index_assignment_target_wraps_statement() {
        let code = "def f(lst):\n    lst[5] = 0\n    return lst\n";
        let ctx = ErrorContext::new(ErrorKind::IndexOutOfRange, "list assignment index out of range", code, 2);
        let patched = patched_code(patch(code, &ctx));
        assert_eq!(
            patched,
            "def f(lst):\n    if -len(lst) <= 5 < len(lst):\n        lst[5] = 0\n    return lst\n"
        );
    }

    #[test]
    fn test_division_by_zero_is_guarded() {
        let code = "def ratio(a, b):\n    return a / b\n";
        let ctx = ErrorContext::new(ErrorKind::DivisionByZero, "division by zero", code, 2);
        let patched = patched_code(patch(code, &ctx));
        assert_eq!(patched, "def ratio(a, b):\n    return (a / b if b != 0 else 0)\n");
    }

    #[test]
    fn test_division_by_call_result() {
        let code = "avg = total / len(items)";
        let ctx = ErrorContext::new(ErrorKind::DivisionByZero, "division by zero", code, 1);
        let patched = patched_code(patch(code, &ctx));
        assert_eq!(patched, "avg = (total / len(items) if len(items) != 0 else 0)");
    }

    #[test]
    fn test_undefined_name_gets_placeholder() {
        let code = "def f():\n    print(count)\n";
        let ctx = ErrorContext::new(ErrorKind::UndefinedName, "name 'count' is not defined", code, 2);
        let patched = patched_code(patch(code, &ctx));
        assert_eq!(patched, "def f():\n    count = None\n    print(count)\n");
    }

    #[test]
    fn test_missing_attribute_method_call() {
        let code = "result = conn.fetch(query, 1)\n";
        let ctx = ErrorContext::new(
            ErrorKind::MissingAttribute,
            "'NoneType' object has no attribute 'fetch'",
            code,
            1,
        );
        let patched = patched_code(patch(code, &ctx));
        assert_eq!(
            patched,
            "result = (conn.fetch(query, 1) if hasattr(conn, 'fetch') else None)\n"
        );
    }

    #[test]
    fn test_import_failure_has_no_fix() {
        let code = "import numpy\n";
        let ctx = ErrorContext::new(ErrorKind::ImportFailure, "No module named 'numpy'", code, 1);
        assert!(matches!(patch(code, &ctx), PatchOutcome::NoDeterministicFix { .. }));
    }

    #[test]
    fn test_unknown_kind_signals_no_fix() {
        let code = "d = {}\nd['x']\n";
        let ctx = ErrorContext::new(ErrorKind::Other("KeyError".to_string()), "'x'", code, 2);
        let outcome = patch(code, &ctx);
        assert_eq!(
            outcome,
            PatchOutcome::NoDeterministicFix {
                reason: "no deterministic fix for KeyError".to_string()
            }
        );
    }

    #[test]
    fn test_unlocatable_pattern_signals_no_fix() {
        let code = "x = 1\n";
        let ctx = ErrorContext::new(ErrorKind::DivisionByZero, "division by zero", code, 0);
        assert!(!patch(code, &ctx).is_patched());
    }
}
