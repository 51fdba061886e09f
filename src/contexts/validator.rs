//! Syntax validation and the structural preservation heuristic.
//!
//! `check_preservation` compares only names and parameter counts of
//! functions and classes. It is not a proof of behavioural equivalence: a
//! candidate can keep every signature and still compute something else, and
//! the check never executes either version.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tree_sitter::Node;

use super::syntax_tree::{first_error, parse_python, walk_with_depth};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxVerdict {
    pub ok: bool,
    pub error: Option<String>,
}

/// Parses `code`; failures are reported in the verdict, never raised
pub fn validate_syntax(code: &str) -> SyntaxVerdict {
    if code.trim().is_empty() {
        return SyntaxVerdict {
            ok: false,
            error: Some("no code to validate".to_string()),
        };
    }
    let Some(tree) = parse_python(code) else {
        return SyntaxVerdict {
            ok: false,
            error: Some("parser unavailable".to_string()),
        };
    };
    match first_error(tree.root_node(), code.as_bytes()) {
        None => SyntaxVerdict { ok: true, error: None },
        Some(message) => SyntaxVerdict {
            ok: false,
            error: Some(message),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureKind {
    Function,
    Class,
}

/// A function or class definition, qualified by its enclosing definitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub kind: SignatureKind,
    /// Parameter count for functions; `None` for classes
    pub params: Option<usize>,
    /// 1-based line of the definition
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreservationReport {
    pub preserved: bool,
    pub original_signatures: Vec<Signature>,
    pub candidate_signatures: Vec<Signature>,
    pub notes: Vec<String>,
}

/// Ordered function/class signatures found in `code`
pub fn extract_signatures(code: &str) -> Vec<Signature> {
    let mut signatures = Vec::new();
    let Some(tree) = parse_python(code) else {
        return signatures;
    };
    let source = code.as_bytes();
    // Enclosing definitions as (depth, name); entries at or below the
    // current depth belong to subtrees already left
    let mut scope: Vec<(usize, String)> = Vec::new();

    walk_with_depth(tree.root_node(), &mut |node, depth| {
        while scope.last().is_some_and(|(d, _)| *d >= depth) {
            scope.pop();
        }
        let kind = match node.kind() {
            "function_definition" => SignatureKind::Function,
            "class_definition" => SignatureKind::Class,
            _ => return,
        };
        let Some(name) = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())
        else {
            return;
        };
        let params = match kind {
            SignatureKind::Function => Some(
                node.child_by_field_name("parameters")
                    .map(count_parameters)
                    .unwrap_or(0),
            ),
            SignatureKind::Class => None,
        };
        let qualified: Vec<&str> = scope
            .iter()
            .map(|(_, n)| n.as_str())
            .chain(std::iter::once(name))
            .collect();
        signatures.push(Signature {
            name: qualified.join("."),
            kind,
            params,
            line: node.start_position().row + 1,
        });
        scope.push((depth, name.to_string()));
    });
    signatures
}

fn count_parameters(parameters: Node) -> usize {
    let mut cursor = parameters.walk();
    parameters
        .named_children(&mut cursor)
        .filter(|p| {
            !matches!(
                p.kind(),
                "keyword_separator" | "positional_separator" | "comment"
            )
        })
        .count()
}

/// Compares the signatures of two code versions.
///
/// `preserved` is false when the candidate drops a name the original
/// defines, or changes the parameter count of a function that still exists.
/// New names in the candidate are allowed.
pub fn check_preservation(original: &str, candidate: &str) -> PreservationReport {
    let original_signatures = extract_signatures(original);
    let candidate_signatures = extract_signatures(candidate);

    let mut candidate_by_name: HashMap<&str, &Signature> = HashMap::new();
    for sig in &candidate_signatures {
        candidate_by_name.entry(sig.name.as_str()).or_insert(sig);
    }

    let mut notes = Vec::new();
    let mut preserved = true;
    let mut seen: Vec<&str> = Vec::new();
    for sig in &original_signatures {
        if seen.contains(&sig.name.as_str()) {
            continue;
        }
        seen.push(sig.name.as_str());

        match candidate_by_name.get(sig.name.as_str()) {
            None => {
                preserved = false;
                notes.push(format!("`{}` was removed", sig.name));
            }
            Some(found) if found.kind != sig.kind => {
                preserved = false;
                notes.push(format!("`{}` changed from {:?} to {:?}", sig.name, sig.kind, found.kind));
            }
            Some(found) if found.params != sig.params => {
                preserved = false;
                notes.push(format!(
                    "`{}` parameter count changed from {} to {}",
                    sig.name,
                    sig.params.unwrap_or(0),
                    found.params.unwrap_or(0)
                ));
            }
            Some(_) => {}
        }
    }

    let original_names: Vec<&str> = original_signatures.iter().map(|s| s.name.as_str()).collect();
    for sig in &candidate_signatures {
        if !original_names.contains(&sig.name.as_str()) {
            notes.push(format!("`{}` was added", sig.name));
        }
    }

    PreservationReport {
        preserved,
        original_signatures,
        candidate_signatures,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_syntax_ok() {
        let verdict = validate_syntax("def s(n): return sum(n)");
        assert!(verdict.ok);
        assert!(verdict.error.is_none());
    }

    #[test]
    fn test_validate_syntax_reports_error() {
        let verdict = validate_syntax("def s(n:\n  return n\n");
        assert!(!verdict.ok);
        assert!(verdict.error.is_some());
    }

    #[test]
    fn test_validate_syntax_empty_is_invalid() {
        assert!(!validate_syntax("  \n").ok);
    }

    #[test]
    fn test_extract_signatures_qualifies_methods() {
        let code = "class Stack:\n    def push(self, item):\n        pass\n    def pop(self):\n        pass\n\ndef helper(a, b=2, *args, **kwargs):\n    pass\n";
        let sigs = extract_signatures(code);
        let names: Vec<_> = sigs.iter().map(|s| (s.name.as_str(), s.params)).collect();
        assert_eq!(
            names,
            vec![
                ("Stack", None),
                ("Stack.push", Some(2)),
                ("Stack.pop", Some(1)),
                ("helper", Some(4)),
            ]
        );
    }

    #[test]
    fn test_keyword_separator_not_counted() {
        let sigs = extract_signatures("def f(a, *, b):\n    pass\n");
        assert_eq!(sigs[0].params, Some(2));
    }

    #[test]
    fn test_preservation_holds_for_same_signature() {
        let original = "def s(n): t=0\nfor i in range(len(n)): t=t+n[i]\nreturn t";
        let report = check_preservation(original, "def s(n): return sum(n)");
        assert!(report.preserved, "{:?}", report.notes);
        assert_eq!(report.original_signatures.len(), 1);
        assert_eq!(report.candidate_signatures.len(), 1);
    }

    #[test]
    fn test_preservation_flags_removed_name() {
        let report = check_preservation(
            "def a():\n    pass\n\ndef b():\n    pass\n",
            "def a():\n    pass\n",
        );
        assert!(!report.preserved);
        assert!(report.notes.iter().any(|n| n.contains("`b` was removed")));
    }

    #[test]
    fn test_preservation_flags_param_change() {
        let report = check_preservation("def a(x):\n    pass\n", "def a(x, y):\n    pass\n");
        assert!(!report.preserved);
        assert!(report.notes[0].contains("parameter count changed from 1 to 2"));
    }

    #[test]
    fn test_preservation_allows_new_helpers() {
        let report = check_preservation(
            "def a(x):\n    return x\n",
            "def _double(v):\n    return v\n\ndef a(x):\n    return _double(x)\n",
        );
        assert!(report.preserved);
        assert!(report.notes.iter().any(|n| n.contains("`_double` was added")));
    }

    #[test]
    fn test_deeply_nested_candidate_is_assessed() {
        let nested = format!(
            "def a(x):\n    return {}x{}\n",
            "(".repeat(20_000),
            ")".repeat(20_000)
        );
        let report = check_preservation("def a(x):\n    return x\n", &nested);
        assert!(report.preserved);
        assert_eq!(report.candidate_signatures.len(), 1);

        let self_check = check_preservation(&nested, &nested);
        assert!(self_check.preserved);
    }

    #[test]
    fn test_nested_definitions_leave_scope() {
        let code = "class A:\n    def f(self):\n        def inner():\n            pass\n\ndef g():\n    pass\n";
        let names: Vec<String> = extract_signatures(code).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["A", "A.f", "A.f.inner", "g"]);
    }
}
