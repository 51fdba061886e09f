//! Thin tree-sitter wrapper for Python source text.

use tree_sitter::{Node, Parser, Tree, TreeCursor};

/// Parses `code` as Python.
///
/// Returns `None` only if the grammar cannot be loaded or parsing is
/// aborted; syntax errors still produce a tree (with error nodes).
pub fn parse_python(code: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_python::LANGUAGE.into()).ok()?;
    parser.parse(code, None)
}

/// Location and description of the first error node in the tree.
///
/// Only subtrees that contain an error are entered. Traversal uses one
/// cursor, so nesting depth never grows the call stack.
pub fn first_error(node: Node, source: &[u8]) -> Option<String> {
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let mut depth = 0usize;
    let mut fallback: Option<Node> = None;
    loop {
        let current = cursor.node();
        if current.is_error() || current.is_missing() {
            return Some(describe_error(current, source));
        }
        if current.has_error() {
            if cursor.goto_first_child() {
                depth += 1;
                continue;
            }
            fallback.get_or_insert(current);
        }
        if !advance(&mut cursor, &mut depth) {
            break;
        }
    }
    let near = fallback.unwrap_or(node);
    Some(format!(
        "syntax error near line {}",
        near.start_position().row + 1
    ))
}

fn describe_error(node: Node, source: &[u8]) -> String {
    let pos = node.start_position();
    let detail = if node.is_missing() {
        format!("missing `{}`", node.kind())
    } else {
        let text = node.utf8_text(source).unwrap_or("");
        let snippet: String = text.lines().next().unwrap_or("").chars().take(40).collect();
        format!("unexpected `{}`", snippet.trim())
    };
    format!(
        "syntax error at line {}, column {}: {}",
        pos.row + 1,
        pos.column + 1,
        detail
    )
}

/// Visits every node depth-first, pre-order
pub fn walk<'a, F>(node: Node<'a>, visit: &mut F)
where
    F: FnMut(Node<'a>),
{
    walk_with_depth(node, &mut |n, _| visit(n));
}

/// Pre-order visit that also reports each node's depth below `node`
pub fn walk_with_depth<'a, F>(node: Node<'a>, visit: &mut F)
where
    F: FnMut(Node<'a>, usize),
{
    let mut cursor = node.walk();
    let mut depth = 0usize;
    loop {
        visit(cursor.node(), depth);
        if cursor.goto_first_child() {
            depth += 1;
            continue;
        }
        if !advance(&mut cursor, &mut depth) {
            return;
        }
    }
}

/// Moves to the next pre-order node that is not a descendant of the
/// current one; `false` once the walk is back at its starting node
fn advance(cursor: &mut TreeCursor, depth: &mut usize) -> bool {
    loop {
        if *depth == 0 {
            return false;
        }
        if cursor.goto_next_sibling() {
            return true;
        }
        cursor.goto_parent();
        *depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_python() {
        let tree = parse_python("def f(x):\n    return x + 1\n").unwrap();
        assert!(!tree.root_node().has_error());
    }

    #[test]
    fn test_first_error_reports_line() {
        let code = "def f(:\n    return 1\n";
        let tree = parse_python(code).unwrap();
        let message = first_error(tree.root_node(), code.as_bytes()).unwrap();
        assert!(message.starts_with("syntax error"), "{}", message);
    }

    #[test]
    fn test_walk_visits_in_pre_order_with_depth() {
        let code = "def f(x):\n    return x\n";
        let tree = parse_python(code).unwrap();
        let mut seen = Vec::new();
        walk_with_depth(tree.root_node(), &mut |node, depth| {
            if node.is_named() {
                seen.push((node.kind(), depth));
            }
        });
        assert_eq!(seen[0], ("module", 0));
        assert_eq!(seen[1], ("function_definition", 1));
        assert!(seen.iter().any(|(kind, _)| *kind == "return_statement"));
    }

    #[test]
    fn test_deeply_nested_code_does_not_overflow() {
        let code = format!("x = {}1{}\n", "(".repeat(20_000), ")".repeat(20_000));
        let tree = parse_python(&code).unwrap();
        let mut count = 0usize;
        walk(tree.root_node(), &mut |_| count += 1);
        assert!(count > 20_000);

        let broken = format!("x = {}1 +{}\n", "(".repeat(20_000), ")".repeat(20_000));
        let tree = parse_python(&broken).unwrap();
        assert!(first_error(tree.root_node(), broken.as_bytes()).is_some());
    }
}
