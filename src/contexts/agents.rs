//! Transformation agents and the built-in prompt templates.
//!
//! Every intent has one agent. Agents differ only in the focus text
//! rendered into the shared transformation template.

use serde::Serialize;

use crate::data::{ChangeRecord, ErrorContext, TransformationIntent, TransformationRequest};

/// Agent name used for debugging suggestions
pub const DEBUGGER_AGENT: &str = "debugger";
/// Agent name used for generated code reviews
pub const REVIEW_AGENT: &str = "review";
/// Registry entry consulted for batch execution settings
pub const BATCH_AGENT: &str = "batch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agent {
    pub intent: TransformationIntent,
    pub focus: &'static str,
}

const AGENTS: [Agent; 6] = [
    Agent {
        intent: TransformationIntent::Performance,
        focus: "Reduce running time. Prefer built-ins and comprehensions over manual loops, \
                avoid repeated work inside loops and pick better data structures.",
    },
    Agent {
        intent: TransformationIntent::Memory,
        focus: "Reduce memory use. Prefer generators and lazy iteration, avoid building \
                intermediate lists and release large objects early.",
    },
    Agent {
        intent: TransformationIntent::Readability,
        focus: "Make the code easier to read. Use descriptive names, flatten nesting with \
                early returns and replace magic numbers with named constants.",
    },
    Agent {
        intent: TransformationIntent::Maintainability,
        focus: "Make the code easier to change. Split long functions, remove duplication \
                and avoid module-level mutable state.",
    },
    Agent {
        intent: TransformationIntent::Security,
        focus: "Remove unsafe patterns. Validate inputs, avoid eval/exec and shell injection \
                and never hard-code secrets.",
    },
    Agent {
        intent: TransformationIntent::General,
        focus: "Improve overall quality without changing behaviour.",
    },
];

impl Agent {
    pub fn for_intent(intent: TransformationIntent) -> Agent {
        AGENTS
            .iter()
            .copied()
            .find(|a| a.intent == intent)
            .unwrap_or(AGENTS[5])
    }

    /// Registry name of the agent
    pub fn name(&self) -> &'static str {
        self.intent.as_str()
    }
}

/// Input rendered into a transformation template
#[derive(Debug, Clone, Serialize)]
pub struct TransformPrompt {
    pub code: String,
    pub query: String,
    pub intent: String,
    pub focus: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_changes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}

impl TransformPrompt {
    /// Prompt input for one GENERATING entry.
    ///
    /// `code` is the current code, `proposed` the changes suggested by
    /// earlier iterations and `rejection` the reason the previous candidate
    /// was turned down.
    pub fn new(
        agent: &Agent,
        request: &TransformationRequest,
        code: &str,
        proposed: &[ChangeRecord],
        rejection: Option<&str>,
    ) -> Self {
        let previous_changes = if proposed.is_empty() {
            None
        } else {
            let lines: Vec<String> = proposed
                .iter()
                .map(|c| format!("- [{}] {}", c.category, c.description))
                .collect();
            Some(format!(
                "\nChanges proposed in earlier iterations (refine them, do not start over):\n{}\n",
                lines.join("\n")
            ))
        };

        Self {
            code: code.to_string(),
            query: request.query().to_string(),
            intent: agent.name().to_string(),
            focus: agent.focus.to_string(),
            constraints: request
                .constraints_text()
                .map(|c| format!("\nConstraints:\n{}\n", c)),
            previous_changes,
            rejection: rejection.map(|r| {
                format!("\nYour previous answer was rejected: {}\nFix that in this answer.\n", r)
            }),
        }
    }
}

/// Input rendered into the debugger template
#[derive(Debug, Clone, Serialize)]
pub struct DebugPrompt {
    pub code: String,
    pub kind: String,
    pub message: String,
    pub line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locals: Option<String>,
}

impl DebugPrompt {
    pub fn new(ctx: &ErrorContext) -> Self {
        let line = if ctx.line_number == 0 {
            "unknown".to_string()
        } else {
            format!("{}: {}", ctx.line_number, ctx.line_text.trim())
        };
        let locals = if ctx.locals.is_empty() {
            None
        } else {
            let lines: Vec<String> = ctx
                .locals
                .iter()
                .map(|(name, repr)| format!("- {} = {}", name, repr))
                .collect();
            Some(format!("\nLocal variables:\n{}\n", lines.join("\n")))
        };
        Self {
            code: ctx.source.clone(),
            kind: ctx.kind.to_string(),
            message: ctx.message.clone(),
            line,
            function: ctx
                .function_name
                .as_ref()
                .map(|f| format!("\nFunction: {}\n", f)),
            locals,
        }
    }
}

/// Input rendered into the review template
#[derive(Debug, Clone, Serialize)]
pub struct ReviewPrompt {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

const TRANSFORM_TEMPLATE: &str = r#"You are a Python {{input.intent}} specialist.
Focus: {{input.focus}}

Request: {{input.query}}
{{input.constraints?}}{{input.previous_changes?}}{{input.rejection?}}
Keep every function and class name and its parameter list unless the constraints allow otherwise.
Answer with the complete rewritten code in one ```python fenced block.
After the block, list every change on its own line starting with "- ".

Code:
```python
{{input.code}}
```
"#;

const DEBUGGER_TEMPLATE: &str = r#"You are a Python debugging assistant.
The code below failed with {{input.kind}}: {{input.message}}
Failing line {{input.line}}
{{input.function?}}{{input.locals?}}
Answer in this layout:
Analysis: <what went wrong>
Fix: <the fix in one sentence>
Rationale: <why the fix works>
Alternatives:
- <another possible fix>
Then give the complete fixed code in one ```python fenced block.

Code:
```python
{{input.code}}
```
"#;

const REVIEW_TEMPLATE: &str = r#"Review this Python code for bugs, unsafe patterns and style problems.
{{input.diagnostics?}}
List each finding on its own line starting with "- ". Say "No issues found." if there are none.

Code:
```python
{{input.code}}
```
"#;

/// Template used when no `agents/<name>.yml` overrides it
pub fn builtin_template(agent_name: &str) -> Option<&'static str> {
    match agent_name {
        DEBUGGER_AGENT => Some(DEBUGGER_TEMPLATE),
        REVIEW_AGENT => Some(REVIEW_TEMPLATE),
        name if name.parse::<TransformationIntent>().is_ok() => Some(TRANSFORM_TEMPLATE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::agent_runner::replace_placeholders;
    use crate::data::ErrorKind;

    #[test]
    fn test_every_intent_has_an_agent() {
        for intent in TransformationIntent::ALL {
            let agent = Agent::for_intent(intent);
            assert_eq!(agent.intent, intent);
            assert!(builtin_template(agent.name()).is_some());
        }
    }

    #[test]
    fn test_unknown_agent_has_no_template() {
        assert!(builtin_template("translator").is_none());
        assert!(builtin_template(BATCH_AGENT).is_none());
    }

    #[test]
    fn test_transform_prompt_accumulates_context() {
        let request = TransformationRequest::new("def s(n): return n", "make it faster")
            .unwrap()
            .with_constraint("allow_signature_changes", serde_json::json!(true));
        let agent = Agent::for_intent(request.intent());
        let proposed = vec![ChangeRecord::new("performance", "used sum")];
        let input = TransformPrompt::new(&agent, &request, request.code(), &proposed, Some("invalid syntax"));
        let value = serde_json::to_value(&input).unwrap();
        let prompt = replace_placeholders(TRANSFORM_TEMPLATE, &value).unwrap();

        assert!(prompt.contains("Python performance specialist"));
        assert!(prompt.contains("- [performance] used sum"));
        assert!(prompt.contains("rejected: invalid syntax"));
        assert!(prompt.contains("- allow_signature_changes: true"));
        assert!(prompt.contains("def s(n): return n"));
    }

    #[test]
    fn test_first_prompt_has_no_optional_sections() {
        let request = TransformationRequest::new("x = 1", "clean this up").unwrap();
        let agent = Agent::for_intent(request.intent());
        let input = TransformPrompt::new(&agent, &request, request.code(), &[], None);
        let value = serde_json::to_value(&input).unwrap();
        let prompt = replace_placeholders(TRANSFORM_TEMPLATE, &value).unwrap();
        assert!(!prompt.contains("rejected"));
        assert!(!prompt.contains("earlier iterations"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_debug_prompt_renders_context() {
        let ctx = ErrorContext::new(
            ErrorKind::DivisionByZero,
            "division by zero",
            "def f(a, b):\n    return a / b\n",
            2,
        )
        .with_function("f")
        .with_local("b", "0");
        let value = serde_json::to_value(DebugPrompt::new(&ctx)).unwrap();
        let prompt = replace_placeholders(DEBUGGER_TEMPLATE, &value).unwrap();
        assert!(prompt.contains("failed with division-by-zero: division by zero"));
        assert!(prompt.contains("Failing line 2: return a / b"));
        assert!(prompt.contains("- b = 0"));
    }
}
