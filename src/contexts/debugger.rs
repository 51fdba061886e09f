//! Debugging variant: deterministic patches combined with generated
//! suggestions, plus the static code check.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use super::agent_runner::{AgentRunner, AgentRunnerError};
use super::agents::{DebugPrompt, ReviewPrompt, DEBUGGER_AGENT, REVIEW_AGENT};
use super::analyzer::analyze;
use super::code_tools::{lint_blocking, Diagnostic, Linter};
use super::pattern_patcher::{patch, PatchOutcome};
use super::response_parser::parse;
use super::session_store::{session_id, SessionStore};
use super::transformation_loop::TransformError;
use super::validator::{check_preservation, validate_syntax, SyntaxVerdict};
use crate::data::{
    ErrorContext, MetricsSnapshot, PatchSuggestion, Session, SessionStatus, TransformationIntent,
};

/// Confidence given to a mechanically applied patch
const PATCH_CONFIDENCE: f64 = 0.8;

/// Sections recognised in a debugger reply
#[derive(Debug, Clone, Default, PartialEq)]
struct DebugReply {
    analysis: Option<String>,
    fix: Option<String>,
    rationale: Option<String>,
    alternatives: Vec<String>,
    code: Option<String>,
}

fn parse_debug_reply(raw: &str) -> DebugReply {
    let mut reply = DebugReply::default();
    let mut in_alternatives = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_alternatives = false;
            continue;
        }
        if let Some(cap) = section_re().captures(trimmed) {
            let label = cap.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            let value = cap.get(2).map(|m| m.as_str().trim().to_string()).filter(|v| !v.is_empty());
            in_alternatives = label == "alternatives";
            match label.as_str() {
                "analysis" => reply.analysis = value,
                "fix" => reply.fix = value,
                "rationale" => reply.rationale = value,
                _ => {}
            }
            continue;
        }
        if in_alternatives {
            match trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
                Some(alt) if !alt.trim().is_empty() => reply.alternatives.push(alt.trim().to_string()),
                _ if trimmed.is_empty() => in_alternatives = false,
                _ => {}
            }
        }
    }

    let parsed = parse(raw, TransformationIntent::General);
    if !parsed.no_code_found {
        reply.code = Some(parsed.code);
    }
    reply
}

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\**(analysis|fix|rationale|alternatives)\**\s*:\**\s*(.*)$")
            .expect("valid regex")
    })
}

/// Result of a static check of one piece of code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub syntax: SyntaxVerdict,
    pub metrics: MetricsSnapshot,
    pub diagnostics: Vec<Diagnostic>,
    /// Why linting was skipped, if it was
    pub lint_skipped: Option<String>,
    pub review: Option<String>,
    /// Why the generated review is missing, if it was requested
    pub review_error: Option<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.syntax.ok && self.diagnostics.is_empty()
    }

    /// Plain-text rendering used by the CLI
    pub fn render(&self) -> String {
        let mut out = Vec::new();
        match &self.syntax.error {
            None => out.push("Syntax: ok".to_string()),
            Some(e) => out.push(format!("Syntax: {}", e)),
        }
        out.push(format!("Metrics: {}", self.metrics));
        match &self.lint_skipped {
            Some(reason) => out.push(format!("Static analysis skipped: {}", reason)),
            None if self.diagnostics.is_empty() => out.push("Static analysis: no findings".to_string()),
            None => {
                out.push(format!("Static analysis: {} finding(s)", self.diagnostics.len()));
                out.extend(self.diagnostics.iter().map(|d| format!("  {}", d)));
            }
        }
        if let Some(review) = &self.review {
            out.push("Review:".to_string());
            out.extend(review.lines().map(|l| format!("  {}", l)));
        }
        if let Some(error) = &self.review_error {
            out.push(format!("Review unavailable: {}", error));
        }
        out.join("\n")
    }
}

/// Diagnoses captured errors and records every attempt in the session store
#[derive(Clone)]
pub struct Debugger {
    runner: AgentRunner,
    linter: Arc<dyn Linter>,
    sessions: Arc<SessionStore>,
}

impl Debugger {
    pub fn new(runner: AgentRunner, linter: Arc<dyn Linter>, sessions: Arc<SessionStore>) -> Self {
        Self {
            runner,
            linter,
            sessions,
        }
    }

    /// Produces a patch suggestion for `ctx` and appends the session.
    ///
    /// The deterministic patch is preferred when one applies; the generated
    /// suggestion supplies analysis and alternatives. A rate-limited service
    /// is recorded as a failed session and returned as `Err`.
    pub async fn diagnose(&self, ctx: ErrorContext) -> Result<Session, TransformError> {
        let mut notes = Vec::new();
        let outcome = patch(&ctx.source, &ctx);
        if let PatchOutcome::NoDeterministicFix { reason } = &outcome {
            notes.push(format!("no_deterministic_fix: {}", reason));
        }

        let reply = match self.runner.run(DEBUGGER_AGENT, &DebugPrompt::new(&ctx)).await {
            Ok(raw) => Some(parse_debug_reply(&raw)),
            Err(AgentRunnerError::Generation(e)) if !e.is_retryable() => {
                warn!(error = %e, "debugger generation failed fatally");
                notes.push(format!("generation failed: {}", e));
                let suggestion = match outcome {
                    PatchOutcome::Patched { code, change } => PatchSuggestion {
                        analysis: default_analysis(&ctx),
                        proposed_fix: change.description,
                        rationale: String::new(),
                        confidence: PATCH_CONFIDENCE,
                        alternatives: Vec::new(),
                        patched_code: code,
                        patch_applied: true,
                    },
                    PatchOutcome::NoDeterministicFix { .. } => unfixed(&ctx),
                };
                self.record(ctx, suggestion, SessionStatus::Failed, notes);
                return Err(TransformError::Generation(e));
            }
            Err(AgentRunnerError::Generation(e)) => {
                warn!(error = %e, "debugger generation failed");
                notes.push(format!("generation failed: {}", e));
                None
            }
            Err(AgentRunnerError::Populate(e)) => return Err(TransformError::Prompt(e)),
            Err(AgentRunnerError::Registry(e)) => return Err(TransformError::Registry(e)),
        };
        let reply = reply.unwrap_or_default();

        let (suggestion, status) = match outcome {
            PatchOutcome::Patched { code, change } => {
                let mut alternatives = Vec::new();
                if let Some(fix) = &reply.fix {
                    alternatives.push(fix.clone());
                }
                alternatives.extend(reply.alternatives.iter().cloned());
                let suggestion = PatchSuggestion {
                    analysis: reply.analysis.clone().unwrap_or_else(|| default_analysis(&ctx)),
                    proposed_fix: change.description,
                    rationale: reply
                        .rationale
                        .clone()
                        .unwrap_or_else(|| "Deterministic guard for this error kind".to_string()),
                    confidence: PATCH_CONFIDENCE,
                    alternatives,
                    patched_code: code,
                    patch_applied: true,
                };
                (suggestion, SessionStatus::Completed)
            }
            PatchOutcome::NoDeterministicFix { .. } => match &reply.code {
                Some(code) if validate_syntax(code).ok => {
                    let preservation = check_preservation(&ctx.source, code);
                    notes.extend(preservation.notes.iter().cloned());
                    let suggestion = PatchSuggestion {
                        analysis: reply.analysis.clone().unwrap_or_else(|| default_analysis(&ctx)),
                        proposed_fix: reply
                            .fix
                            .clone()
                            .unwrap_or_else(|| "Apply the generated rewrite".to_string()),
                        rationale: reply.rationale.clone().unwrap_or_default(),
                        confidence: if preservation.preserved { 0.6 } else { 0.4 },
                        alternatives: reply.alternatives.clone(),
                        patched_code: code.clone(),
                        patch_applied: false,
                    };
                    (suggestion, SessionStatus::Completed)
                }
                Some(_) => {
                    notes.push("generated fix is not valid Python".to_string());
                    (unfixed(&ctx), SessionStatus::Failed)
                }
                None => (unfixed(&ctx), SessionStatus::Failed),
            },
        };

        info!(kind = %ctx.kind, %status, patch_applied = suggestion.patch_applied, "diagnosis finished");
        Ok(self.record(ctx, suggestion, status, notes))
    }

    /// Syntax, static analysis and (optionally) a generated review.
    ///
    /// Tool and generation failures become report entries; only prompt and
    /// registry errors are returned.
    pub async fn check(&self, code: &str, with_review: bool) -> Result<CheckReport, TransformError> {
        let syntax = validate_syntax(code);
        let metrics = analyze(code);
        let (diagnostics, lint_skipped) = match lint_blocking(self.linter.clone(), code.to_string()).await {
            Ok(diagnostics) => (diagnostics, None),
            Err(e) => {
                warn!(error = %e, "linting skipped");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let (review, review_error) = if with_review {
            let diagnostics_text = if diagnostics.is_empty() {
                None
            } else {
                let lines: Vec<String> = diagnostics.iter().map(|d| format!("- {}", d)).collect();
                Some(format!("\nStatic analysis findings:\n{}\n", lines.join("\n")))
            };
            let prompt = ReviewPrompt {
                code: code.to_string(),
                diagnostics: diagnostics_text,
            };
            match self.runner.run(REVIEW_AGENT, &prompt).await {
                Ok(review) => (Some(review), None),
                Err(AgentRunnerError::Generation(e)) => (None, Some(e.to_string())),
                Err(AgentRunnerError::Populate(e)) => return Err(TransformError::Prompt(e)),
                Err(AgentRunnerError::Registry(e)) => return Err(TransformError::Registry(e)),
            }
        } else {
            (None, None)
        };

        Ok(CheckReport {
            syntax,
            metrics,
            diagnostics,
            lint_skipped,
            review,
            review_error,
        })
    }

    fn record(
        &self,
        ctx: ErrorContext,
        suggestion: PatchSuggestion,
        status: SessionStatus,
        notes: Vec<String>,
    ) -> Session {
        let session = Session {
            id: session_id(&ctx),
            context: ctx,
            suggestion,
            status,
            notes,
        };
        self.sessions.append(session.clone());
        session
    }
}

fn default_analysis(ctx: &ErrorContext) -> String {
    match ctx.line_number {
        0 => format!("{}: {}", ctx.kind, ctx.message),
        line => format!("{}: {} at line {}", ctx.kind, ctx.message, line),
    }
}

fn unfixed(ctx: &ErrorContext) -> PatchSuggestion {
    PatchSuggestion {
        analysis: default_analysis(ctx),
        proposed_fix: "No fix available".to_string(),
        rationale: String::new(),
        confidence: 0.0,
        alternatives: Vec::new(),
        patched_code: ctx.source.clone(),
        patch_applied: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_debug_reply_sections() {
        let raw = "Analysis: b can be zero\n**Fix:** check b first\nRationale: avoids the exception\nAlternatives:\n- raise ValueError\n- return None\n\n```python\ndef f(a, b):\n    return a / b if b else 0\n```\n";
        let reply = parse_debug_reply(raw);
        assert_eq!(reply.analysis.as_deref(), Some("b can be zero"));
        assert_eq!(reply.fix.as_deref(), Some("check b first"));
        assert_eq!(reply.rationale.as_deref(), Some("avoids the exception"));
        assert_eq!(reply.alternatives, vec!["raise ValueError", "return None"]);
        assert_eq!(reply.code.as_deref(), Some("def f(a, b):\n    return a / b if b else 0"));
    }

    #[test]
    fn test_parse_debug_reply_without_structure() {
        let reply = parse_debug_reply("I am not sure what happened.");
        assert_eq!(reply, DebugReply::default());
    }

    #[test]
    fn test_check_report_render() {
        let report = CheckReport {
            syntax: SyntaxVerdict { ok: true, error: None },
            metrics: MetricsSnapshot::default(),
            diagnostics: vec![Diagnostic {
                line: 3,
                message: "undefined name 'y'".to_string(),
                tool: "pyflakes".to_string(),
            }],
            lint_skipped: None,
            review: None,
            review_error: Some("Generation timed out".to_string()),
        };
        let text = report.render();
        assert!(text.contains("Syntax: ok"));
        assert!(text.contains("line 3: undefined name 'y' (pyflakes)"));
        assert!(text.contains("Review unavailable: Generation timed out"));
        assert!(!report.is_clean());
    }
}
