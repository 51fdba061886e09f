//! The iterative generate / parse / validate loop.
//!
//! One run walks INIT → GENERATING → VALIDATING → (ACCEPTED | RETRYING |
//! FAILED) → DONE. Only input errors, prompt/registry errors and
//! non-retryable generation errors escape as `Err`; every other failure is
//! folded into the returned result.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::agent_runner::{AgentRunner, PopulateError, RegistryError};
use super::agents::{Agent, TransformPrompt};
use super::analyzer::{analyze, find_smells};
use super::code_tools::{format_blocking, Formatter};
use super::generation::GenerationError;
use super::response_parser::parse;
use super::validator::{check_preservation, validate_syntax, PreservationReport, SyntaxVerdict};
use crate::data::{
    changed_lines, ChangeRecord, FailureReason, InputError, IterationOutcome, IterationRecord,
    TransformationIntent, TransformationRequest, TransformationResult, TransformationStatus,
};

/// Candidates scoring below this are rejected even when valid
pub const CONFIDENCE_FLOOR: f64 = 0.3;

/// Failures a caller of the loop can observe
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    Input(InputError),
    Generation(GenerationError),
    Prompt(PopulateError),
    Registry(RegistryError),
    /// A concurrent run was aborted before it returned
    Aborted(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransformError::Input(e) => write!(f, "{}", e),
            TransformError::Generation(e) => write!(f, "{}", e),
            TransformError::Prompt(e) => write!(f, "{}", e),
            TransformError::Registry(e) => write!(f, "{}", e),
            TransformError::Aborted(details) => write!(f, "Transformation aborted: {}", details),
        }
    }
}

impl std::error::Error for TransformError {}

impl From<InputError> for TransformError {
    fn from(e: InputError) -> Self {
        TransformError::Input(e)
    }
}

impl From<GenerationError> for TransformError {
    fn from(e: GenerationError) -> Self {
        TransformError::Generation(e)
    }
}

impl From<PopulateError> for TransformError {
    fn from(e: PopulateError) -> Self {
        TransformError::Prompt(e)
    }
}

impl From<RegistryError> for TransformError {
    fn from(e: RegistryError) -> Self {
        TransformError::Registry(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Generating,
    Validating,
    Accepted,
    Retrying,
    Failed,
    Done,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LoopState::Init => "INIT",
            LoopState::Generating => "GENERATING",
            LoopState::Validating => "VALIDATING",
            LoopState::Accepted => "ACCEPTED",
            LoopState::Retrying => "RETRYING",
            LoopState::Failed => "FAILED",
            LoopState::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

/// Verdict on one (previous, candidate) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub syntax: SyntaxVerdict,
    pub preservation: PreservationReport,
    pub smells_before: usize,
    pub smells_after: usize,
    pub confidence: f64,
    pub accepted: bool,
    pub rejection: Option<String>,
}

/// Scores a candidate against the code it would replace.
///
/// Pure: the same pair always yields the same assessment.
pub fn assess_candidate(previous: &str, candidate: &str, allow_signature_changes: bool) -> Assessment {
    let syntax = validate_syntax(candidate);
    let preservation = check_preservation(previous, candidate);
    let smells_before = find_smells(previous).len();
    let smells_after = find_smells(candidate).len();

    let confidence = if syntax.ok {
        let preserved = if preservation.preserved { 1.0 } else { 0.0 };
        let delta = smells_before as f64 - smells_after as f64;
        let smell_score = (0.5 + 0.5 * delta / (smells_before.max(1) as f64)).clamp(0.0, 1.0);
        (0.4 + 0.4 * preserved + 0.2 * smell_score).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let rejection = if !syntax.ok {
        Some(format!(
            "candidate is not valid Python ({})",
            syntax.error.as_deref().unwrap_or("unknown error")
        ))
    } else if !preservation.preserved && !allow_signature_changes {
        Some(format!(
            "candidate changes existing signatures: {}",
            preservation.notes.join("; ")
        ))
    } else if confidence < CONFIDENCE_FLOOR {
        Some(format!("confidence {:.2} is below {:.2}", confidence, CONFIDENCE_FLOOR))
    } else {
        None
    };

    Assessment {
        syntax,
        preservation,
        smells_before,
        smells_after,
        confidence,
        accepted: rejection.is_none(),
        rejection,
    }
}

/// Change records that still hold against `candidate`, with line ranges
/// filled in from the diff; empty when nothing changed
pub fn assemble_changes(previous: &str, candidate: &str, proposed: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    let Some(range) = changed_lines(previous, candidate) else {
        return Vec::new();
    };
    proposed
        .into_iter()
        .filter(|change| change.consistent_with(candidate))
        .map(|change| match change.lines {
            Some(_) => change,
            None => change.with_lines(range),
        })
        .collect()
}

/// Results of running every intent on the same code
#[derive(Debug, Clone)]
pub struct Comparison {
    /// One result per intent, in intent order
    pub results: Vec<TransformationResult>,
    best: usize,
}

impl Comparison {
    pub fn best(&self) -> &TransformationResult {
        &self.results[self.best]
    }

    pub fn into_best(mut self) -> TransformationResult {
        self.results.swap_remove(self.best)
    }
}

/// Index of the preferred result: highest confidence, then fewest changes,
/// then earliest intent
fn select_best(results: &[TransformationResult]) -> usize {
    let mut best = 0;
    for (i, result) in results.iter().enumerate().skip(1) {
        let current = &results[best];
        let better = result.confidence > current.confidence
            || (result.confidence == current.confidence
                && (result.changes.len() < current.changes.len()
                    || (result.changes.len() == current.changes.len()
                        && result.intent < current.intent)));
        if better {
            best = i;
        }
    }
    best
}

#[derive(Clone)]
pub struct TransformationLoop {
    runner: AgentRunner,
    formatter: Option<Arc<dyn Formatter>>,
}

impl TransformationLoop {
    pub fn new(runner: AgentRunner) -> Self {
        Self {
            runner,
            formatter: None,
        }
    }

    /// Formats accepted candidates; a formatted version that no longer
    /// validates is discarded in favour of the unformatted one
    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub async fn run(&self, request: &TransformationRequest) -> Result<TransformationResult, TransformError> {
        let intent = request.intent();
        let max_iterations = request.max_iterations();
        let mut state = LoopState::Init;
        debug!(%intent, max_iterations, "loop started in {}", state);

        let original = request.code();
        let metrics_before = analyze(original);
        let input_verdict = validate_syntax(original);
        if !input_verdict.ok {
            let detail = input_verdict.error.unwrap_or_else(|| "invalid syntax".to_string());
            transition(&mut state, LoopState::Failed, intent);
            transition(&mut state, LoopState::Done, intent);
            info!(%intent, %detail, "input rejected before generation");
            return Ok(TransformationResult {
                original_code: original.to_string(),
                final_code: original.to_string(),
                changes: Vec::new(),
                metrics_after: metrics_before.clone(),
                metrics_before,
                confidence: 0.0,
                best_attempt_confidence: 0.0,
                iterations: 0,
                intent,
                status: TransformationStatus::Failed {
                    failure: FailureReason::InvalidInput(detail),
                },
                attempts: Vec::new(),
                created_at: Utc::now(),
            });
        }

        let agent = Agent::for_intent(intent);
        let model = self.runner.model(agent.name())?;
        let allow_signature_changes = request.allows_signature_changes();

        let mut current = original.to_string();
        let mut proposed_so_far: Vec<ChangeRecord> = Vec::new();
        let mut applied: Vec<ChangeRecord> = Vec::new();
        let mut attempts: Vec<IterationRecord> = Vec::new();
        let mut rejection: Option<String> = None;
        let mut accepted_confidence: Option<f64> = None;
        let mut best_attempt_confidence: f64 = 0.0;
        let mut iterations: u32 = 0;

        while iterations < max_iterations {
            iterations += 1;
            transition(&mut state, LoopState::Generating, intent);

            let input = TransformPrompt::new(&agent, request, &current, &proposed_so_far, rejection.as_deref());
            let prompt = self.runner.populate(agent.name(), &input)?;

            let reply = match self.runner.execute(&prompt, &model).await {
                Ok(reply) => reply,
                Err(e) if !e.is_retryable() => {
                    warn!(%intent, iteration = iterations, error = %e, "generation failed fatally");
                    transition(&mut state, LoopState::Failed, intent);
                    return Err(TransformError::Generation(e));
                }
                Err(e) => {
                    warn!(%intent, iteration = iterations, error = %e, "generation failed");
                    let reason = format!("generation failed: {}", e);
                    attempts.push(rejected(iterations, max_iterations, 0.0, &reason));
                    transition(&mut state, next_after_rejection(iterations, max_iterations), intent);
                    rejection = Some(reason);
                    continue;
                }
            };

            transition(&mut state, LoopState::Validating, intent);
            let parsed = parse(&reply, intent);
            if parsed.no_code_found {
                let reason = "the reply contained no code block".to_string();
                attempts.push(rejected(iterations, max_iterations, 0.0, &reason));
                transition(&mut state, next_after_rejection(iterations, max_iterations), intent);
                rejection = Some(reason);
                continue;
            }

            let assessment = assess_candidate(&current, &parsed.code, allow_signature_changes);
            best_attempt_confidence = best_attempt_confidence.max(assessment.confidence);
            debug!(
                %intent,
                iteration = iterations,
                confidence = assessment.confidence,
                preserved = assessment.preservation.preserved,
                "candidate assessed"
            );

            if let Some(reason) = assessment.rejection {
                attempts.push(rejected(iterations, max_iterations, assessment.confidence, &reason));
                transition(&mut state, next_after_rejection(iterations, max_iterations), intent);
                for change in parsed.changes {
                    if !proposed_so_far.contains(&change) {
                        proposed_so_far.push(change);
                    }
                }
                rejection = Some(reason);
                continue;
            }

            transition(&mut state, LoopState::Accepted, intent);
            let candidate = self.format_candidate(parsed.code).await;
            applied.extend(assemble_changes(&current, &candidate, parsed.changes));
            current = candidate;
            accepted_confidence = Some(assessment.confidence);
            attempts.push(IterationRecord {
                iteration: iterations,
                outcome: IterationOutcome::Accepted,
                confidence: assessment.confidence,
                rejection: None,
            });
            break;
        }

        transition(&mut state, LoopState::Done, intent);
        let result = match accepted_confidence {
            Some(confidence) => {
                info!(%intent, iterations, confidence, changes = applied.len(), "transformation accepted");
                TransformationResult {
                    original_code: original.to_string(),
                    metrics_after: analyze(&current),
                    final_code: current,
                    changes: applied,
                    metrics_before,
                    confidence,
                    best_attempt_confidence: best_attempt_confidence.max(confidence),
                    iterations,
                    intent,
                    status: TransformationStatus::Accepted,
                    attempts,
                    created_at: Utc::now(),
                }
            }
            None => {
                let detail = rejection.unwrap_or_else(|| "no candidate was accepted".to_string());
                info!(%intent, iterations, %detail, "transformation failed");
                TransformationResult {
                    original_code: original.to_string(),
                    final_code: original.to_string(),
                    changes: Vec::new(),
                    metrics_after: metrics_before.clone(),
                    metrics_before,
                    confidence: 0.0,
                    best_attempt_confidence,
                    iterations,
                    intent,
                    status: TransformationStatus::Failed {
                        failure: FailureReason::OptimizationFailed(detail),
                    },
                    attempts,
                    created_at: Utc::now(),
                }
            }
        };
        Ok(result)
    }

    /// Runs one independent loop per intent concurrently and ranks them
    pub async fn compare_all(&self, request: &TransformationRequest) -> Result<Comparison, TransformError> {
        let mut tasks = JoinSet::new();
        for (index, intent) in TransformationIntent::ALL.into_iter().enumerate() {
            let this = self.clone();
            let request = request.clone().with_intent(intent);
            tasks.spawn(async move { (index, this.run(&request).await) });
        }

        let mut slots: Vec<Option<Result<TransformationResult, TransformError>>> =
            (0..TransformationIntent::ALL.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| TransformError::Aborted(e.to_string()))?;
            slots[index] = Some(outcome);
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Some(outcome) => results.push(outcome?),
                None => return Err(TransformError::Aborted("missing intent result".to_string())),
            }
        }

        let best = select_best(&results);
        info!(intent = %results[best].intent, confidence = results[best].confidence, "comparison finished");
        Ok(Comparison { results, best })
    }

    async fn format_candidate(&self, candidate: String) -> String {
        let Some(formatter) = &self.formatter else {
            return candidate;
        };
        match format_blocking(formatter.clone(), candidate.clone()).await {
            Ok(formatted) if validate_syntax(&formatted).ok => formatted,
            Ok(_) => {
                warn!(formatter = formatter.name(), "formatted code failed validation, keeping original");
                candidate
            }
            Err(e) => {
                warn!(formatter = formatter.name(), error = %e, "formatting skipped");
                candidate
            }
        }
    }
}

fn transition(state: &mut LoopState, next: LoopState, intent: TransformationIntent) {
    debug!(%intent, from = %state, to = %next, "loop transition");
    *state = next;
}

fn next_after_rejection(iteration: u32, max_iterations: u32) -> LoopState {
    if iteration < max_iterations {
        LoopState::Retrying
    } else {
        LoopState::Failed
    }
}

fn rejected(iteration: u32, max_iterations: u32, confidence: f64, reason: &str) -> IterationRecord {
    let outcome = match next_after_rejection(iteration, max_iterations) {
        LoopState::Retrying => IterationOutcome::Retrying,
        _ => IterationOutcome::Failed,
    };
    IterationRecord {
        iteration,
        outcome,
        confidence,
        rejection: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LineRange, MetricsSnapshot};

    const SUM_LOOP: &str = "def s(n): t=0\nfor i in range(len(n)): t=t+n[i]\nreturn t";

    #[test]
    fn test_assessment_of_good_candidate() {
        let assessment = assess_candidate(SUM_LOOP, "def s(n): return sum(n)", false);
        assert!(assessment.accepted);
        assert!(assessment.preservation.preserved);
        assert!(assessment.confidence > 0.5);
    }

    #[test]
    fn test_assessment_is_repeatable() {
        let a = assess_candidate(SUM_LOOP, "def s(n): return sum(n)", false);
        let b = assess_candidate(SUM_LOOP, "def s(n): return sum(n)", false);
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_candidate_scores_zero() {
        let assessment = assess_candidate(SUM_LOOP, "def s(n: return", false);
        assert_eq!(assessment.confidence, 0.0);
        assert!(!assessment.accepted);
        assert!(assessment.rejection.unwrap().contains("not valid Python"));
    }

    #[test]
    fn test_signature_change_needs_permission() {
        let candidate = "def s(n, start): return sum(n, start)";
        assert!(!assess_candidate(SUM_LOOP, candidate, false).accepted);
        let allowed = assess_candidate(SUM_LOOP, candidate, true);
        assert!(allowed.accepted);
        assert!(allowed.confidence < 0.7);
    }

    #[test]
    fn test_assemble_drops_inconsistent_changes() {
        let proposed = vec![
            ChangeRecord::new("performance", "use sum").with_snippets(None, Some("sum(n)".to_string())),
            ChangeRecord::new("performance", "use numpy").with_snippets(None, Some("np.sum".to_string())),
        ];
        let changes = assemble_changes(SUM_LOOP, "def s(n): return sum(n)", proposed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].lines, Some(LineRange { start: 1, end: 1 }));
    }

    #[test]
    fn test_identical_candidate_has_no_changes() {
        let proposed = vec![ChangeRecord::new("general", "nothing")];
        assert!(assemble_changes(SUM_LOOP, SUM_LOOP, proposed).is_empty());
    }

    fn result(intent: TransformationIntent, confidence: f64, changes: usize) -> TransformationResult {
        TransformationResult {
            original_code: String::new(),
            final_code: String::new(),
            changes: (0..changes).map(|i| ChangeRecord::new("general", format!("c{}", i))).collect(),
            metrics_before: MetricsSnapshot::default(),
            metrics_after: MetricsSnapshot::default(),
            confidence,
            best_attempt_confidence: confidence,
            iterations: 1,
            intent,
            status: TransformationStatus::Accepted,
            attempts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_select_best_prefers_confidence_then_fewer_changes() {
        let results = vec![
            result(TransformationIntent::Performance, 0.8, 3),
            result(TransformationIntent::Memory, 0.9, 2),
            result(TransformationIntent::Readability, 0.9, 1),
            result(TransformationIntent::General, 0.9, 1),
        ];
        assert_eq!(select_best(&results), 2);
    }
}
