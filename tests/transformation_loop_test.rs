mod common;

use std::sync::Arc;

use common::{framework, FixedGenerator, ScriptedGenerator, SUM_LOOP, SUM_REPLY};
use reforge::contexts::{Formatter, GenerationError, ToolError, TransformError, WhitespaceFormatter};
use reforge::data::{
    FailureReason, IterationOutcome, TransformationIntent, TransformationRequest, ALLOW_SIGNATURE_CHANGES,
};
use serde_json::json;

fn sum_request() -> TransformationRequest {
    TransformationRequest::new(SUM_LOOP, "make it faster").unwrap()
}

#[tokio::test]
async fn test_sum_loop_becomes_builtin_sum() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(vec![Ok(SUM_REPLY.to_string())]);
    let reforge = framework(generator.clone(), dir.path());

    let result = reforge.optimize(&sum_request()).await.unwrap();

    assert!(result.is_accepted());
    assert_eq!(result.intent, TransformationIntent::Performance);
    assert_eq!(result.final_code, "def s(n): return sum(n)");
    assert_eq!(result.changes.len(), 1);
    assert_eq!(result.changes[0].category, "performance");
    assert!(result.confidence > 0.5);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.metrics_after.function_count, 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_malformed_replies_exhaust_budget() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(vec![
        Ok("Sorry, I cannot help with that.".to_string()),
        Ok("Still no idea.".to_string()),
    ]);
    let reforge = framework(generator.clone(), dir.path());
    let request = sum_request().with_max_iterations(2).unwrap();

    let result = reforge.optimize(&request).await.unwrap();

    assert!(!result.is_accepted());
    assert!(matches!(result.failure(), Some(FailureReason::OptimizationFailed(_))));
    assert_eq!(result.final_code, SUM_LOOP);
    assert!(result.changes.is_empty());
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.iterations, 2);
    let outcomes: Vec<IterationOutcome> = result.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![IterationOutcome::Retrying, IterationOutcome::Failed]);

    let prompts = generator.prompts();
    assert!(!prompts[0].contains("previous answer was rejected"));
    assert!(prompts[1].contains("the reply contained no code block"));
}

#[tokio::test]
async fn test_single_iteration_never_retries() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(vec![
        Ok("no code here".to_string()),
        Ok(SUM_REPLY.to_string()),
    ]);
    let reforge = framework(generator.clone(), dir.path());
    let request = sum_request().with_max_iterations(1).unwrap();

    let result = reforge.optimize(&request).await.unwrap();

    assert!(!result.is_accepted());
    assert_eq!(result.iterations, 1);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.attempts[0].outcome, IterationOutcome::Failed);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_retryable_error_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(vec![
        Err(GenerationError::Timeout),
        Ok(SUM_REPLY.to_string()),
    ]);
    let reforge = framework(generator.clone(), dir.path());

    let result = reforge.optimize(&sum_request()).await.unwrap();

    assert!(result.is_accepted());
    assert_eq!(result.iterations, 2);
    assert_eq!(result.attempts[0].outcome, IterationOutcome::Retrying);
    assert_eq!(result.attempts[1].outcome, IterationOutcome::Accepted);
}

#[tokio::test]
async fn test_rate_limit_is_returned_to_caller() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(vec![Err(GenerationError::RateLimited)]);
    let reforge = framework(generator.clone(), dir.path());

    let outcome = reforge.optimize(&sum_request()).await;

    assert_eq!(
        outcome.unwrap_err(),
        TransformError::Generation(GenerationError::RateLimited)
    );
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_invalid_input_skips_generation() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(vec![Ok(SUM_REPLY.to_string())]);
    let reforge = framework(generator.clone(), dir.path());
    let request = TransformationRequest::new("def broken(:\n    pass", "make it faster").unwrap();

    let result = reforge.optimize(&request).await.unwrap();

    assert!(matches!(result.failure(), Some(FailureReason::InvalidInput(_))));
    assert_eq!(result.iterations, 0);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_signature_change_rejected_unless_allowed() {
    let reply = "```python\ndef s(n, start): return sum(n, start)\n```\n".to_string();

    let dir = tempfile::tempdir().unwrap();
    let strict = framework(Arc::new(FixedGenerator(reply.clone())), dir.path());
    let request = sum_request().with_max_iterations(1).unwrap();
    let result = strict.optimize(&request).await.unwrap();
    assert!(!result.is_accepted());
    assert!(result.best_attempt_confidence > 0.0);
    assert!(result.attempts[0].rejection.as_deref().unwrap().contains("signatures"));

    let relaxed = framework(Arc::new(FixedGenerator(reply)), dir.path());
    let request = sum_request()
        .with_max_iterations(1)
        .unwrap()
        .with_constraint(ALLOW_SIGNATURE_CHANGES, json!(true));
    let result = relaxed.optimize(&request).await.unwrap();
    assert!(result.is_accepted());
}

#[tokio::test]
async fn test_accepted_code_is_formatted() {
    let dir = tempfile::tempdir().unwrap();
    let reply = "```python\ndef s(n): return sum(n)   \n\n\n\n```\n- use built-in sum\n".to_string();
    let reforge = framework(Arc::new(FixedGenerator(reply)), dir.path())
        .with_formatter(Arc::new(WhitespaceFormatter));

    let result = reforge.optimize(&sum_request()).await.unwrap();

    assert!(result.is_accepted());
    assert_eq!(result.final_code, "def s(n): return sum(n)\n");
}

struct BreakingFormatter;

impl Formatter for BreakingFormatter {
    fn name(&self) -> &str {
        "breaking"
    }

    fn format(&self, _code: &str) -> Result<String, ToolError> {
        Ok("def s(n: return".to_string())
    }
}

#[tokio::test]
async fn test_formatter_output_must_still_validate() {
    let dir = tempfile::tempdir().unwrap();
    let reforge = framework(Arc::new(FixedGenerator(SUM_REPLY.to_string())), dir.path())
        .with_formatter(Arc::new(BreakingFormatter));

    let result = reforge.optimize(&sum_request()).await.unwrap();

    assert!(result.is_accepted());
    assert_eq!(result.final_code, "def s(n): return sum(n)");
}

#[tokio::test]
async fn test_compare_all_runs_every_intent() {
    let dir = tempfile::tempdir().unwrap();
    let reforge = framework(Arc::new(FixedGenerator(SUM_REPLY.to_string())), dir.path());

    let comparison = reforge.compare_all(&sum_request()).await.unwrap();

    let intents: Vec<TransformationIntent> = comparison.results.iter().map(|r| r.intent).collect();
    assert_eq!(intents, TransformationIntent::ALL.to_vec());
    assert!(comparison.results.iter().all(|r| r.is_accepted()));
    assert_eq!(comparison.best().intent, TransformationIntent::Performance);
}
