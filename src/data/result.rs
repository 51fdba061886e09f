use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::change::ChangeRecord;
use super::intent::TransformationIntent;
use super::metrics::MetricsSnapshot;

/// Why a transformation ended without an accepted candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The input code itself failed syntax validation
    InvalidInput(String),
    /// The iteration budget ran out; carries the last rejection
    OptimizationFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureReason::InvalidInput(detail) => write!(f, "invalid_input: {}", detail),
            FailureReason::OptimizationFailed(detail) => {
                write!(f, "optimization_failed: {}", detail)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformationStatus {
    Accepted,
    Failed { failure: FailureReason },
}

/// What happened to a single GENERATING entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Accepted,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub outcome: IterationOutcome,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}

/// The assembled outcome of one transformation loop run.
///
/// Built once at the end of the run; the caller owns it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationResult {
    pub original_code: String,
    pub final_code: String,
    /// Insertion order is application order
    pub changes: Vec<ChangeRecord>,
    pub metrics_before: MetricsSnapshot,
    pub metrics_after: MetricsSnapshot,
    /// Confidence of the accepted iteration; 0.0 when nothing was accepted
    pub confidence: f64,
    /// Best confidence seen across all attempts, accepted or not
    pub best_attempt_confidence: f64,
    pub iterations: u32,
    pub intent: TransformationIntent,
    pub status: TransformationStatus,
    pub attempts: Vec<IterationRecord>,
    pub created_at: DateTime<Utc>,
}

impl TransformationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, TransformationStatus::Accepted)
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            TransformationStatus::Accepted => None,
            TransformationStatus::Failed { failure } => Some(failure),
        }
    }

    /// One-paragraph human summary used by the CLI
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        match &self.status {
            TransformationStatus::Accepted => lines.push(format!(
                "Accepted {} transformation after {} iteration(s) (confidence {:.2})",
                self.intent, self.iterations, self.confidence
            )),
            TransformationStatus::Failed { failure } => lines.push(format!(
                "Failed {} transformation after {} iteration(s): {}",
                self.intent, self.iterations, failure
            )),
        }
        lines.push(format!("  before: {}", self.metrics_before));
        lines.push(format!("  after:  {}", self.metrics_after));
        for change in &self.changes {
            match change.impact {
                Some(impact) => lines.push(format!(
                    "  - [{}|{}] {}",
                    change.category, impact, change.description
                )),
                None => lines.push(format!("  - [{}] {}", change.category, change.description)),
            }
        }
        lines.join("\n")
    }
}
