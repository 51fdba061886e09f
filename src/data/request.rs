use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::intent::{select_intent, TransformationIntent};

/// Default iteration budget for a transformation
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Constraint key that lets a candidate change function/class signatures
pub const ALLOW_SIGNATURE_CHANGES: &str = "allow_signature_changes";

/// Errors raised when a request is rejected before any generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    EmptyCode,
    EmptyQuery,
    ZeroIterations,
    UnknownIntent(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InputError::EmptyCode => write!(f, "Source code must not be empty"),
            InputError::EmptyQuery => write!(f, "Query must not be empty"),
            InputError::ZeroIterations => write!(f, "max_iterations must be at least 1"),
            InputError::UnknownIntent(name) => write!(f, "Unknown intent '{}'", name),
        }
    }
}

impl std::error::Error for InputError {}

/// A validated transformation request.
///
/// Fields are private so a request can only be built through the checked
/// constructors; once built it is never modified.
#[derive(Debug, Clone, Serialize)]
pub struct TransformationRequest {
    code: String,
    query: String,
    intent: TransformationIntent,
    constraints: BTreeMap<String, serde_json::Value>,
    max_iterations: u32,
}

impl TransformationRequest {
    /// Builds a request whose intent is inferred from the query
    pub fn new(code: impl Into<String>, query: impl Into<String>) -> Result<Self, InputError> {
        let code = code.into();
        let query = query.into();
        if code.trim().is_empty() {
            return Err(InputError::EmptyCode);
        }
        if query.trim().is_empty() {
            return Err(InputError::EmptyQuery);
        }
        let intent = select_intent(&query);
        Ok(Self {
            code,
            query,
            intent,
            constraints: BTreeMap::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    /// Overrides the inferred intent
    pub fn with_intent(mut self, intent: TransformationIntent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Result<Self, InputError> {
        if max_iterations == 0 {
            return Err(InputError::ZeroIterations);
        }
        self.max_iterations = max_iterations;
        Ok(self)
    }

    pub fn with_constraint(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.constraints.insert(name.into(), value);
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn intent(&self) -> TransformationIntent {
        self.intent
    }

    pub fn constraints(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.constraints
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Whether the caller allows candidates to change signatures
    pub fn allows_signature_changes(&self) -> bool {
        self.constraints
            .get(ALLOW_SIGNATURE_CHANGES)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Renders constraints as `name: value` lines for prompts
    pub fn constraints_text(&self) -> Option<String> {
        if self.constraints.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .constraints
            .iter()
            .map(|(name, value)| match value {
                serde_json::Value::String(s) => format!("- {}: {}", name, s),
                other => format!("- {}: {}", name, other),
            })
            .collect();
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_rejects_empty_fields() {
        assert_eq!(
            TransformationRequest::new("   ", "faster").unwrap_err(),
            InputError::EmptyCode
        );
        assert_eq!(
            TransformationRequest::new("x = 1", "\n").unwrap_err(),
            InputError::EmptyQuery
        );
    }

    #[test]
    fn test_request_defaults() {
        let request = TransformationRequest::new("x = 1", "make it faster").unwrap();
        assert_eq!(request.intent(), TransformationIntent::Performance);
        assert_eq!(request.max_iterations(), DEFAULT_MAX_ITERATIONS);
        assert!(request.constraints().is_empty());
        assert!(!request.allows_signature_changes());
    }

    #[test]
    fn test_request_zero_iterations_rejected() {
        let request = TransformationRequest::new("x = 1", "faster").unwrap();
        assert_eq!(
            request.with_max_iterations(0).unwrap_err(),
            InputError::ZeroIterations
        );
    }

    #[test]
    fn test_request_constraints() {
        let request = TransformationRequest::new("x = 1", "faster")
            .unwrap()
            .with_constraint(ALLOW_SIGNATURE_CHANGES, json!(true))
            .with_constraint("target", json!("python3.12"));
        assert!(request.allows_signature_changes());
        let text = request.constraints_text().unwrap();
        assert!(text.contains("- allow_signature_changes: true"));
        assert!(text.contains("- target: python3.12"));
    }

    #[test]
    fn test_request_serializes_for_reports() {
        let request = TransformationRequest::new("x = 1", "make it faster")
            .unwrap()
            .with_max_iterations(2)
            .unwrap();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["code"], json!("x = 1"));
        assert_eq!(value["intent"], serde_json::to_value(TransformationIntent::Performance).unwrap());
        assert_eq!(value["max_iterations"], json!(2));
    }
}
