use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::generation::{generate_bounded, GenerationError, GenerationOptions, Generator, DEFAULT_TIMEOUT};

/// Errors that can occur while populating an agent's prompt template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulateError {
    MissingMandatoryPlaceholder(String),
    InvalidPlaceholderPath(String),
    AgentNotFound(String),
    InvalidSpecification(String),
}

impl fmt::Display for PopulateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PopulateError::MissingMandatoryPlaceholder(ph) => {
                write!(f, "Required placeholder '{}' could not be resolved", ph)
            }
            PopulateError::InvalidPlaceholderPath(path) => {
                write!(f, "Invalid path '{}' in placeholder", path)
            }
            PopulateError::AgentNotFound(name) => {
                write!(f, "Agent '{}' not found in registry", name)
            }
            PopulateError::InvalidSpecification(details) => {
                write!(f, "Agent specification is invalid: {}", details)
            }
        }
    }
}

impl std::error::Error for PopulateError {}

/// Errors raised while reading the model registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    ReadFailed(String),
    InvalidRegistry(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistryError::ReadFailed(details) => {
                write!(f, "Failed to read model registry: {}", details)
            }
            RegistryError::InvalidRegistry(details) => {
                write!(f, "Model registry is invalid: {}", details)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors that can occur in the agent runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRunnerError {
    Populate(PopulateError),
    Registry(RegistryError),
    Generation(GenerationError),
}

impl fmt::Display for AgentRunnerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AgentRunnerError::Populate(e) => write!(f, "{}", e),
            AgentRunnerError::Registry(e) => write!(f, "{}", e),
            AgentRunnerError::Generation(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AgentRunnerError {}

impl From<PopulateError> for AgentRunnerError {
    fn from(e: PopulateError) -> Self {
        AgentRunnerError::Populate(e)
    }
}

impl From<RegistryError> for AgentRunnerError {
    fn from(e: RegistryError) -> Self {
        AgentRunnerError::Registry(e)
    }
}

impl From<GenerationError> for AgentRunnerError {
    fn from(e: GenerationError) -> Self {
        AgentRunnerError::Generation(e)
    }
}

/// The model an agent runs on, with its execution settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub name: String,
    pub parallel: bool,
    pub max_tokens: Option<u32>,
}

/// Trait for loading prompt templates by agent name
pub trait AgentRegistry: Send + Sync {
    fn get_specification(&self, agent_name: &str) -> Result<String, PopulateError>;
}

/// Trait for resolving execution models by agent name
pub trait AgentModelRegistry: Send + Sync {
    fn get_model(&self, agent_name: &str) -> Result<Model, RegistryError>;
}

/// Runs named agents: template population from the registry, model
/// resolution, then one bounded generation call.
///
/// Cloning is cheap; every clone shares the same registries and generator.
#[derive(Clone)]
pub struct AgentRunner {
    agent_registry: Arc<dyn AgentRegistry>,
    agent_model_registry: Arc<dyn AgentModelRegistry>,
    generator: Arc<dyn Generator>,
    model_override: Option<String>,
    timeout: Duration,
    cancel: Option<watch::Receiver<bool>>,
}

impl AgentRunner {
    pub fn new(
        agent_registry: Arc<dyn AgentRegistry>,
        agent_model_registry: Arc<dyn AgentModelRegistry>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            agent_registry,
            agent_model_registry,
            generator,
            model_override: None,
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forces one model name for every agent (registry settings still apply)
    pub fn with_model_override(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }

    /// Generation calls stop with `Timeout` once `true` is sent on the channel
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Role method: agent.populate
    ///
    /// Loads the agent's template and fills it with values from `input`.
    pub fn populate<T: Serialize>(&self, agent: &str, input: &T) -> Result<String, PopulateError> {
        let template = self.agent_registry.get_specification(agent)?;
        let input_json = serde_json::to_value(input)
            .map_err(|e| PopulateError::InvalidSpecification(e.to_string()))?;
        replace_placeholders(&template, &input_json)
    }

    /// Role method: agent.model
    pub fn model(&self, agent: &str) -> Result<Model, RegistryError> {
        let mut model = self.agent_model_registry.get_model(agent)?;
        if let Some(name) = &self.model_override {
            model.name = name.clone();
        }
        Ok(model)
    }

    /// Role method: agent.execute
    ///
    /// A single bounded call; retry decisions belong to the caller.
    pub async fn execute(&self, prompt: &str, model: &Model) -> Result<String, GenerationError> {
        debug!(model = %model.name, "executing agent");
        let options = GenerationOptions {
            max_tokens: model.max_tokens,
        };
        generate_bounded(
            self.generator.as_ref(),
            prompt,
            &model.name,
            &options,
            self.timeout,
            self.cancel.clone(),
        )
        .await
    }

    /// Populates, resolves the model and executes in one step
    pub async fn run<T: Serialize>(&self, agent: &str, input: &T) -> Result<String, AgentRunnerError> {
        let prompt = self.populate(agent, input)?;
        let model = self.model(agent)?;
        Ok(self.execute(&prompt, &model).await?)
    }
}

/// Replaces placeholders in a template
///
/// Supports:
/// - Mandatory: {{input.prop_name}}
/// - Optional: {{input.prop_name?}}
/// - Nested: {{input.prop1.prop2}}
///
/// Substituted text is never rescanned, so code containing `{{` is safe.
pub fn replace_placeholders(template: &str, input: &serde_json::Value) -> Result<String, PopulateError> {
    let mut result = template.to_string();
    let mut offset = 0;

    while let Some(found) = result[offset..].find("{{") {
        let start = offset + found;
        let Some(end_pos) = result[start..].find("}}") else {
            break;
        };
        let end = start + end_pos;

        let placeholder = result[start + 2..end].trim().to_string();
        let (path, is_optional) = match placeholder.strip_suffix('?') {
            Some(path) => (path, true),
            None => (placeholder.as_str(), false),
        };

        match resolve_path(input, path)? {
            Some(v) => {
                let replacement = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Null => String::new(),
                    _ => serde_json::to_string(v)
                        .map_err(|e| PopulateError::InvalidSpecification(e.to_string()))?,
                };
                result.replace_range(start..end + 2, &replacement);
                offset = start + replacement.len();
            }
            None if is_optional => {
                result.replace_range(start..end + 2, "");
                offset = start;
            }
            None => {
                return Err(PopulateError::MissingMandatoryPlaceholder(path.to_string()));
            }
        }
    }

    Ok(result)
}

/// Resolves a dotted `input.a.b` path; `Ok(None)` when a segment is absent
fn resolve_path<'a>(
    value: &'a serde_json::Value,
    path: &str,
) -> Result<Option<&'a serde_json::Value>, PopulateError> {
    let mut parts = path.split('.');
    if parts.next() != Some("input") {
        return Err(PopulateError::InvalidPlaceholderPath(path.to_string()));
    }

    let mut current = value;
    for part in parts {
        match current.get(part) {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}
