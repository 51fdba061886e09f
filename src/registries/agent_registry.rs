use crate::contexts::{builtin_template, AgentRegistry, PopulateError};
use std::fs;
use std::path::PathBuf;

/// File-based implementation of AgentRegistry
///
/// `agents/<name>.yml` overrides the built-in template of the same agent.
#[derive(Clone)]
pub struct FileAgentRegistry {
    agents_dir: PathBuf,
}

impl FileAgentRegistry {
    /// Creates a new FileAgentRegistry
    ///
    /// # Arguments
    /// * `agents_dir` - Optional path to agents directory (defaults to "agents")
    pub fn new(agents_dir: Option<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.unwrap_or_else(|| PathBuf::from("agents")),
        }
    }
}

impl AgentRegistry for FileAgentRegistry {
    fn get_specification(&self, agent_name: &str) -> Result<String, PopulateError> {
        let agent_path = self.agents_dir.join(format!("{}.yml", agent_name));

        if !agent_path.exists() {
            return builtin_template(agent_name)
                .map(str::to_string)
                .ok_or_else(|| PopulateError::AgentNotFound(agent_name.to_string()));
        }

        let content = fs::read_to_string(&agent_path).map_err(|e| {
            PopulateError::InvalidSpecification(format!(
                "Failed to read agent specification {}: {}",
                agent_path.display(),
                e
            ))
        })?;
        extract_system_prompt(&content)
    }
}

/// Extracts the system_prompt field from a YAML agent specification
fn extract_system_prompt(yaml_content: &str) -> Result<String, PopulateError> {
    use yaml_rust::YamlLoader;

    let docs = YamlLoader::load_from_str(yaml_content)
        .map_err(|e| PopulateError::InvalidSpecification(format!("Invalid YAML: {}", e)))?;

    let Some(doc) = docs.first() else {
        return Err(PopulateError::InvalidSpecification(
            "Empty YAML document".to_string(),
        ));
    };

    doc["system_prompt"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            PopulateError::InvalidSpecification(
                "No system_prompt field found in agent specification".to_string(),
            )
        })
}
