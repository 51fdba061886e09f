use crate::contexts::{AgentModelRegistry, Model, RegistryError, DEFAULT_MODEL};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use yaml_rust::Yaml;

/// Agent configuration from the registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub model: String,
    pub parallel: bool,
    pub max_tokens: Option<u32>,
}

/// File-based implementation of AgentModelRegistry
/// Loads agent-to-model mappings from a YAML file
#[derive(Clone)]
pub struct FileAgentModelRegistry {
    registry_path: PathBuf,
    default_model: String,
    default_parallel: bool,
}

impl FileAgentModelRegistry {
    /// Creates a new FileAgentModelRegistry
    ///
    /// # Arguments
    /// * `registry_path` - Optional path to registry file (defaults to "agents/model_registry.yml")
    /// * `default_model` - Model used for agents missing from the registry
    /// * `default_parallel` - Parallel setting for agents missing from the registry
    pub fn new(
        registry_path: Option<PathBuf>,
        default_model: Option<String>,
        default_parallel: Option<bool>,
    ) -> Self {
        Self {
            registry_path: registry_path
                .unwrap_or_else(|| PathBuf::from("agents/model_registry.yml")),
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            default_parallel: default_parallel.unwrap_or(false),
        }
    }

    /// Loads the registry from the file; a missing file is an empty registry
    fn load_registry(&self) -> Result<HashMap<String, AgentConfig>, RegistryError> {
        if !self.registry_path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&self.registry_path).map_err(|e| {
            RegistryError::ReadFailed(format!("{}: {}", self.registry_path.display(), e))
        })?;

        parse_registry(&content, &self.default_model, self.default_parallel)
    }
}

impl AgentModelRegistry for FileAgentModelRegistry {
    fn get_model(&self, agent_name: &str) -> Result<Model, RegistryError> {
        let registry = self.load_registry()?;

        let config = registry.get(agent_name).cloned().unwrap_or_else(|| AgentConfig {
            model: self.default_model.clone(),
            parallel: self.default_parallel,
            max_tokens: None,
        });

        Ok(Model {
            name: config.model,
            parallel: config.parallel,
            max_tokens: config.max_tokens,
        })
    }
}

/// Parses the YAML registry file into a HashMap
/// Each entry is either a model name or `{ model, parallel, max_tokens }`
fn parse_registry(
    yaml_content: &str,
    default_model: &str,
    default_parallel: bool,
) -> Result<HashMap<String, AgentConfig>, RegistryError> {
    use yaml_rust::YamlLoader;

    let docs = YamlLoader::load_from_str(yaml_content)
        .map_err(|e| RegistryError::InvalidRegistry(format!("Invalid registry YAML: {}", e)))?;

    let Some(doc) = docs.first() else {
        return Ok(HashMap::new());
    };

    let mut registry = HashMap::new();
    let Some(hash) = doc.as_hash() else {
        return Ok(registry);
    };

    for (key, value) in hash {
        let Some(k) = key.as_str() else {
            continue;
        };
        let config = if let Some(v_str) = value.as_str() {
            AgentConfig {
                model: v_str.to_string(),
                parallel: default_parallel,
                max_tokens: None,
            }
        } else if let Some(v_hash) = value.as_hash() {
            let field = |name: &str| v_hash.get(&Yaml::String(name.to_string()));

            let model = field("model")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| default_model.to_string());
            let parallel = field("parallel")
                .and_then(|v| v.as_bool())
                .unwrap_or(default_parallel);
            let max_tokens = match field("max_tokens") {
                None | Some(Yaml::Null) => None,
                Some(v) => Some(
                    v.as_i64()
                        .and_then(|n| u32::try_from(n).ok())
                        .filter(|n| *n > 0)
                        .ok_or_else(|| {
                            RegistryError::InvalidRegistry(format!(
                                "max_tokens for '{}' must be a positive integer",
                                k
                            ))
                        })?,
                ),
            };

            AgentConfig {
                model,
                parallel,
                max_tokens,
            }
        } else {
            AgentConfig {
                model: default_model.to_string(),
                parallel: default_parallel,
                max_tokens: None,
            }
        };

        registry.insert(k.to_string(), config);
    }

    Ok(registry)
}
