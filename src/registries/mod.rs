mod agent_model_registry;
mod agent_registry;

pub use agent_model_registry::{AgentConfig, FileAgentModelRegistry};
pub use agent_registry::FileAgentRegistry;
