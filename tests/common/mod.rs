#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use reforge::contexts::{GenerationError, GenerationOptions, Generator, SmellLinter};
use reforge::registries::{FileAgentModelRegistry, FileAgentRegistry};
use reforge::Reforge;

/// Replays queued replies in order and records every prompt it receives
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<String, GenerationError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _model: &str,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::ServiceError("script exhausted".to_string())))
    }
}

/// Answers every prompt with the same reply
pub struct FixedGenerator(pub String);

#[async_trait]
impl Generator for FixedGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _model: &str,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        Ok(self.0.clone())
    }
}

pub const SUM_LOOP: &str = "def s(n): t=0\nfor i in range(len(n)): t=t+n[i]\nreturn t";

pub const SUM_REPLY: &str =
    "Here is a faster version:\n```python\ndef s(n): return sum(n)\n```\n- replaced loop with built-in sum\n";

/// Framework over built-in templates and the registry file in `dir`, with
/// the in-process linter so no external tool is spawned
pub fn framework(generator: Arc<dyn Generator>, dir: &Path) -> Reforge {
    Reforge::new(
        generator,
        Arc::new(FileAgentRegistry::new(Some(dir.to_path_buf()))),
        Arc::new(FileAgentModelRegistry::new(
            Some(dir.join("model_registry.yml")),
            None,
            None,
        )),
    )
    .with_linter(Arc::new(SmellLinter))
}
