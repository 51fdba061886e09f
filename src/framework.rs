//! The framework instance: one configured set of collaborators reused for
//! one-shot calls, comparisons, batches and debugging.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::contexts::{
    run_and_capture, AgentModelRegistry, AgentRegistry, AgentRunner, CheckReport, Comparison,
    Debugger, Formatter, Generator, IntoErrorContext, Linter, LinterChain, SessionStore,
    TransformError, TransformationLoop, BATCH_AGENT,
};
use crate::data::{ErrorContext, Session, TransformationRequest, TransformationResult};
use crate::registries::{FileAgentModelRegistry, FileAgentRegistry};

/// One named unit of a batch
#[derive(Debug)]
pub struct BatchItem {
    pub name: String,
    pub outcome: Result<TransformationResult, TransformError>,
}

/// Owns the generator, registries, tooling and the session history.
///
/// Sessions live as long as the instance (and its clones) and are only
/// removed by [`Reforge::reset_sessions`].
#[derive(Clone)]
pub struct Reforge {
    runner: AgentRunner,
    model_registry: Arc<dyn AgentModelRegistry>,
    formatter: Option<Arc<dyn Formatter>>,
    linter: Arc<dyn Linter>,
    sessions: Arc<SessionStore>,
}

impl Reforge {
    pub fn new(
        generator: Arc<dyn Generator>,
        agent_registry: Arc<dyn AgentRegistry>,
        model_registry: Arc<dyn AgentModelRegistry>,
    ) -> Self {
        Self {
            runner: AgentRunner::new(agent_registry, Arc::clone(&model_registry), generator),
            model_registry,
            formatter: None,
            linter: Arc::new(LinterChain::standard()),
            sessions: Arc::new(SessionStore::new()),
        }
    }

    /// Registries read from `agents_dir` (default `agents/`)
    pub fn from_agents_dir(generator: Arc<dyn Generator>, agents_dir: Option<PathBuf>) -> Self {
        let dir = agents_dir.unwrap_or_else(|| PathBuf::from("agents"));
        let agent_registry = FileAgentRegistry::new(Some(dir.clone()));
        let model_registry = FileAgentModelRegistry::new(Some(dir.join("model_registry.yml")), None, None);
        Self::new(generator, Arc::new(agent_registry), Arc::new(model_registry))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.runner = self.runner.with_timeout(timeout);
        self
    }

    pub fn with_model_override(mut self, model: Option<String>) -> Self {
        self.runner = self.runner.with_model_override(model);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.runner = self.runner.with_cancel(cancel);
        self
    }

    /// Accepted candidates are passed through `formatter`
    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn Linter>) -> Self {
        self.linter = linter;
        self
    }

    pub fn transformation_loop(&self) -> TransformationLoop {
        let transformation_loop = TransformationLoop::new(self.runner.clone());
        match &self.formatter {
            Some(formatter) => transformation_loop.with_formatter(Arc::clone(formatter)),
            None => transformation_loop,
        }
    }

    pub fn debugger(&self) -> Debugger {
        Debugger::new(self.runner.clone(), Arc::clone(&self.linter), Arc::clone(&self.sessions))
    }

    pub async fn optimize(&self, request: &TransformationRequest) -> Result<TransformationResult, TransformError> {
        self.transformation_loop().run(request).await
    }

    /// Builds the request from raw text and runs it
    pub async fn optimize_code(&self, code: &str, query: &str) -> Result<TransformationResult, TransformError> {
        let request = TransformationRequest::new(code, query)?;
        self.optimize(&request).await
    }

    pub async fn compare_all(&self, request: &TransformationRequest) -> Result<Comparison, TransformError> {
        self.transformation_loop().compare_all(request).await
    }

    pub async fn debug(&self, ctx: ErrorContext) -> Result<Session, TransformError> {
        self.debugger().diagnose(ctx).await
    }

    pub async fn check(&self, code: &str, with_review: bool) -> Result<CheckReport, TransformError> {
        self.debugger().check(code, with_review).await
    }

    /// Runs `work`; when it fails, the captured error is diagnosed.
    ///
    /// The inner `Err` carries the recorded session so the caller decides
    /// whether to re-raise, apply the patch or carry on.
    pub async fn run_guarded<T, E, F>(&self, source: &str, work: F) -> Result<Result<T, Session>, TransformError>
    where
        E: IntoErrorContext,
        F: FnOnce() -> Result<T, E>,
    {
        match run_and_capture(source, work) {
            Ok(value) => Ok(Ok(value)),
            Err(ctx) => Ok(Err(self.debug(ctx).await?)),
        }
    }

    /// Runs every request, in parallel when the `batch` registry entry says
    /// so; results keep the input order
    pub async fn batch(&self, items: Vec<(String, TransformationRequest)>) -> Result<Vec<BatchItem>, TransformError> {
        let parallel = self.model_registry.get_model(BATCH_AGENT)?.parallel;
        info!(items = items.len(), parallel, "starting batch");

        if !parallel {
            let mut results = Vec::with_capacity(items.len());
            for (name, request) in items {
                debug!(%name, "batch item");
                let outcome = self.optimize(&request).await;
                results.push(BatchItem { name, outcome });
            }
            return Ok(results);
        }

        let total = items.len();
        let mut tasks = JoinSet::new();
        let mut names = Vec::with_capacity(total);
        for (index, (name, request)) in items.into_iter().enumerate() {
            names.push(name);
            let this = self.clone();
            tasks.spawn(async move { (index, this.optimize(&request).await) });
        }

        let mut outcomes: Vec<Option<Result<TransformationResult, TransformError>>> =
            (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| TransformError::Aborted(e.to_string()))?;
            outcomes[index] = Some(outcome);
        }

        Ok(names
            .into_iter()
            .zip(outcomes)
            .map(|(name, outcome)| BatchItem {
                name,
                outcome: outcome
                    .unwrap_or_else(|| Err(TransformError::Aborted("batch item did not finish".to_string()))),
            })
            .collect())
    }

    /// Snapshot of the session history
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.history()
    }

    pub fn reset_sessions(&self) {
        self.sessions.clear();
    }
}
