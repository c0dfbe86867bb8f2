use crate::runner::{EventStream, WorkflowRunner};
use crate::topology::Topology;
use maestrocore::{EngineError, ExecutionContext, ManifestValidator, Snapshot};
use serde_json::Value;
use std::sync::Arc;

type RunnerFactory = Box<dyn Fn() -> WorkflowRunner + Send + Sync>;

/// Thin entry point for executing recipes.
///
/// Holds a manifest validator and a runner *factory*, never a runner: every
/// invocation gets a fresh single-use runner, so state can never leak between
/// runs. Validation and topology errors return synchronously, before the
/// stream opens; no events are emitted for them.
pub struct Controller {
    validator: Arc<dyn ManifestValidator>,
    runner_factory: RunnerFactory,
}

impl Controller {
    pub fn new(validator: Arc<dyn ManifestValidator>) -> Self {
        Self {
            validator,
            runner_factory: Box::new(WorkflowRunner::new),
        }
    }

    pub fn with_runner_factory(
        validator: Arc<dyn ManifestValidator>,
        runner_factory: impl Fn() -> WorkflowRunner + Send + Sync + 'static,
    ) -> Self {
        Self {
            validator,
            runner_factory: Box::new(runner_factory),
        }
    }

    /// Validates the manifest, builds the topology, and starts a fresh run.
    /// Must be called within a tokio runtime.
    pub fn execute_recipe(
        &self,
        manifest: &Value,
        inputs: Value,
        context: ExecutionContext,
        snapshot: Option<Snapshot>,
    ) -> Result<EventStream, EngineError> {
        let recipe = self.validator.parse(manifest)?;
        let topology = Topology::build(&recipe)?;
        let runner = (self.runner_factory)();
        Ok(runner.run(topology, context, inputs, snapshot))
    }
}
