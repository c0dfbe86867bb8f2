use crate::error::{CapabilityError, EngineError};
use crate::events::GraphEvent;
use crate::recipe::Recipe;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Default bound on concurrently executing nodes within one run.
pub const DEFAULT_MAX_PARALLEL_NODES: usize = 8;

/// Reply from an agent invocation.
///
/// Outputs travel through the event stream and the resume snapshot, so very
/// large payloads are discouraged: store them externally and return an
/// `artifact_id` reference instead.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub content: Value,
    pub cost: Option<f64>,
}

impl AgentReply {
    pub fn new(content: impl Into<Value>) -> Self {
        Self {
            content: content.into(),
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Receiver for incremental output chunks. The runner forwards every pushed
/// chunk as a `NODE_STREAM` event before the node's `NODE_DONE`.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn push(&self, chunk: &str);
}

/// Sink for call sites that do not forward chunks (council voters, the
/// synthesizer).
pub struct NullChunkSink;

#[async_trait]
impl ChunkSink for NullChunkSink {
    async fn push(&self, _chunk: &str) {}
}

/// Executes a named agent. May stream incremental chunks through the sink
/// before returning the final reply.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn invoke(
        &self,
        agent_name: &str,
        inputs: &Value,
        overrides: Option<&Value>,
        stream: &dyn ChunkSink,
    ) -> Result<AgentReply, CapabilityError>;
}

/// Executes a named deterministic tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, args: &Value) -> Result<Value, CapabilityError>;
}

/// Waits for an external decision on a human node.
///
/// `timeout_ms` is informational for the gate (countdown display and the
/// like); the runner enforces the deadline itself and surfaces expiry as
/// `HUMAN_TIMEOUT`.
#[async_trait]
pub trait HumanGate: Send + Sync {
    async fn await_decision(
        &self,
        node_id: &str,
        inputs: &Value,
        timeout_ms: Option<u64>,
    ) -> Result<Value, CapabilityError>;
}

/// Parses an untyped manifest into a typed [`Recipe`].
pub trait ManifestValidator: Send + Sync {
    fn parse(&self, raw: &Value) -> Result<Recipe, EngineError>;
}

/// Best-effort observer of every emitted event. Implementations must swallow
/// their own failures; the run never fails because a sink does.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &GraphEvent);
}

/// Everything a run needs from the outside world, injected per execution.
#[derive(Clone)]
pub struct ExecutionContext {
    pub user_id: String,
    pub trace_id: String,
    /// Decrypted secrets passed through to capabilities. Never logged.
    pub secrets_map: HashMap<String, String>,
    pub agent_executor: Arc<dyn AgentExecutor>,
    pub tool_executor: Arc<dyn ToolExecutor>,
    pub human_gate: Arc<dyn HumanGate>,
    pub audit_sink: Option<Arc<dyn AuditSink>>,
    pub max_parallel_nodes: usize,
    /// Applied to human nodes that declare no `timeout_ms`. `None` waits
    /// indefinitely.
    pub default_human_timeout_ms: Option<u64>,
}

impl ExecutionContext {
    pub fn new(
        user_id: impl Into<String>,
        trace_id: impl Into<String>,
        agent_executor: Arc<dyn AgentExecutor>,
        tool_executor: Arc<dyn ToolExecutor>,
        human_gate: Arc<dyn HumanGate>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            trace_id: trace_id.into(),
            secrets_map: HashMap::new(),
            agent_executor,
            tool_executor,
            human_gate,
            audit_sink: None,
            max_parallel_nodes: DEFAULT_MAX_PARALLEL_NODES,
            default_human_timeout_ms: None,
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_max_parallel_nodes(mut self, max: usize) -> Self {
        self.max_parallel_nodes = max;
        self
    }

    pub fn with_secrets(mut self, secrets: HashMap<String, String>) -> Self {
        self.secrets_map = secrets;
        self
    }

    pub fn with_default_human_timeout_ms(mut self, ms: u64) -> Self {
        self.default_human_timeout_ms = Some(ms);
        self
    }
}

/// Default manifest validator backed by serde.
///
/// Checks the node discriminators up front so a bad `type` tag surfaces as
/// `UNKNOWN_NODE_KIND` rather than a generic deserialization failure, then
/// enforces the Major.Minor.Patch version format the manifest contract fixes.
pub struct SerdeManifestValidator;

const KNOWN_NODE_KINDS: [&str; 3] = ["agent", "human", "logic"];

impl ManifestValidator for SerdeManifestValidator {
    fn parse(&self, raw: &Value) -> Result<Recipe, EngineError> {
        if let Some(nodes) = raw.pointer("/graph/nodes").and_then(Value::as_array) {
            for node in nodes {
                if let Some(kind) = node.get("type").and_then(Value::as_str) {
                    if !KNOWN_NODE_KINDS.contains(&kind) {
                        return Err(EngineError::UnknownNodeKind(kind.to_string()));
                    }
                }
            }
        }

        let recipe: Recipe = serde_json::from_value(raw.clone())
            .map_err(|e| EngineError::ManifestInvalid(e.to_string()))?;

        if !is_semver(&recipe.version) {
            return Err(EngineError::ManifestInvalid(format!(
                "version '{}' is not Major.Minor.Patch",
                recipe.version
            )));
        }

        Ok(recipe)
    }
}

fn is_semver(version: &str) -> bool {
    let mut parts = 0;
    for part in version.split('.') {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    parts == 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semver_check() {
        assert!(is_semver("1.0.0"));
        assert!(is_semver("12.3.456"));
        assert!(!is_semver("1.0"));
        assert!(!is_semver("1.0.0-beta"));
        assert!(!is_semver("a.b.c"));
    }
}
