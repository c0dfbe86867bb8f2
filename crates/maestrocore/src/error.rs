use thiserror::Error;

/// Top-level error type for the engine.
///
/// Topology and manifest variants surface synchronously from the controller,
/// before any event is emitted. Execution variants become the single terminal
/// `ERROR` event of a run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("the workflow graph contains a cycle")]
    CyclicDependency,

    #[error("edge references undeclared node: {0}")]
    DanglingEdge(String),

    #[error("the workflow graph contains disconnected islands")]
    DisconnectedGraph,

    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("node '{node_id}' failed: {message}")]
    NodeExecutionFailed { node_id: String, message: String },

    #[error("human gate timed out for node '{0}'")]
    HumanTimeout(String),

    /// Internal: the consumer dropped the event stream. Never surfaced as an event.
    #[error("run cancelled")]
    Cancelled,

    #[error("unknown node kind: {0}")]
    UnknownNodeKind(String),
}

impl EngineError {
    /// Stable tag carried in the `ERROR` event's `error_kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::CyclicDependency => "CYCLIC_DEPENDENCY",
            EngineError::DanglingEdge(_) => "DANGLING_EDGE",
            EngineError::DisconnectedGraph => "DISCONNECTED_GRAPH",
            EngineError::ManifestInvalid(_) => "MANIFEST_INVALID",
            EngineError::NodeExecutionFailed { .. } => "NODE_EXECUTION_FAILED",
            EngineError::HumanTimeout(_) => "HUMAN_TIMEOUT",
            EngineError::Cancelled => "CANCELLED",
            EngineError::UnknownNodeKind(_) => "UNKNOWN_NODE_KIND",
        }
    }
}

/// Failure reported by an external capability (agent, tool, human gate).
///
/// Capabilities own their retry policy; whatever reaches the engine is wrapped
/// into `EngineError::NodeExecutionFailed` verbatim.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct CapabilityError(pub String);

impl CapabilityError {
    pub fn msg(message: impl Into<String>) -> Self {
        CapabilityError(message.into())
    }
}

impl From<String> for CapabilityError {
    fn from(message: String) -> Self {
        CapabilityError(message)
    }
}

impl From<&str> for CapabilityError {
    fn from(message: &str) -> Self {
        CapabilityError(message.to_string())
    }
}
