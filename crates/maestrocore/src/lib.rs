//! Core abstractions for the maestro workflow engine.
//!
//! This crate provides the recipe data model, the event protocol, the
//! capability contracts the runtime consumes, and the error taxonomy. It has
//! no runtime logic of its own.

mod capabilities;
mod error;
mod events;
mod recipe;

pub use capabilities::{
    AgentExecutor, AgentReply, AuditSink, ChunkSink, ExecutionContext, HumanGate,
    ManifestValidator, NullChunkSink, SerdeManifestValidator, ToolExecutor,
    DEFAULT_MAX_PARALLEL_NODES,
};
pub use error::{CapabilityError, EngineError};
pub use events::{EventPayload, GraphEvent, SkipReason};
pub use recipe::{
    CouncilConfig, CouncilStrategyKind, EdgeSpec, NodeCommon, NodeKind, NodeSpec, Recipe,
    RecipeGraph, Snapshot, GLOBAL_INPUTS_KEY,
};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
