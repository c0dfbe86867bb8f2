//! Execution runtime for the maestro workflow engine.
//!
//! This crate turns a validated [`maestrocore::Recipe`] into an ordered
//! stream of telemetry events: the topology engine proves the graph is a
//! connected DAG and precomputes execution layers, the workflow runner
//! executes them with bounded concurrency, and the controller ties manifest
//! validation, topology construction, and per-run runner instantiation
//! together.

mod controller;
mod council;
mod runner;
mod topology;

pub use controller::Controller;
pub use council::SYNTHESIZER_AGENT;
pub use runner::{EventStream, WorkflowRunner, DEFAULT_EVENT_CAPACITY};
pub use topology::Topology;
