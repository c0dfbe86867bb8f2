#![allow(dead_code)]

use async_trait::async_trait;
use maestrocore::{
    AgentExecutor, AgentReply, AuditSink, CapabilityError, ChunkSink, EventPayload,
    ExecutionContext, GraphEvent, HumanGate, NodeSpec, Recipe, ToolExecutor,
};
use maestroruntime::{EventStream, Topology};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;

/// Scripted agent executor: canned replies per agent name, optional chunk
/// streaming, optional per-call delay, scripted failures. Records every
/// invocation.
#[derive(Default)]
pub struct ScriptedAgent {
    outputs: HashMap<String, Value>,
    chunks: HashMap<String, Vec<String>>,
    failures: HashMap<String, String>,
    delay: Option<Duration>,
    delays: HashMap<String, Duration>,
    invocations: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returns(mut self, agent: &str, output: Value) -> Self {
        self.outputs.insert(agent.to_string(), output);
        self
    }

    pub fn streams(mut self, agent: &str, chunks: &[&str]) -> Self {
        self.chunks.insert(
            agent.to_string(),
            chunks.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn fails(mut self, agent: &str, message: &str) -> Self {
        self.failures
            .insert(agent.to_string(), message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn delay_for(mut self, agent: &str, delay: Duration) -> Self {
        self.delays.insert(agent.to_string(), delay);
        self
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedAgent {
    async fn invoke(
        &self,
        agent_name: &str,
        inputs: &Value,
        _overrides: Option<&Value>,
        stream: &dyn ChunkSink,
    ) -> Result<AgentReply, CapabilityError> {
        self.invocations
            .lock()
            .unwrap()
            .push(agent_name.to_string());
        if let Some(delay) = self.delays.get(agent_name).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failures.get(agent_name) {
            return Err(CapabilityError::msg(message.clone()));
        }
        if let Some(chunks) = self.chunks.get(agent_name) {
            for chunk in chunks {
                stream.push(chunk).await;
            }
        }
        let content = self
            .outputs
            .get(agent_name)
            .cloned()
            .unwrap_or_else(|| json!({"agent": agent_name, "echo": inputs}));
        Ok(AgentReply::new(content))
    }
}

/// Tool executor: canned outputs per tool name, echoes its args otherwise.
#[derive(Default)]
pub struct ScriptedTool {
    outputs: HashMap<String, Value>,
}

impl ScriptedTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returns(mut self, tool: &str, output: Value) -> Self {
        self.outputs.insert(tool.to_string(), output);
        self
    }
}

#[async_trait]
impl ToolExecutor for ScriptedTool {
    async fn execute(&self, tool_name: &str, args: &Value) -> Result<Value, CapabilityError> {
        Ok(self
            .outputs
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| args.clone()))
    }
}

/// Human gate that approves immediately with a fixed decision.
pub struct ApprovingGate {
    pub decision: Value,
}

#[async_trait]
impl HumanGate for ApprovingGate {
    async fn await_decision(
        &self,
        _node_id: &str,
        _inputs: &Value,
        _timeout_ms: Option<u64>,
    ) -> Result<Value, CapabilityError> {
        Ok(self.decision.clone())
    }
}

/// Human gate that never answers.
pub struct StallingGate;

#[async_trait]
impl HumanGate for StallingGate {
    async fn await_decision(
        &self,
        _node_id: &str,
        _inputs: &Value,
        _timeout_ms: Option<u64>,
    ) -> Result<Value, CapabilityError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Value::Null)
    }
}

/// Audit sink that records every event it sees.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GraphEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<GraphEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn record(&self, event: &GraphEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn test_context(
    agent: Arc<dyn AgentExecutor>,
    tool: Arc<dyn ToolExecutor>,
    gate: Arc<dyn HumanGate>,
) -> ExecutionContext {
    ExecutionContext::new("user-1", "trace-1", agent, tool, gate)
}

/// Context wired to echoing defaults; good enough for logic-only recipes.
pub fn echo_context() -> ExecutionContext {
    test_context(
        Arc::new(ScriptedAgent::new()),
        Arc::new(ScriptedTool::new()),
        Arc::new(ApprovingGate {
            decision: json!("approved"),
        }),
    )
}

/// Recipe of logic nodes: `nodes` as (node_id, tool), `edges` as
/// (source, target, condition).
pub fn logic_recipe(nodes: &[(&str, &str)], edges: &[(&str, &str, Option<&str>)]) -> Recipe {
    let mut recipe = Recipe::new("test-recipe", "Test recipe");
    for (node_id, tool) in nodes {
        recipe.add_node(NodeSpec::logic(*node_id, *tool));
    }
    for (source, target, condition) in edges {
        match condition {
            Some(cond) => recipe.connect_when(*source, *target, *cond),
            None => recipe.connect(*source, *target),
        };
    }
    recipe
}

pub fn topo(recipe: &Recipe) -> Topology {
    Topology::build(recipe).expect("topology should build")
}

pub async fn collect(mut stream: EventStream) -> Vec<GraphEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

/// Event type tags for one node, in stream order.
pub fn types_for(events: &[GraphEvent], node_id: &str) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| e.node_id == node_id)
        .map(|e| e.event_type())
        .collect()
}

/// Stream position of the first event of `event_type` for `node_id`.
pub fn position_of(events: &[GraphEvent], node_id: &str, event_type: &str) -> Option<usize> {
    events
        .iter()
        .position(|e| e.node_id == node_id && e.event_type() == event_type)
}

/// Stream position of `EDGE_ACTIVE` for a given edge.
pub fn edge_position(events: &[GraphEvent], from: &str, to: &str) -> Option<usize> {
    events.iter().position(|e| {
        matches!(&e.payload, EventPayload::EdgeActive { from: f, to: t } if f == from && t == to)
    })
}

pub fn done_output(events: &[GraphEvent], node_id: &str) -> Option<Value> {
    events.iter().find_map(|e| match &e.payload {
        EventPayload::NodeDone { output, .. } if e.node_id == node_id => Some(output.clone()),
        _ => None,
    })
}

/// All completed outputs, as a resume snapshot.
pub fn outputs_of(events: &[GraphEvent]) -> HashMap<String, Value> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::NodeDone { output, .. } => Some((e.node_id.clone(), output.clone())),
            _ => None,
        })
        .collect()
}

pub fn assert_sequence_strictly_increasing(events: &[GraphEvent]) {
    for (i, window) in events.windows(2).enumerate() {
        assert!(
            window[1].sequence_id > window[0].sequence_id,
            "sequence_id not strictly increasing at stream position {}: {} then {}",
            i,
            window[0].sequence_id,
            window[1].sequence_id
        );
    }
    if let Some(first) = events.first() {
        assert_eq!(first.sequence_id, 1, "sequence ids start at 1");
    }
}
