use crate::council;
use crate::topology::Topology;
use async_trait::async_trait;
use maestrocore::{
    AgentExecutor, AuditSink, ChunkSink, EngineError, ExecutionContext, GraphEvent, HumanGate,
    NodeSpec, Snapshot, ToolExecutor, GLOBAL_INPUTS_KEY,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

/// Default capacity of the bounded event channel. A slow consumer applies
/// backpressure through it; no event is ever dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

const INPUTS_SUMMARY_MAX: usize = 240;

/// Ordered, finite stream of telemetry for one run. Dropping it cancels all
/// in-flight node executions cooperatively.
pub type EventStream = ReceiverStream<GraphEvent>;

/// Layered, bounded-concurrency executor for a single run.
///
/// A runner executes exactly one workflow: [`WorkflowRunner::run`] consumes
/// it, so reuse across runs is impossible by construction. All per-run state
/// lives inside the spawned producer task and is discarded at completion.
pub struct WorkflowRunner {
    event_capacity: usize,
}

impl WorkflowRunner {
    pub fn new() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_event_capacity(event_capacity: usize) -> Self {
        Self {
            event_capacity: event_capacity.max(1),
        }
    }

    /// Starts the run and returns its event stream. Must be called within a
    /// tokio runtime.
    ///
    /// The stream terminates normally after the last layer, after a single
    /// terminal `ERROR` event on failure, or silently when the consumer drops
    /// the stream.
    pub fn run(
        self,
        topology: Topology,
        context: ExecutionContext,
        inputs: Value,
        snapshot: Option<Snapshot>,
    ) -> EventStream {
        let (tx, rx) = mpsc::channel(self.event_capacity);
        let run_id = Uuid::new_v4().to_string();
        let emitter = RunEmitter::new(
            tx,
            context.trace_id.clone(),
            run_id,
            context.audit_sink.clone(),
            CancellationToken::new(),
        );
        let semaphore = Arc::new(Semaphore::new(context.max_parallel_nodes.max(1)));

        let task = RunTask {
            topology,
            context,
            inputs,
            snapshot: snapshot.unwrap_or_default(),
            emitter,
            semaphore,
        };

        tokio::spawn(async move {
            match task.execute().await {
                Ok(()) => {}
                Err(EngineError::Cancelled) => tracing::debug!("run cancelled by consumer"),
                Err(err) => tracing::error!(error = %err, "workflow run failed"),
            }
        });

        ReceiverStream::new(rx)
    }
}

impl Default for WorkflowRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized event emission for one run.
///
/// Sequence ids are handed out under the same lock that performs the channel
/// send, so stream order always equals sequence order. Every event is also
/// offered to the audit sink best-effort before it reaches the consumer.
#[derive(Clone)]
pub(crate) struct RunEmitter {
    inner: Arc<EmitterShared>,
}

struct EmitterShared {
    tx: mpsc::Sender<GraphEvent>,
    seq: Mutex<u64>,
    trace_id: String,
    run_id: String,
    audit: Option<Arc<dyn AuditSink>>,
    cancel: CancellationToken,
}

impl RunEmitter {
    fn new(
        tx: mpsc::Sender<GraphEvent>,
        trace_id: String,
        run_id: String,
        audit: Option<Arc<dyn AuditSink>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(EmitterShared {
                tx,
                seq: Mutex::new(0),
                trace_id,
                run_id,
                audit,
                cancel,
            }),
        }
    }

    pub(crate) fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) async fn emit(&self, mut event: GraphEvent) -> Result<(), EngineError> {
        let mut seq = self.inner.seq.lock().await;
        *seq += 1;
        event.sequence_id = *seq;

        if let Some(sink) = &self.inner.audit {
            sink.record(&event).await;
        }

        if self.inner.tx.send(event).await.is_err() {
            // Consumer dropped the stream; stop everything.
            self.inner.cancel.cancel();
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// Forwards capability chunks as `NODE_STREAM` events for one node.
struct NodeChunkSink {
    emitter: RunEmitter,
    node_id: String,
}

#[async_trait]
impl ChunkSink for NodeChunkSink {
    async fn push(&self, chunk: &str) {
        let event = GraphEvent::node_stream(
            self.emitter.trace_id(),
            self.emitter.run_id(),
            &self.node_id,
            chunk.to_string(),
        );
        // A failed send already cancelled the run; nothing to surface here.
        let _ = self.emitter.emit(event).await;
    }
}

struct RunTask {
    topology: Topology,
    context: ExecutionContext,
    inputs: Value,
    snapshot: Snapshot,
    emitter: RunEmitter,
    semaphore: Arc<Semaphore>,
}

struct NodeOutcome {
    node_id: String,
    result: Result<Value, EngineError>,
}

/// Everything one node execution needs, moved into its task.
struct NodeJob {
    node: NodeSpec,
    resolved: Value,
    emitter: RunEmitter,
    agent_executor: Arc<dyn AgentExecutor>,
    tool_executor: Arc<dyn ToolExecutor>,
    human_gate: Arc<dyn HumanGate>,
    semaphore: Arc<Semaphore>,
    default_human_timeout_ms: Option<u64>,
}

impl RunTask {
    #[instrument(skip_all, fields(run_id = %self.emitter.run_id(), nodes = self.topology.node_count()))]
    async fn execute(self) -> Result<(), EngineError> {
        tracing::info!("starting workflow run");

        let mut state_map: HashMap<String, Value> = HashMap::new();
        let mut activated: HashSet<(String, String)> = HashSet::new();
        let mut skip_set: HashSet<String> = HashSet::new();

        // Declare every node up front, in layer order.
        for layer in self.topology.layers() {
            for node_id in layer {
                if let Some(node) = self.topology.node(node_id) {
                    self.emitter
                        .emit(GraphEvent::node_init(
                            self.emitter.trace_id(),
                            self.emitter.run_id(),
                            node_id,
                            node.kind(),
                        ))
                        .await?;
                }
            }
        }

        // Snapshot preload: restored nodes are complete before the first
        // layer is scheduled and never re-execute.
        for layer in self.topology.layers() {
            for node_id in layer {
                if let Some(output) = self.snapshot.get(node_id) {
                    state_map.insert(node_id.clone(), output.clone());
                    self.emitter
                        .emit(GraphEvent::node_restored(
                            self.emitter.trace_id(),
                            self.emitter.run_id(),
                            node_id,
                            output.clone(),
                        ))
                        .await?;
                }
            }
        }

        for layer in self.topology.layers() {
            // Nodes that reached a completed state in this layer (executed or
            // restored); their outgoing edges are evaluated at the barrier.
            let mut terminal: Vec<String> = Vec::new();
            let mut join_set: JoinSet<NodeOutcome> = JoinSet::new();

            for node_id in layer {
                if self.snapshot.contains_key(node_id) {
                    terminal.push(node_id.clone());
                    continue;
                }

                let predecessors = self.topology.predecessors(node_id);
                if !predecessors.is_empty() {
                    let is_active = predecessors
                        .iter()
                        .any(|pred| activated.contains(&(pred.clone(), node_id.clone())));
                    if !is_active {
                        // No live incoming edge remains; the prune propagates
                        // to successors because a skipped node activates
                        // nothing.
                        skip_set.insert(node_id.clone());
                        self.emitter
                            .emit(GraphEvent::node_skipped(
                                self.emitter.trace_id(),
                                self.emitter.run_id(),
                                node_id,
                            ))
                            .await?;
                        continue;
                    }
                }

                let Some(node) = self.topology.node(node_id) else {
                    continue;
                };

                // Predecessor outputs are snapshotted here, on the scheduler
                // side; executors never touch shared state.
                let resolved = resolve_inputs(&predecessors, &state_map, &self.inputs);
                join_set.spawn(run_node(NodeJob {
                    node: node.clone(),
                    resolved,
                    emitter: self.emitter.clone(),
                    agent_executor: Arc::clone(&self.context.agent_executor),
                    tool_executor: Arc::clone(&self.context.tool_executor),
                    human_gate: Arc::clone(&self.context.human_gate),
                    semaphore: Arc::clone(&self.semaphore),
                    default_human_timeout_ms: self.context.default_human_timeout_ms,
                }));
            }

            // Layer barrier: the next layer must not start until every
            // sibling has terminated.
            let mut failure: Option<(String, EngineError)> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(NodeOutcome {
                        node_id,
                        result: Ok(output),
                    }) => {
                        state_map.insert(node_id.clone(), output);
                        terminal.push(node_id);
                    }
                    Ok(NodeOutcome {
                        result: Err(EngineError::Cancelled),
                        ..
                    }) => {}
                    Ok(NodeOutcome {
                        node_id,
                        result: Err(err),
                    }) => {
                        if failure.is_none() {
                            // First failure wins; siblings are cancelled
                            // cooperatively and emit nothing further.
                            self.emitter.cancel();
                            failure = Some((node_id, err));
                        }
                    }
                    Err(join_err) => {
                        if failure.is_none() {
                            self.emitter.cancel();
                            failure = Some((
                                String::new(),
                                EngineError::NodeExecutionFailed {
                                    node_id: String::new(),
                                    message: format!("node task panicked: {join_err}"),
                                },
                            ));
                        }
                    }
                }
            }

            if let Some((node_id, err)) = failure {
                tracing::error!(node_id = %node_id, error = %err, "node failed, terminating run");
                let event = GraphEvent::error(
                    self.emitter.trace_id(),
                    self.emitter.run_id(),
                    &node_id,
                    err.kind(),
                    err.to_string(),
                    state_map.clone(),
                );
                // The consumer may already be gone; the run terminates either way.
                let _ = self.emitter.emit(event).await;
                return Err(err);
            }

            if self.emitter.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            // Evaluate outgoing edges of every node that completed or was
            // restored in this layer.
            for node_id in &terminal {
                let Some(output) = state_map.get(node_id) else {
                    continue;
                };
                let key = branch_key(output);
                for succ in self.topology.successors(node_id) {
                    if skip_set.contains(&succ) || self.snapshot.contains_key(&succ) {
                        continue;
                    }
                    let satisfied = match self
                        .topology
                        .edge(node_id, &succ)
                        .and_then(|edge| edge.condition.as_ref())
                    {
                        None => true,
                        Some(condition) => *condition == key,
                    };
                    if satisfied {
                        activated.insert((node_id.clone(), succ.clone()));
                        self.emitter
                            .emit(GraphEvent::edge_active(
                                self.emitter.trace_id(),
                                self.emitter.run_id(),
                                node_id,
                                &succ,
                            ))
                            .await?;
                    }
                }
            }
        }

        tracing::info!("workflow run completed");
        Ok(())
    }
}

async fn run_node(job: NodeJob) -> NodeOutcome {
    let node_id = job.node.node_id().to_string();
    let cancel = job.emitter.cancel_token();
    let result = tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = run_node_inner(&job) => result,
    };
    NodeOutcome { node_id, result }
}

async fn run_node_inner(job: &NodeJob) -> Result<Value, EngineError> {
    let node_id = job.node.node_id().to_string();
    let summary = summarize_inputs(&job.resolved);
    let start_event = GraphEvent::node_start(
        job.emitter.trace_id(),
        job.emitter.run_id(),
        &node_id,
        summary,
    );

    let (output, cost) = match &job.node {
        NodeSpec::Agent {
            common,
            agent_name,
            overrides,
        } => {
            if let Some(council_config) = &common.council_config {
                // The whole council is one node: one START/DONE pair encloses
                // the COUNCIL_VOTE; voters gate on the shared semaphore
                // individually.
                job.emitter.emit(start_event).await?;
                let synthesis = council::run_council(
                    &node_id,
                    council_config,
                    &job.resolved,
                    &job.agent_executor,
                    &job.semaphore,
                    &job.emitter,
                )
                .await?;
                (synthesis, None)
            } else {
                let _permit = job
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| EngineError::Cancelled)?;
                job.emitter.emit(start_event).await?;
                let sink = NodeChunkSink {
                    emitter: job.emitter.clone(),
                    node_id: node_id.clone(),
                };
                let reply = job
                    .agent_executor
                    .invoke(agent_name, &job.resolved, overrides.as_ref(), &sink)
                    .await
                    .map_err(|err| node_failed(&node_id, err.to_string()))?;
                (reply.content, reply.cost)
            }
        }
        NodeSpec::Logic { code, .. } => {
            let _permit = job
                .semaphore
                .acquire()
                .await
                .map_err(|_| EngineError::Cancelled)?;
            job.emitter.emit(start_event).await?;
            let output = job
                .tool_executor
                .execute(code, &job.resolved)
                .await
                .map_err(|err| node_failed(&node_id, err.to_string()))?;
            (output, None)
        }
        NodeSpec::Human { timeout_ms, .. } => {
            let _permit = job
                .semaphore
                .acquire()
                .await
                .map_err(|_| EngineError::Cancelled)?;
            job.emitter.emit(start_event).await?;
            let effective_ms = timeout_ms.or(job.default_human_timeout_ms);
            let decision = job
                .human_gate
                .await_decision(&node_id, &job.resolved, effective_ms);
            let output = match effective_ms {
                Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), decision).await {
                    Ok(result) => result.map_err(|err| node_failed(&node_id, err.to_string()))?,
                    Err(_) => return Err(EngineError::HumanTimeout(node_id)),
                },
                // No deadline configured anywhere: wait indefinitely.
                None => decision
                    .await
                    .map_err(|err| node_failed(&node_id, err.to_string()))?,
            };
            (output, None)
        }
    };

    job.emitter
        .emit(GraphEvent::node_done(
            job.emitter.trace_id(),
            job.emitter.run_id(),
            &node_id,
            output.clone(),
            cost,
        ))
        .await?;

    Ok(output)
}

fn node_failed(node_id: &str, message: String) -> EngineError {
    EngineError::NodeExecutionFailed {
        node_id: node_id.to_string(),
        message,
    }
}

/// Inputs for one node: predecessor outputs keyed by node id, plus the run's
/// global inputs under the reserved key. Skipped predecessors have no entry.
fn resolve_inputs(
    predecessors: &[String],
    state_map: &HashMap<String, Value>,
    global_inputs: &Value,
) -> Value {
    let mut resolved = serde_json::Map::new();
    for pred in predecessors {
        if let Some(output) = state_map.get(pred) {
            resolved.insert(pred.clone(), output.clone());
        }
    }
    resolved.insert(GLOBAL_INPUTS_KEY.to_string(), global_inputs.clone());
    Value::Object(resolved)
}

fn summarize_inputs(resolved: &Value) -> String {
    let mut text = resolved.to_string();
    if text.len() > INPUTS_SUMMARY_MAX {
        let mut cut = INPUTS_SUMMARY_MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}

/// Branch key of a completed node's output, matched against edge conditions:
/// the output's `branch_key` field when present, the string itself for string
/// outputs, the JSON rendering otherwise.
fn branch_key(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("branch_key").and_then(Value::as_str) {
            Some(key) => key.to_string(),
            None => output.to_string(),
        },
        other => other.to_string(),
    }
}
