use crate::runner::RunEmitter;
use maestrocore::{
    AgentExecutor, CouncilConfig, CouncilStrategyKind, EngineError, GraphEvent, NullChunkSink,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Agent name reserved for the reduce phase of a consensus council.
pub const SYNTHESIZER_AGENT: &str = "synthesizer";

/// Map-reduce consensus across the configured voters.
///
/// Every voter receives the same resolved inputs; each in-flight invocation
/// holds one permit from the run's semaphore. Failed voters are dropped from
/// the tally; the council fails only when no vote survives. Emits a single
/// `COUNCIL_VOTE` carrying the raw votes and the synthesized output, which
/// also becomes the node's output.
pub(crate) async fn run_council(
    node_id: &str,
    config: &CouncilConfig,
    inputs: &Value,
    agent_executor: &Arc<dyn AgentExecutor>,
    semaphore: &Arc<Semaphore>,
    emitter: &RunEmitter,
) -> Result<Value, EngineError> {
    let ballots = futures::future::join_all(config.voters.iter().map(|voter| {
        let agent_executor = Arc::clone(agent_executor);
        let semaphore = Arc::clone(semaphore);
        let inputs = inputs.clone();
        let voter = voter.clone();
        async move {
            let _permit = semaphore.acquire().await.ok();
            let reply = agent_executor
                .invoke(&voter, &inputs, None, &NullChunkSink)
                .await;
            (voter, reply)
        }
    }))
    .await;

    let mut votes: BTreeMap<String, String> = BTreeMap::new();
    for (voter, reply) in ballots {
        match reply {
            Ok(reply) => {
                votes.insert(voter, verdict_text(&reply.content));
            }
            Err(err) => {
                tracing::warn!(node_id, voter = %voter, error = %err, "council voter failed");
            }
        }
    }

    if votes.is_empty() {
        return Err(EngineError::NodeExecutionFailed {
            node_id: node_id.to_string(),
            message: "all council voters failed".to_string(),
        });
    }

    let synthesis = match config.strategy {
        CouncilStrategyKind::Majority => Value::String(tally_majority(&votes)),
        CouncilStrategyKind::Consensus => {
            let synth_inputs = json!({
                "inputs": inputs,
                "votes": &votes,
            });
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| EngineError::Cancelled)?;
            let reply = agent_executor
                .invoke(SYNTHESIZER_AGENT, &synth_inputs, None, &NullChunkSink)
                .await
                .map_err(|err| EngineError::NodeExecutionFailed {
                    node_id: node_id.to_string(),
                    message: format!("synthesizer agent failed: {err}"),
                })?;
            reply.content
        }
    };

    emitter
        .emit(GraphEvent::council_vote(
            emitter.trace_id(),
            emitter.run_id(),
            node_id,
            votes,
            synthesis.clone(),
        ))
        .await?;

    Ok(synthesis)
}

fn verdict_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Most common verdict wins; ties break toward the lexicographically first
/// verdict so the result is deterministic.
fn tally_majority(votes: &BTreeMap<String, String>) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for verdict in votes.values() {
        *counts.entry(verdict.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(verdict, _)| verdict.to_string())
        .unwrap_or_default()
}
