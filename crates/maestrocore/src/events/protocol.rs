use crate::recipe::NodeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// The atomic unit of telemetry emitted while a run progresses.
///
/// `sequence_id` is assigned at emission, starts at 1, and is strictly
/// increasing within a run; it establishes a total order over the stream.
/// `node_id` is empty for run-scope events. `visuals` are opaque UI hints,
/// never interpreted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEvent {
    pub trace_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub sequence_id: u64,
    pub node_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub visuals: HashMap<String, String>,
}

/// Closed set of event kinds with their payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    NodeInit {
        kind: NodeKind,
    },
    NodeStart {
        inputs_summary: String,
    },
    NodeStream {
        chunk: String,
    },
    NodeDone {
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
    },
    NodeRestored {
        output: Value,
    },
    NodeSkipped {
        reason: SkipReason,
    },
    EdgeActive {
        from: String,
        to: String,
    },
    CouncilVote {
        votes: BTreeMap<String, String>,
        synthesis: Value,
    },
    Error {
        node_id: String,
        error_kind: String,
        message: String,
        snapshot: HashMap<String, Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    PrunedByCondition,
}

fn visuals(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl GraphEvent {
    fn base(
        trace_id: &str,
        run_id: &str,
        node_id: &str,
        payload: EventPayload,
        visuals: HashMap<String, String>,
    ) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            sequence_id: 0,
            node_id: node_id.to_string(),
            payload,
            visuals,
        }
    }

    pub fn node_init(trace_id: &str, run_id: &str, node_id: &str, kind: NodeKind) -> Self {
        Self::base(
            trace_id,
            run_id,
            node_id,
            EventPayload::NodeInit { kind },
            visuals(&[("state", "IDLE")]),
        )
    }

    pub fn node_start(trace_id: &str, run_id: &str, node_id: &str, inputs_summary: String) -> Self {
        Self::base(
            trace_id,
            run_id,
            node_id,
            EventPayload::NodeStart { inputs_summary },
            visuals(&[("state", "PULSING"), ("anim", "BREATHE")]),
        )
    }

    pub fn node_stream(trace_id: &str, run_id: &str, node_id: &str, chunk: String) -> Self {
        Self::base(
            trace_id,
            run_id,
            node_id,
            EventPayload::NodeStream { chunk },
            visuals(&[("overlay", "TEXT_BUBBLE")]),
        )
    }

    pub fn node_done(
        trace_id: &str,
        run_id: &str,
        node_id: &str,
        output: Value,
        cost: Option<f64>,
    ) -> Self {
        Self::base(
            trace_id,
            run_id,
            node_id,
            EventPayload::NodeDone { output, cost },
            visuals(&[("state", "SOLID"), ("color", "GREEN")]),
        )
    }

    pub fn node_restored(trace_id: &str, run_id: &str, node_id: &str, output: Value) -> Self {
        Self::base(
            trace_id,
            run_id,
            node_id,
            EventPayload::NodeRestored { output },
            visuals(&[("state", "SOLID"), ("color", "GREEN"), ("anim", "INSTANT")]),
        )
    }

    pub fn node_skipped(trace_id: &str, run_id: &str, node_id: &str) -> Self {
        Self::base(
            trace_id,
            run_id,
            node_id,
            EventPayload::NodeSkipped {
                reason: SkipReason::PrunedByCondition,
            },
            visuals(&[("state", "DIMMED")]),
        )
    }

    /// Edge events are associated with the source node.
    pub fn edge_active(trace_id: &str, run_id: &str, from: &str, to: &str) -> Self {
        Self::base(
            trace_id,
            run_id,
            from,
            EventPayload::EdgeActive {
                from: from.to_string(),
                to: to.to_string(),
            },
            visuals(&[("flow_speed", "FAST")]),
        )
    }

    pub fn council_vote(
        trace_id: &str,
        run_id: &str,
        node_id: &str,
        votes: BTreeMap<String, String>,
        synthesis: Value,
    ) -> Self {
        Self::base(
            trace_id,
            run_id,
            node_id,
            EventPayload::CouncilVote { votes, synthesis },
            visuals(&[("widget", "VOTING_BOOTH")]),
        )
    }

    pub fn error(
        trace_id: &str,
        run_id: &str,
        node_id: &str,
        error_kind: &str,
        message: String,
        snapshot: HashMap<String, Value>,
    ) -> Self {
        Self::base(
            trace_id,
            run_id,
            node_id,
            EventPayload::Error {
                node_id: node_id.to_string(),
                error_kind: error_kind.to_string(),
                message,
                snapshot,
            },
            visuals(&[("state", "RED")]),
        )
    }

    pub fn event_type(&self) -> &'static str {
        match &self.payload {
            EventPayload::NodeInit { .. } => "NODE_INIT",
            EventPayload::NodeStart { .. } => "NODE_START",
            EventPayload::NodeStream { .. } => "NODE_STREAM",
            EventPayload::NodeDone { .. } => "NODE_DONE",
            EventPayload::NodeRestored { .. } => "NODE_RESTORED",
            EventPayload::NodeSkipped { .. } => "NODE_SKIPPED",
            EventPayload::EdgeActive { .. } => "EDGE_ACTIVE",
            EventPayload::CouncilVote { .. } => "COUNCIL_VOTE",
            EventPayload::Error { .. } => "ERROR",
        }
    }

    /// True for the events that close out a node's lifecycle in the stream:
    /// `NODE_DONE`, `NODE_RESTORED`, and `NODE_SKIPPED`.
    pub fn is_node_terminal(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::NodeDone { .. }
                | EventPayload::NodeRestored { .. }
                | EventPayload::NodeSkipped { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = GraphEvent::node_done("t1", "r1", "step", json!({"answer": 42}), Some(0.002));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "NODE_DONE");
        assert_eq!(value["payload"]["output"]["answer"], 42);
        assert_eq!(value["payload"]["cost"], 0.002);
        assert_eq!(value["visuals"]["color"], "GREEN");
        assert_eq!(value["node_id"], "step");
    }

    #[test]
    fn done_without_cost_omits_field() {
        let event = GraphEvent::node_done("t1", "r1", "step", json!("ok"), None);
        let value = serde_json::to_value(&event).unwrap();
        assert!(value["payload"].get("cost").is_none());
    }

    #[test]
    fn skip_reason_tag() {
        let event = GraphEvent::node_skipped("t1", "r1", "dead");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "NODE_SKIPPED");
        assert_eq!(value["payload"]["reason"], "PRUNED_BY_CONDITION");
        assert_eq!(value["visuals"]["state"], "DIMMED");
    }

    #[test]
    fn edge_event_belongs_to_source() {
        let event = GraphEvent::edge_active("t1", "r1", "a", "b");
        assert_eq!(event.node_id, "a");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["from"], "a");
        assert_eq!(value["payload"]["to"], "b");
        assert_eq!(value["visuals"]["flow_speed"], "FAST");
    }

    #[test]
    fn event_round_trips() {
        let event = GraphEvent::node_init("t1", "r1", "n", crate::NodeKind::Human);
        let text = serde_json::to_string(&event).unwrap();
        let back: GraphEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back.event_type(), "NODE_INIT");
        assert_eq!(back.node_id, "n");
    }
}
