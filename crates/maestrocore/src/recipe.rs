use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Reserved key under which the run's global inputs appear in every node's
/// resolved input map.
pub const GLOBAL_INPUTS_KEY: &str = "__inputs__";

/// Completed node outputs from a prior run, keyed by node id. Nodes present
/// are restored instead of re-executed.
pub type Snapshot = HashMap<String, Value>;

/// Complete declarative recipe: metadata, inputs schema, and the graph.
///
/// Immutable once constructed; the engine never mutates a recipe during
/// execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form input schema: name -> type tag. Not interpreted by the engine.
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    pub graph: RecipeGraph,
}

impl Recipe {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: "1.0.0".to_string(),
            name: name.into(),
            description: None,
            inputs: HashMap::new(),
            graph: RecipeGraph::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> &mut Self {
        self.graph.nodes.push(node);
        self
    }

    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) -> &mut Self {
        self.graph.edges.push(EdgeSpec {
            source_node_id: source.into(),
            target_node_id: target.into(),
            condition: None,
        });
        self
    }

    pub fn connect_when(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> &mut Self {
        self.graph.edges.push(EdgeSpec {
            source_node_id: source.into(),
            target_node_id: target.into(),
            condition: Some(condition.into()),
        });
        self
    }

    pub fn find_node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.graph.nodes.iter().find(|n| n.node_id() == node_id)
    }
}

/// Nodes and edges of a recipe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeGraph {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
}

/// Fields shared by every node variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCommon {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub council_config: Option<CouncilConfig>,
    /// Opaque UI hints, forwarded verbatim on events. Never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_metadata: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl NodeCommon {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            council_config: None,
            visual_metadata: None,
            metadata: None,
        }
    }
}

/// A single node in the recipe graph, discriminated by the `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    /// Delegates to an external agent. `council_config` promotes the node to a
    /// consensus node that fans out across multiple voters.
    Agent {
        #[serde(flatten)]
        common: NodeCommon,
        agent_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<Value>,
    },
    /// Suspends execution pending an external decision.
    Human {
        #[serde(flatten)]
        common: NodeCommon,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Deterministic local transformation. The `code` field names a tool; it
    /// is never executable source.
    Logic {
        #[serde(flatten)]
        common: NodeCommon,
        code: String,
    },
}

impl NodeSpec {
    pub fn agent(node_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        NodeSpec::Agent {
            common: NodeCommon::new(node_id),
            agent_name: agent_name.into(),
            overrides: None,
        }
    }

    pub fn human(node_id: impl Into<String>) -> Self {
        NodeSpec::Human {
            common: NodeCommon::new(node_id),
            timeout_ms: None,
        }
    }

    pub fn logic(node_id: impl Into<String>, code: impl Into<String>) -> Self {
        NodeSpec::Logic {
            common: NodeCommon::new(node_id),
            code: code.into(),
        }
    }

    pub fn with_council(mut self, config: CouncilConfig) -> Self {
        self.common_mut().council_config = Some(config);
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        if let NodeSpec::Human { timeout_ms, .. } = &mut self {
            *timeout_ms = Some(ms);
        }
        self
    }

    pub fn common(&self) -> &NodeCommon {
        match self {
            NodeSpec::Agent { common, .. }
            | NodeSpec::Human { common, .. }
            | NodeSpec::Logic { common, .. } => common,
        }
    }

    fn common_mut(&mut self) -> &mut NodeCommon {
        match self {
            NodeSpec::Agent { common, .. }
            | NodeSpec::Human { common, .. }
            | NodeSpec::Logic { common, .. } => common,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.common().node_id
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeSpec::Agent { .. } => NodeKind::Agent,
            NodeSpec::Human { .. } => NodeKind::Human,
            NodeSpec::Logic { .. } => NodeKind::Logic,
        }
    }
}

/// Discriminator tag of a node, as carried on `NODE_INIT` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Agent,
    Human,
    Logic,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Agent => "agent",
            NodeKind::Human => "human",
            NodeKind::Logic => "logic",
        }
    }
}

/// Directed edge between two nodes. At most one edge per (source, target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub source_node_id: String,
    pub target_node_id: String,
    /// Named branch label. An unconditional edge always activates; a
    /// conditional edge activates only when the label equals the source
    /// node's branch key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Consensus configuration for a council node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilConfig {
    pub strategy: CouncilStrategyKind,
    /// Agent names fanned out to in the map phase, in declaration order.
    pub voters: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouncilStrategyKind {
    /// A reserved synthesizer agent reduces the votes to a single answer.
    Consensus,
    /// Verdicts are tallied verbatim; the most common one wins.
    Majority,
}
