use maestrocore::{EdgeSpec, EngineError, NodeSpec, Recipe};
use petgraph::algo::{connected_components, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Validated in-memory DAG built from a [`Recipe`], with precomputed
/// execution layers.
///
/// Building is deterministic: identical recipes produce identical layer
/// partitions, and each layer is sorted by node id. Consumers must not rely
/// on intra-layer order; it is an implementation detail.
#[derive(Debug)]
pub struct Topology {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    nodes: HashMap<String, NodeSpec>,
    edges: HashMap<(String, String), EdgeSpec>,
    layers: Vec<Vec<String>>,
}

impl Topology {
    /// Builds and validates the topology.
    ///
    /// Fails with `DanglingEdge` when an edge endpoint is undeclared,
    /// `ManifestInvalid` on duplicate node ids or duplicate (source, target)
    /// pairs, `CyclicDependency` on a cycle, and `DisconnectedGraph` when the
    /// undirected projection has more than one component (single-node graphs
    /// are permitted).
    pub fn build(recipe: &Recipe) -> Result<Self, EngineError> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut nodes = HashMap::new();

        for node in &recipe.graph.nodes {
            let node_id = node.node_id().to_string();
            if nodes.contains_key(&node_id) {
                return Err(EngineError::ManifestInvalid(format!(
                    "duplicate node id '{node_id}'"
                )));
            }
            let idx = graph.add_node(node_id.clone());
            indices.insert(node_id.clone(), idx);
            nodes.insert(node_id, node.clone());
        }

        let mut edges = HashMap::new();
        for edge in &recipe.graph.edges {
            let from = indices.get(&edge.source_node_id).ok_or_else(|| {
                EngineError::DanglingEdge(format!(
                    "{} -> {} (missing '{}')",
                    edge.source_node_id, edge.target_node_id, edge.source_node_id
                ))
            })?;
            let to = indices.get(&edge.target_node_id).ok_or_else(|| {
                EngineError::DanglingEdge(format!(
                    "{} -> {} (missing '{}')",
                    edge.source_node_id, edge.target_node_id, edge.target_node_id
                ))
            })?;

            let key = (edge.source_node_id.clone(), edge.target_node_id.clone());
            if edges.insert(key, edge.clone()).is_some() {
                return Err(EngineError::ManifestInvalid(format!(
                    "duplicate edge {} -> {}",
                    edge.source_node_id, edge.target_node_id
                )));
            }
            graph.add_edge(*from, *to, ());
        }

        if toposort(&graph, None).is_err() {
            return Err(EngineError::CyclicDependency);
        }

        if graph.node_count() >= 2 && connected_components(&graph) > 1 {
            return Err(EngineError::DisconnectedGraph);
        }

        let layers = compute_layers(&graph);

        Ok(Self {
            graph,
            indices,
            nodes,
            edges,
            layers,
        })
    }

    /// Execution layers in order. Every node appears in exactly one layer,
    /// and for every edge (u, v), u's layer strictly precedes v's.
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.get(node_id)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&EdgeSpec> {
        self.edges.get(&(source.to_string(), target.to_string()))
    }

    pub fn successors(&self, node_id: &str) -> Vec<String> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    pub fn predecessors(&self, node_id: &str) -> Vec<String> {
        self.neighbors(node_id, Direction::Incoming)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Vec<String> {
        let Some(idx) = self.indices.get(node_id) else {
            return Vec::new();
        };
        let mut out: Vec<String> = self
            .graph
            .neighbors_directed(*idx, direction)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect();
        out.sort();
        out
    }
}

/// Kahn generations: repeatedly peel off the set of nodes whose unresolved
/// in-degree is zero. The input graph is already known to be acyclic.
fn compute_layers(graph: &DiGraph<String, ()>) -> Vec<Vec<String>> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| {
            (
                idx,
                graph.neighbors_directed(idx, Direction::Incoming).count(),
            )
        })
        .collect();

    let mut layers = Vec::new();
    let mut remaining: Vec<NodeIndex> = graph.node_indices().collect();

    while !remaining.is_empty() {
        let (frontier, rest): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|idx| in_degree.get(idx).copied().unwrap_or(0) == 0);
        remaining = rest;

        for idx in &frontier {
            for succ in graph.neighbors_directed(*idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&succ) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }

        let mut layer: Vec<String> = frontier
            .iter()
            .filter_map(|idx| graph.node_weight(*idx).cloned())
            .collect();
        layer.sort();
        layers.push(layer);
    }

    layers
}
