/// Petgraph-based workflow DAG
///
/// Converts a workflow's node/edge lists into an explicit directed graph,
/// validates it (unique ids, no dangling or self edges, no cycles) and answers
/// the dependency questions the scheduler asks while a run is in flight.

use crate::runtime::error::GraphError;
use crate::workflow::Workflow;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Validated, acyclic dependency graph of a workflow
#[derive(Debug)]
pub struct WorkflowGraph {
    /// Node weights are node ids
    graph: DiGraph<String, ()>,
    /// Mapping from node ID to graph node index
    node_id_to_index: HashMap<String, NodeIndex>,
    /// Node ids in a valid topological order
    topo_order: Vec<String>,
}

impl WorkflowGraph {
    /// Build and validate the graph for a workflow
    ///
    /// Every edge endpoint must name a node of the same workflow and the result
    /// must be acyclic. Nothing is executed if this fails.
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        tracing::debug!(
            "🏗️ Building workflow graph for '{}' ({} nodes, {} edges)",
            workflow.id,
            workflow.nodes.len(),
            workflow.edges.len()
        );

        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in &workflow.nodes {
            if node_id_to_index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            let index = graph.add_node(node.id.clone());
            node_id_to_index.insert(node.id.clone(), index);
        }

        for edge in &workflow.edges {
            let lookup = |id: &str| {
                node_id_to_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| GraphError::DanglingEdge {
                        from: edge.source.clone(),
                        to: edge.target.clone(),
                        missing: id.to_string(),
                    })
            };
            let from = lookup(&edge.source)?;
            let to = lookup(&edge.target)?;
            if from == to {
                return Err(GraphError::SelfEdge(edge.source.clone()));
            }
            graph.add_edge(from, to, ());
        }

        let topo_order = toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].clone()))?
            .into_iter()
            .map(|index| graph[index].clone())
            .collect();

        tracing::debug!("✅ DAG validation successful - no cycles detected");

        Ok(Self {
            graph,
            node_id_to_index,
            topo_order,
        })
    }

    /// Node ids in topological order
    pub fn topological_order(&self) -> &[String] {
        &self.topo_order
    }

    /// Direct dependencies of a node, deduplicated and sorted
    pub fn upstream(&self, node_id: &str) -> Vec<&str> {
        let Some(&index) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|n| self.graph[n].as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// All transitive dependencies of a node (excluding the node itself)
    pub fn ancestors(&self, node_id: &str) -> HashSet<&str> {
        let mut reachable = HashSet::new();
        let Some(&start) = self.node_id_to_index.get(node_id) else {
            return reachable;
        };

        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in self.graph.neighbors_directed(current, Direction::Incoming) {
                if visited.insert(next) {
                    reachable.insert(self.graph[next].as_str());
                    queue.push_back(next);
                }
            }
        }

        reachable
    }
}
