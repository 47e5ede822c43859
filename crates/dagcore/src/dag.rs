use crate::graph::{Graph, NodeId};
use crate::{DagError, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Dependency graph derived from a flow's edges.
///
/// Node indices follow the graph's insertion order, which is what makes
/// ordering and frontier queries deterministic for a fixed input.
#[derive(Debug, Clone)]
pub struct DagAnalyzer {
    graph: DiGraph<NodeId, ()>,
    node_to_index: HashMap<NodeId, NodeIndex>,
}

impl DagAnalyzer {
    pub fn new(source: &Graph) -> Self {
        let mut graph = DiGraph::with_capacity(source.len(), source.edges().len());
        let mut node_to_index = HashMap::with_capacity(source.len());

        for node in source.nodes() {
            let idx = graph.add_node(node.id.clone());
            node_to_index.insert(node.id.clone(), idx);
        }

        // Graph construction already checked endpoints; duplicate edges collapse
        for edge in source.edges() {
            if let (Some(&from), Some(&to)) = (
                node_to_index.get(&edge.source_node_id),
                node_to_index.get(&edge.target_node_id),
            ) {
                graph.update_edge(from, to, ());
            }
        }

        Self {
            graph,
            node_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn is_acyclic(&self) -> bool {
        toposort(&self.graph, None).is_ok()
    }

    /// Fails with a validation error naming a node on the cycle
    pub fn validate(&self) -> Result<()> {
        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            let node_id = &self.graph[cycle.node_id()];
            DagError::Validation(format!("cyclic dependency detected at node {}", node_id))
        })
    }

    /// Kahn ordering with ties broken by node insertion order
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(i)) = ready.pop() {
            let idx = NodeIndex::new(i);
            order.push(self.graph[idx].clone());

            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            self.validate()?;
            return Err(DagError::Validation("cyclic dependency detected".to_string()));
        }

        Ok(order)
    }

    /// Nodes whose every dependency is in `completed` and which are not
    /// themselves completed, in insertion order
    pub fn ready_nodes(&self, completed: &HashSet<NodeId>) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| !completed.contains(&self.graph[idx]))
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .all(|dep| completed.contains(&self.graph[dep]))
            })
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    pub fn dependencies(&self, node_id: &str) -> Vec<NodeId> {
        let Some(&idx) = self.node_to_index.get(node_id) else {
            return Vec::new();
        };
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        deps.sort();
        deps.into_iter().map(|dep| self.graph[dep].clone()).collect()
    }

    pub fn is_complete(&self, completed: &HashSet<NodeId>) -> bool {
        self.graph
            .node_indices()
            .all(|idx| completed.contains(&self.graph[idx]))
    }
}
