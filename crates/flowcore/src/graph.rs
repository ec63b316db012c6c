//! Structural validation and indexing of workflow graphs.
//!
//! Nodes and edges are inserted into the petgraph in declaration order, so a
//! `NodeIndex` / `EdgeIndex` doubles as the declaration position. Everything
//! that iterates edges sorts by that index to keep traversal reproducible.

use crate::{GraphError, NodeId, NodeKind, WorkflowDefinition};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{depth_first_search, Control, Dfs, DfsEvent, EdgeRef};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Validate a workflow definition without keeping the index around.
pub fn validate(definition: &WorkflowDefinition) -> Result<(), GraphError> {
    ExecutionGraph::build(definition).map(|_| ())
}

/// Targets of the edges leaving `node_id` through `port`, in edge declaration order.
pub fn successors<'a>(
    definition: &'a WorkflowDefinition,
    node_id: &str,
    port: &str,
) -> Vec<&'a NodeId> {
    definition
        .edges
        .iter()
        .filter(|edge| edge.source == node_id && edge.source_port == port)
        .map(|edge| &edge.target)
        .collect()
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
}

/// A resolved edge: endpoints as graph indices plus the activating port.
#[derive(Debug, Clone, Copy)]
pub struct GraphEdge<'a> {
    pub index: EdgeIndex,
    pub source: NodeIndex,
    pub target: NodeIndex,
    pub port: &'a str,
}

/// Validated, petgraph-backed view of a [`WorkflowDefinition`].
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    graph: DiGraph<GraphNode, String>,
    index: HashMap<NodeId, NodeIndex>,
}

impl ExecutionGraph {
    /// Index the definition and run every structural check.
    pub fn build(definition: &WorkflowDefinition) -> Result<Self, GraphError> {
        let graph = Self::index(definition)?;
        graph.check_ports()?;
        graph.check_incoming()?;
        let triggers = graph.triggers();
        if triggers.is_empty() {
            return Err(GraphError::NoTrigger);
        }
        graph.check_acyclic(&triggers)?;
        Ok(graph)
    }

    fn index(definition: &WorkflowDefinition) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(definition.nodes.len(), definition.edges.len());
        let mut index = HashMap::with_capacity(definition.nodes.len());

        for node in &definition.nodes {
            if index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
            let idx = graph.add_node(GraphNode {
                id: node.id.clone(),
                kind: node.kind,
            });
            index.insert(node.id.clone(), idx);
        }

        for (position, edge) in definition.edges.iter().enumerate() {
            let source = *index.get(&edge.source).ok_or_else(|| GraphError::UnknownNode {
                edge: position,
                node_id: edge.source.clone(),
                side: "source",
            })?;
            let target = *index.get(&edge.target).ok_or_else(|| GraphError::UnknownNode {
                edge: position,
                node_id: edge.target.clone(),
                side: "target",
            })?;
            graph.add_edge(source, target, edge.source_port.clone());
        }

        Ok(Self { graph, index })
    }

    fn check_ports(&self) -> Result<(), GraphError> {
        for edge in self.edges() {
            let source = &self.graph[edge.source];
            if !source.kind.has_output_port(edge.port) {
                return Err(GraphError::IllegalPort {
                    node_id: source.id.clone(),
                    kind: source.kind,
                    port: edge.port.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_incoming(&self) -> Result<(), GraphError> {
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let incoming = self
                .graph
                .edges_directed(idx, Direction::Incoming)
                .next()
                .is_some();
            match (node.kind, incoming) {
                (NodeKind::Trigger, true) => {
                    return Err(GraphError::TriggerHasIncoming(node.id.clone()))
                }
                (NodeKind::Trigger, false) | (_, true) => {}
                (_, false) => return Err(GraphError::MissingIncoming(node.id.clone())),
            }
        }
        Ok(())
    }

    /// Colored DFS from the triggers: an edge back to a node that is still
    /// on the DFS stack closes a cycle.
    fn check_acyclic(&self, starts: &[NodeIndex]) -> Result<(), GraphError> {
        let control = depth_first_search(&self.graph, starts.iter().copied(), |event| match event {
            DfsEvent::BackEdge(_, target) => Control::Break(target),
            _ => Control::Continue,
        });
        match control.break_value() {
            Some(target) => Err(GraphError::CycleDetected(self.graph[target].id.clone())),
            None => Ok(()),
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Trigger nodes in declaration order.
    pub fn triggers(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].kind == NodeKind::Trigger)
            .collect()
    }

    /// All edges in declaration order.
    pub fn edges(&self) -> impl Iterator<Item = GraphEdge<'_>> {
        self.graph.edge_references().map(|edge| GraphEdge {
            index: edge.id(),
            source: edge.source(),
            target: edge.target(),
            port: edge.weight().as_str(),
        })
    }

    pub fn outgoing(&self, idx: NodeIndex) -> Vec<GraphEdge<'_>> {
        self.sorted_edges(idx, Direction::Outgoing)
    }

    pub fn incoming(&self, idx: NodeIndex) -> Vec<GraphEdge<'_>> {
        self.sorted_edges(idx, Direction::Incoming)
    }

    fn sorted_edges(&self, idx: NodeIndex, direction: Direction) -> Vec<GraphEdge<'_>> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, direction)
            .map(|edge| GraphEdge {
                index: edge.id(),
                source: edge.source(),
                target: edge.target(),
                port: edge.weight().as_str(),
            })
            .collect();
        edges.sort_by_key(|edge| edge.index.index());
        edges
    }

    /// Nodes reachable from `starts`, starts included.
    pub fn reachable_from(&self, starts: &[NodeIndex]) -> HashSet<NodeIndex> {
        let mut reachable = HashSet::new();
        let mut dfs = Dfs::empty(&self.graph);
        for &start in starts {
            dfs.move_to(start);
            while let Some(idx) = dfs.next(&self.graph) {
                reachable.insert(idx);
            }
        }
        reachable
    }
}
