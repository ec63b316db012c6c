use flowcore::{ExecutionGraph, NodeStatus};
use petgraph::graph::NodeIndex;
use std::collections::VecDeque;

/// How a resolved node left its outgoing edges.
pub(crate) enum Outcome<'a> {
    /// Edges whose port is listed deliver, the rest deactivate.
    Succeeded(&'a [String]),
    /// Every outgoing edge deactivates and carries the failure downstream.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Unreachable,
    Waiting,
    Ready,
    Resolved,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    pending: usize,
    failed_inputs: usize,
    delivered: Vec<NodeIndex>,
}

struct Link {
    target: NodeIndex,
    port: String,
}

/// Edge bookkeeping for one run.
///
/// Only edges whose source is reachable from the start nodes count towards a
/// node's pending total, so triggers that were not fired never block a join.
pub(crate) struct Scheduler {
    slots: Vec<Slot>,
    outgoing: Vec<Vec<Link>>,
    ready: Vec<NodeIndex>,
}

impl Scheduler {
    pub fn new(graph: &ExecutionGraph, starts: &[NodeIndex]) -> Self {
        let reachable = graph.reachable_from(starts);
        let count = graph.node_count();
        let mut slots: Vec<Slot> = (0..count)
            .map(|i| Slot {
                state: if reachable.contains(&NodeIndex::new(i)) {
                    SlotState::Waiting
                } else {
                    SlotState::Unreachable
                },
                pending: 0,
                failed_inputs: 0,
                delivered: Vec::new(),
            })
            .collect();
        let mut outgoing: Vec<Vec<Link>> = (0..count).map(|_| Vec::new()).collect();

        for edge in graph.edges() {
            if !reachable.contains(&edge.source) {
                continue;
            }
            slots[edge.target.index()].pending += 1;
            outgoing[edge.source.index()].push(Link {
                target: edge.target,
                port: edge.port.to_string(),
            });
        }

        let mut ready = Vec::new();
        for &start in starts {
            let slot = &mut slots[start.index()];
            if slot.state == SlotState::Waiting {
                slot.state = SlotState::Ready;
                ready.push(start);
            }
        }

        Self {
            slots,
            outgoing,
            ready,
        }
    }

    /// Drain the nodes whose inputs have all resolved, in declaration order.
    pub fn take_ready(&mut self) -> Vec<NodeIndex> {
        let mut frontier = std::mem::take(&mut self.ready);
        frontier.sort_by_key(|idx| idx.index());
        frontier
    }

    /// Predecessors that delivered to `node`, in edge declaration order.
    pub fn delivered_sources(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.slots[node.index()].delivered
    }

    pub fn is_reachable(&self, node: NodeIndex) -> bool {
        self.slots[node.index()].state != SlotState::Unreachable
    }

    /// Resolve `node` and propagate along its outgoing edges.
    ///
    /// Returns the nodes skipped as a consequence, in the order the cascade
    /// reached them.
    pub fn resolve(&mut self, node: NodeIndex, outcome: Outcome<'_>) -> Vec<(NodeIndex, NodeStatus)> {
        self.slots[node.index()].state = SlotState::Resolved;

        let (ports, failed) = match outcome {
            Outcome::Succeeded(ports) => (Some(ports), false),
            Outcome::Failed => (None, true),
        };

        let mut skipped = Vec::new();
        let mut queue = VecDeque::new();
        self.propagate(node, ports, failed, &mut skipped, &mut queue);

        while let Some((pruned, failed)) = queue.pop_front() {
            self.propagate(pruned, None, failed, &mut skipped, &mut queue);
        }
        skipped
    }

    fn propagate(
        &mut self,
        source: NodeIndex,
        ports: Option<&[String]>,
        failed: bool,
        skipped: &mut Vec<(NodeIndex, NodeStatus)>,
        queue: &mut VecDeque<(NodeIndex, bool)>,
    ) {
        for link in &self.outgoing[source.index()] {
            let slot = &mut self.slots[link.target.index()];
            slot.pending = slot.pending.saturating_sub(1);

            let delivers = ports.is_some_and(|ports| ports.iter().any(|p| *p == link.port));
            if delivers {
                if !slot.delivered.contains(&source) {
                    slot.delivered.push(source);
                }
            } else if failed {
                slot.failed_inputs += 1;
            }

            if slot.pending > 0 || slot.state != SlotState::Waiting {
                continue;
            }
            if slot.delivered.is_empty() {
                let status = if slot.failed_inputs > 0 {
                    NodeStatus::UpstreamFailed
                } else {
                    NodeStatus::Pruned
                };
                slot.state = SlotState::Resolved;
                skipped.push((link.target, status));
                queue.push_back((link.target, status == NodeStatus::UpstreamFailed));
            } else {
                slot.state = SlotState::Ready;
                self.ready.push(link.target);
            }
        }
    }
}
