//! Execution records and the transitions that mutate them.
//!
//! A record is created `running`, grows by one [`NodeResult`] per resolved
//! node, and is finalized exactly once. [`ExecutionRecord::apply`] is the
//! only mutation path, so every store implementation shares the same rules.

use crate::{NodeId, NodeKind, StoreError, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// How a single node resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    /// Every live path into the node was deactivated by a branch decision
    Pruned,
    /// Only reachable through a node that failed
    UpstreamFailed,
}

impl NodeStatus {
    /// Whether an executor was actually invoked for the node.
    pub fn was_executed(&self) -> bool {
        matches!(self, NodeStatus::Succeeded | NodeStatus::Failed)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Pruned => write!(f, "pruned"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
        }
    }
}

/// Recorded outcome of one node in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub output: Option<Value>,
    pub next_ports: Vec<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub frontier: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl NodeResult {
    /// A node that never ran.
    pub fn skipped(node_id: impl Into<NodeId>, kind: NodeKind, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
            status,
            output: None,
            next_ports: Vec::new(),
            error: None,
            attempts: 0,
            frontier: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }
}

/// Persisted lifecycle object of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub user_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input_data: Value,
    pub output_data: Option<Value>,
    #[serde(default)]
    pub node_results: BTreeMap<NodeId, NodeResult>,
}

/// Append-only state transitions of an [`ExecutionRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    NodeRecorded(NodeResult),
    Finalized {
        status: ExecutionStatus,
        completed_at: DateTime<Utc>,
        output_data: Value,
    },
}

impl ExecutionRecord {
    pub fn running(
        id: ExecutionId,
        workflow_id: WorkflowId,
        user_id: Option<Uuid>,
        input_data: Value,
    ) -> Self {
        Self {
            id,
            workflow_id,
            user_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            input_data,
            output_data: None,
            node_results: BTreeMap::new(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn apply(&mut self, transition: &Transition) -> Result<(), StoreError> {
        if self.is_finalized() {
            return Err(StoreError::AlreadyFinalized(self.id));
        }
        match transition {
            Transition::NodeRecorded(result) => {
                if self.node_results.contains_key(&result.node_id) {
                    return Err(StoreError::InvalidTransition {
                        id: self.id,
                        reason: format!("node '{}' already recorded", result.node_id),
                    });
                }
                self.node_results
                    .insert(result.node_id.clone(), result.clone());
            }
            Transition::Finalized {
                status,
                completed_at,
                output_data,
            } => {
                if !status.is_terminal() {
                    return Err(StoreError::InvalidTransition {
                        id: self.id,
                        reason: format!("cannot finalize to non-terminal status {status}"),
                    });
                }
                self.status = *status;
                self.completed_at = Some(*completed_at);
                self.output_data = Some(output_data.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ExecutionRecord {
        ExecutionRecord::running(Uuid::new_v4(), Uuid::new_v4(), None, json!({}))
    }

    fn finalize(status: ExecutionStatus) -> Transition {
        Transition::Finalized {
            status,
            completed_at: Utc::now(),
            output_data: json!({}),
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>(), Ok(status));
        }
        assert!("exploded".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn finalized_record_rejects_further_transitions() {
        let mut rec = record();
        rec.apply(&finalize(ExecutionStatus::Completed)).unwrap();
        assert!(rec.completed_at.is_some());

        let late = Transition::NodeRecorded(NodeResult::skipped(
            "late",
            NodeKind::Action,
            NodeStatus::Pruned,
        ));
        assert!(matches!(rec.apply(&late), Err(StoreError::AlreadyFinalized(_))));
        assert!(matches!(
            rec.apply(&finalize(ExecutionStatus::Failed)),
            Err(StoreError::AlreadyFinalized(_))
        ));
        assert_eq!(rec.status, ExecutionStatus::Completed);
    }

    #[test]
    fn cannot_finalize_to_running() {
        let mut rec = record();
        assert!(matches!(
            rec.apply(&finalize(ExecutionStatus::Running)),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(!rec.is_finalized());
    }

    #[test]
    fn node_results_are_write_once() {
        let mut rec = record();
        let result = NodeResult::skipped("a", NodeKind::Action, NodeStatus::Pruned);
        rec.apply(&Transition::NodeRecorded(result.clone())).unwrap();
        assert!(rec.apply(&Transition::NodeRecorded(result)).is_err());
    }
}
