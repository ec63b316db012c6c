use crate::{ExecutionId, NodeId, NodeKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural problems found before any node runs. Always fatal to the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    #[error("Edge {edge} references unknown {side} node '{node_id}'")]
    UnknownNode {
        edge: usize,
        node_id: NodeId,
        side: &'static str,
    },

    #[error("Node '{node_id}' ({kind}) has no output port '{port}'")]
    IllegalPort {
        node_id: NodeId,
        kind: NodeKind,
        port: String,
    },

    #[error("Trigger node '{0}' cannot have incoming edges")]
    TriggerHasIncoming(NodeId),

    #[error("Node '{0}' has no incoming edges")]
    MissingIncoming(NodeId),

    #[error("Workflow has no trigger node")]
    NoTrigger,

    #[error("Node '{0}' is not a trigger")]
    NotATrigger(NodeId),

    #[error("Cycle detected at node '{0}'")]
    CycleDetected(NodeId),
}

/// Failure of a single node execution. Subject to the retry policy unless
/// [`NodeError::is_retryable`] says otherwise.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Node activated illegal port '{0}'")]
    InvalidPort(String),

    #[error("Execution failed: {0}")]
    Execution(String),
}

impl NodeError {
    /// Bad configuration fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NodeError::Configuration(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Execution record not found: {0}")]
    NotFound(ExecutionId),

    #[error("Execution record already exists: {0}")]
    AlreadyExists(ExecutionId),

    #[error("Execution {0} is already finalized")]
    AlreadyFinalized(ExecutionId),

    #[error("Invalid transition for execution {id}: {reason}")]
    InvalidTransition { id: ExecutionId, reason: String },

    #[error("Store backend error: {0}")]
    Backend(String),
}
