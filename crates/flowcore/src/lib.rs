//! Core abstractions for the flow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: the workflow graph model and its validation, the
//! node executor contract, execution records with their store interface,
//! and the execution event bus. It does not run anything itself.

mod error;
pub mod events;
pub mod graph;
mod node;
mod record;
pub mod store;
mod workflow;

pub use error::{FlowError, GraphError, NodeError, StoreError};
pub use events::*;
pub use graph::ExecutionGraph;
pub use node::{NodeContext, NodeExecutor, NodeInput, NodeOutput};
pub use record::{
    ExecutionId, ExecutionRecord, ExecutionStatus, NodeResult, NodeStatus, Transition,
};
pub use store::{ExecutionStore, InMemoryExecutionStore};
pub use workflow::{
    ports, EdgeSpec, ErrorHandling, NodeId, NodeKind, NodeSpec, RetryPolicy, WorkflowDefinition,
    WorkflowId, WorkflowSettings,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
