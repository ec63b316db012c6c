//! Workflow execution runtime
//!
//! This crate provides the engine that drives a workflow definition to a
//! terminal state: frontier scheduling with branch pruning, retries and
//! timeouts per node, cooperative cancellation, record keeping through an
//! [`flowcore::ExecutionStore`], and the status reports handed to callers.

mod context;
mod executor;
mod registry;
pub mod reporter;
mod runtime;
mod scheduler;

pub use context::RunContext;
pub use executor::{PreparedRun, RunOptions, WorkflowExecutor};
pub use registry::{NodeMetadata, NodeRegistry, PortDefinition};
pub use reporter::{ExecutionStatusReport, FailureSummary, NodeReport};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use tokio_util::sync::CancellationToken;
