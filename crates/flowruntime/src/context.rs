use flowcore::{ExecutionId, ExecutionStatus, FlowError, NodeId, WorkflowId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Mutable per-execution state, owned by the engine for the whole run.
///
/// Outputs are written once per node id, and only between frontiers; nodes
/// read them through the immutable [`RunContext::snapshot`].
#[derive(Debug)]
pub struct RunContext {
    execution_id: ExecutionId,
    workflow_id: WorkflowId,
    trigger_payload: Arc<Value>,
    outputs: HashMap<NodeId, Value>,
    status: ExecutionStatus,
}

impl RunContext {
    pub fn new(execution_id: ExecutionId, workflow_id: WorkflowId, trigger_payload: Value) -> Self {
        Self {
            execution_id,
            workflow_id,
            trigger_payload: Arc::new(trigger_payload),
            outputs: HashMap::new(),
            status: ExecutionStatus::Pending,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn trigger_payload(&self) -> Arc<Value> {
        Arc::clone(&self.trigger_payload)
    }

    /// Move along `Pending -> Running -> {Completed, Failed, Cancelled}`.
    /// A run may also end straight from `Pending` when it is cancelled or
    /// fails before the first dispatch.
    pub fn transition(&mut self, to: ExecutionStatus) -> Result<(), FlowError> {
        use ExecutionStatus::*;
        let allowed = match (self.status, to) {
            (Pending, Running) => true,
            (Pending, Cancelled) | (Pending, Failed) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            _ => false,
        };
        if !allowed {
            return Err(FlowError::Execution(format!(
                "illegal run transition {} -> {} for execution {}",
                self.status, to, self.execution_id
            )));
        }
        self.status = to;
        Ok(())
    }

    pub fn record_output(&mut self, node_id: &str, value: Value) -> Result<(), FlowError> {
        if self.outputs.contains_key(node_id) {
            return Err(FlowError::Execution(format!(
                "output of node '{}' already recorded",
                node_id
            )));
        }
        self.outputs.insert(node_id.to_string(), value);
        Ok(())
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn outputs(&self) -> &HashMap<NodeId, Value> {
        &self.outputs
    }

    /// Frozen copy handed to every node of the next frontier.
    pub fn snapshot(&self) -> Arc<HashMap<NodeId, Value>> {
        Arc::new(self.outputs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> RunContext {
        RunContext::new(Uuid::new_v4(), Uuid::new_v4(), json!({"hello": "world"}))
    }

    #[test]
    fn starts_pending_and_runs_to_completion() {
        let mut ctx = ctx();
        assert_eq!(ctx.status(), ExecutionStatus::Pending);
        ctx.transition(ExecutionStatus::Running).unwrap();
        ctx.transition(ExecutionStatus::Completed).unwrap();
        assert!(ctx.transition(ExecutionStatus::Running).is_err());
        assert!(ctx.transition(ExecutionStatus::Failed).is_err());
        assert_eq!(ctx.status(), ExecutionStatus::Completed);
    }

    #[test]
    fn pending_cannot_complete_without_running() {
        let mut ctx = ctx();
        assert!(ctx.transition(ExecutionStatus::Completed).is_err());
        ctx.transition(ExecutionStatus::Cancelled).unwrap();
    }

    #[test]
    fn outputs_are_write_once() {
        let mut ctx = ctx();
        ctx.record_output("a", json!(1)).unwrap();
        assert!(ctx.record_output("a", json!(2)).is_err());
        assert_eq!(ctx.output("a"), Some(&json!(1)));
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let mut ctx = ctx();
        ctx.record_output("a", json!(1)).unwrap();
        let snapshot = ctx.snapshot();
        ctx.record_output("b", json!(2)).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ctx.outputs().len(), 2);
    }
}
