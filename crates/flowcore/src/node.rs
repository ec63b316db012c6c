use crate::{
    events::EventEmitter, ports, ExecutionId, NodeError, NodeId, NodeKind, NodeSpec, WorkflowId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Core trait implemented by the executor of each node kind
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The node kind this executor handles
    fn kind(&self) -> NodeKind;

    /// Human readable summary, surfaced by `nodes` listings
    fn description(&self) -> &str {
        ""
    }

    /// Execute one attempt of the node. Retries are the engine's business.
    async fn execute(
        &self,
        node: &NodeSpec,
        input: NodeInput,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError>;

    /// Optional: validate configuration at workflow load time
    fn validate_config(&self, _node: &NodeSpec) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Read-only view of the run handed to each node attempt
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,

    /// 1-based attempt number
    pub attempt: u32,

    /// Payload the run was triggered with
    pub trigger_payload: Arc<Value>,

    /// Outputs recorded by every frontier before the current one
    pub outputs: Arc<HashMap<NodeId, Value>>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,
}

impl NodeContext {
    pub fn new(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        node_id: impl Into<NodeId>,
        events: EventEmitter,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            node_id: node_id.into(),
            attempt: 1,
            trigger_payload: Arc::new(Value::Null),
            outputs: Arc::new(HashMap::new()),
            events,
        }
    }

    pub fn with_trigger_payload(mut self, payload: Value) -> Self {
        self.trigger_payload = Arc::new(payload);
        self
    }

    pub fn output_of(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }
}

/// Outputs of every predecessor that delivered along an active edge,
/// keyed by source node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeInput {
    values: BTreeMap<NodeId, Value>,
}

impl NodeInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<NodeId>, value: Value) {
        self.values.insert(source.into(), value);
    }

    pub fn get(&self, source: &str) -> Option<&Value> {
        self.values.get(source)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Value)> {
        self.values.iter()
    }

    /// The upstream output when exactly one predecessor fed this node.
    pub fn single(&self) -> Option<&Value> {
        match self.values.len() {
            1 => self.values.values().next(),
            _ => None,
        }
    }

    /// Object keyed by source node id.
    pub fn to_map(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }

    /// The single upstream output, or the keyed map for joins.
    pub fn primary(&self) -> Value {
        self.single().cloned().unwrap_or_else(|| self.to_map())
    }
}

impl FromIterator<(NodeId, Value)> for NodeInput {
    fn from_iter<I: IntoIterator<Item = (NodeId, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Output from one successful node attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Opaque value passed downstream
    pub output: Value,

    /// Output ports to activate
    pub next_ports: Vec<String>,
}

impl NodeOutput {
    /// Activates the single `output` port.
    pub fn new(output: impl Into<Value>) -> Self {
        Self::on_port(ports::OUTPUT, output)
    }

    pub fn on_port(port: impl Into<String>, output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            next_ports: vec![port.into()],
        }
    }

    /// Activates `outputTrue` or `outputFalse`.
    pub fn branch(taken: bool, output: impl Into<Value>) -> Self {
        let port = if taken {
            ports::OUTPUT_TRUE
        } else {
            ports::OUTPUT_FALSE
        };
        Self::on_port(port, output)
    }

    pub fn activates(&self, port: &str) -> bool {
        self.next_ports.iter().any(|p| p == port)
    }
}
