use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = String;

/// Port names shared by the editor and the engine.
pub mod ports {
    pub const INPUT: &str = "input";
    pub const OUTPUT: &str = "output";
    pub const OUTPUT_TRUE: &str = "outputTrue";
    pub const OUTPUT_FALSE: &str = "outputFalse";
}

/// Immutable workflow snapshot consumed by value per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        source_port: impl Into<String>,
        target: impl Into<NodeId>,
    ) {
        self.edges.push(EdgeSpec {
            id: None,
            source: source.into(),
            source_port: source_port.into(),
            target: target.into(),
        });
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Trigger)
    }
}

/// The fixed set of node kinds the engine knows how to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Trigger,
    Ai,
    Condition,
    Action,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [
        NodeKind::Trigger,
        NodeKind::Ai,
        NodeKind::Condition,
        NodeKind::Action,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Trigger => "trigger",
            NodeKind::Ai => "ai",
            NodeKind::Condition => "condition",
            NodeKind::Action => "action",
        }
    }

    pub fn output_ports(&self) -> &'static [&'static str] {
        match self {
            NodeKind::Condition => &[ports::OUTPUT_TRUE, ports::OUTPUT_FALSE],
            _ => &[ports::OUTPUT],
        }
    }

    pub fn input_ports(&self) -> &'static [&'static str] {
        match self {
            NodeKind::Trigger => &[],
            _ => &[ports::INPUT],
        }
    }

    pub fn has_output_port(&self, port: &str) -> bool {
        self.output_ports().contains(&port)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "data")]
    pub config: Map<String, Value>,
    #[serde(default, alias = "retryPolicy")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
    #[serde(default, alias = "continueOnError")]
    pub continue_on_error: bool,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            config: Map::new(),
            retry_policy: None,
            timeout_ms: None,
            continue_on_error: false,
        }
    }

    pub fn trigger(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Trigger)
    }

    pub fn ai(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Ai)
    }

    pub fn condition(id: impl Into<NodeId>, expression: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Condition).with_config("conditionExpression", expression.into())
    }

    pub fn action(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Action)
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy {
            max_attempts,
            base_delay_ms,
            ..RetryPolicy::default()
        });
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Directed edge from a source output port to a target node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub source: NodeId,
    #[serde(default = "default_port", alias = "sourceHandle")]
    pub source_port: String,
    pub target: NodeId,
}

fn default_port() -> String {
    ports::OUTPUT.to_string()
}

/// Retry policy for node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(alias = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(alias = "baseDelayMs")]
    pub base_delay_ms: u64,
    #[serde(alias = "backoffMultiplier")]
    pub backoff_multiplier: f64,
    #[serde(alias = "maxDelayMs")]
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Never fewer than one attempt.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let multiplier = if self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0 {
            self.backoff_multiplier
        } else {
            1.0
        };
        let delay = (self.base_delay_ms as f64) * multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        std::time::Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// Per-workflow overrides of the runtime defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub retry: Option<RetryPolicy>,
    #[serde(alias = "nodeTimeoutMs")]
    pub node_timeout_ms: Option<u64>,
    #[serde(alias = "maxParallelNodes")]
    pub max_parallel_nodes: Option<usize>,
    #[serde(alias = "onError")]
    pub on_error: ErrorHandling,
}

/// What an unrecovered node failure means for the whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorHandling {
    #[default]
    StopWorkflow,
    ContinueOnError,
}
