use flowcore::{NodeError, NodeExecutor, NodeId, NodeKind, WorkflowDefinition};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata about a node kind
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetadata {
    pub kind: NodeKind,
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl NodeMetadata {
    fn for_executor(executor: &dyn NodeExecutor) -> Self {
        let kind = executor.kind();
        let category = match kind {
            NodeKind::Trigger => "input",
            NodeKind::Ai => "ai",
            NodeKind::Condition => "logic",
            NodeKind::Action => "output",
        };
        let inputs = kind
            .input_ports()
            .iter()
            .map(|port| PortDefinition {
                name: port.to_string(),
                description: "Outputs of every delivering predecessor".to_string(),
                required: true,
            })
            .collect();
        let outputs = kind
            .output_ports()
            .iter()
            .map(|port| PortDefinition {
                name: port.to_string(),
                description: match *port {
                    flowcore::ports::OUTPUT_TRUE => "Taken when the expression is truthy",
                    flowcore::ports::OUTPUT_FALSE => "Taken when the expression is falsy",
                    _ => "Node output",
                }
                .to_string(),
                required: false,
            })
            .collect();
        Self {
            kind,
            description: executor.description().to_string(),
            category: category.to_string(),
            inputs,
            outputs,
        }
    }
}

/// One executor per node kind
#[derive(Clone, Default)]
pub struct NodeRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under the kind it reports, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let kind = executor.kind();
        tracing::info!("Registering node kind: {}", kind);
        self.executors.insert(kind, executor);
    }

    pub fn with(mut self, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, kind: NodeKind) -> Result<Arc<dyn NodeExecutor>, NodeError> {
        self.executors.get(&kind).cloned().ok_or_else(|| {
            NodeError::Configuration(format!("no executor registered for kind '{}'", kind))
        })
    }

    /// Registered kinds in their canonical order
    pub fn list_node_kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|kind| self.executors.contains_key(kind))
            .collect()
    }

    pub fn get_metadata(&self, kind: NodeKind) -> Option<NodeMetadata> {
        self.executors
            .get(&kind)
            .map(|executor| NodeMetadata::for_executor(executor.as_ref()))
    }

    /// Run every node's `validate_config` against its executor.
    ///
    /// Returns the failing nodes in declaration order; empty means the
    /// definition is runnable as far as configuration goes.
    pub fn validate_configs(&self, definition: &WorkflowDefinition) -> Vec<(NodeId, NodeError)> {
        definition
            .nodes
            .iter()
            .filter_map(|node| {
                let result = self
                    .get(node.kind)
                    .and_then(|executor| executor.validate_config(node));
                result.err().map(|e| (node.id.clone(), e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowcore::{NodeContext, NodeInput, NodeOutput, NodeSpec};

    struct Fixed(NodeKind);

    #[async_trait]
    impl NodeExecutor for Fixed {
        fn kind(&self) -> NodeKind {
            self.0
        }

        fn description(&self) -> &str {
            "fixed"
        }

        async fn execute(
            &self,
            _node: &NodeSpec,
            _input: NodeInput,
            _ctx: &NodeContext,
        ) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::new(serde_json::Value::Null))
        }

        fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
            match node.config_str("required") {
                Some(_) => Ok(()),
                None if self.0 == NodeKind::Action => {
                    Err(NodeError::Configuration("required is missing".into()))
                }
                None => Ok(()),
            }
        }
    }

    #[test]
    fn lists_kinds_in_canonical_order() {
        let registry = NodeRegistry::new()
            .with(Arc::new(Fixed(NodeKind::Action)))
            .with(Arc::new(Fixed(NodeKind::Trigger)));
        assert_eq!(
            registry.list_node_kinds(),
            vec![NodeKind::Trigger, NodeKind::Action]
        );
    }

    #[test]
    fn missing_kind_is_a_configuration_error() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.get(NodeKind::Ai),
            Err(NodeError::Configuration(_))
        ));
    }

    #[test]
    fn metadata_lists_condition_branches() {
        let registry = NodeRegistry::new().with(Arc::new(Fixed(NodeKind::Condition)));
        let meta = registry.get_metadata(NodeKind::Condition).unwrap();
        let names: Vec<_> = meta.outputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["outputTrue", "outputFalse"]);
        assert_eq!(meta.description, "fixed");
    }

    #[test]
    fn validate_configs_reports_failing_nodes() {
        let registry = NodeRegistry::new()
            .with(Arc::new(Fixed(NodeKind::Trigger)))
            .with(Arc::new(Fixed(NodeKind::Action)));
        let mut def = WorkflowDefinition::new("cfg");
        def.add_node(NodeSpec::trigger("t"));
        def.add_node(NodeSpec::action("a"));
        def.add_node(NodeSpec::action("b").with_config("required", "yes"));
        def.add_node(NodeSpec::ai("x"));
        let failures: Vec<_> = registry
            .validate_configs(&def)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(failures, vec!["a".to_string(), "x".to_string()]);
    }
}
