use crate::error::ProviderError;
use crate::{debug, http, time};
use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeInput, NodeKind, NodeOutput, NodeSpec};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One side effect requested by an action node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRequest {
    pub node_id: String,
    pub action_type: String,
    pub config: Value,
    pub input: Value,
}

/// Performs the side effects named by `actionType`
#[async_trait]
pub trait ActionProvider: Send + Sync {
    async fn perform(&self, request: ActionRequest) -> Result<Value, ProviderError>;
}

/// Delegates to an [`ActionProvider`]
pub struct ActionExecutor {
    provider: Arc<dyn ActionProvider>,
}

impl ActionExecutor {
    pub fn new(provider: Arc<dyn ActionProvider>) -> Self {
        Self { provider }
    }

    fn action_type(node: &NodeSpec) -> Result<&str, NodeError> {
        node.config_str("actionType")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                NodeError::Configuration(format!("action '{}' has no actionType", node.id))
            })
    }

    /// `actionConfig` when present, otherwise the node config minus `actionType`.
    fn action_config(node: &NodeSpec) -> Value {
        if let Some(config) = node.config.get("actionConfig") {
            return config.clone();
        }
        let rest: Map<String, Value> = node
            .config
            .iter()
            .filter(|(key, _)| key.as_str() != "actionType")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(rest)
    }
}

#[async_trait]
impl NodeExecutor for ActionExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Action
    }

    fn description(&self) -> &str {
        "Performs a side effect (http, log, delay) with the upstream data"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        input: NodeInput,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let action_type = Self::action_type(node)?;
        ctx.events.info(format!("Performing {} action", action_type));

        let request = ActionRequest {
            node_id: node.id.clone(),
            action_type: action_type.to_string(),
            config: Self::action_config(node),
            input: input.primary(),
        };
        let result = self.provider.perform(request).await?;
        Ok(NodeOutput::new(result))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        Self::action_type(node).map(|_| ())
    }
}

/// Built-in handlers: `http` (alias `webhook`), `log` and `delay`
pub struct StandardActionProvider {
    client: reqwest::Client,
}

impl StandardActionProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub const ACTION_TYPES: [&'static str; 4] = ["http", "webhook", "log", "delay"];
}

impl Default for StandardActionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionProvider for StandardActionProvider {
    async fn perform(&self, request: ActionRequest) -> Result<Value, ProviderError> {
        match request.action_type.to_ascii_lowercase().as_str() {
            "http" | "webhook" => http::perform(&self.client, &request).await,
            "log" => Ok(debug::perform(&request)),
            "delay" => time::perform(&request).await,
            other => Err(ProviderError::Unsupported(other.to_string())),
        }
    }
}
