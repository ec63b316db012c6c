use crate::expr::{self, Expr};
use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeInput, NodeKind, NodeOutput, NodeSpec};
use serde_json::json;

/// Picks `outputTrue` or `outputFalse` from a boolean expression
pub struct ConditionExecutor;

impl ConditionExecutor {
    fn expression(node: &NodeSpec) -> Result<Expr, NodeError> {
        let source = node
            .config_str("conditionExpression")
            .or_else(|| node.config_str("condition"))
            .ok_or_else(|| {
                NodeError::Configuration(format!("condition '{}' has no expression", node.id))
            })?;
        Expr::parse(source)
    }
}

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    fn description(&self) -> &str {
        "Branches on an expression over the upstream data"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        input: NodeInput,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let expression = Self::expression(node)?;
        let value = expression.evaluate(&expr::scope(&input, ctx))?;
        let result = expr::truthy(&value);
        tracing::debug!("Condition {} evaluated to {}", node.id, result);
        Ok(NodeOutput::branch(result, json!({ "result": result })))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        Self::expression(node).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::{ports, EventBus};
    use serde_json::Value;
    use uuid::Uuid;

    fn ctx(payload: Value) -> NodeContext {
        let bus = EventBus::new(8);
        let id = Uuid::new_v4();
        NodeContext::new(id, Uuid::new_v4(), "c", bus.create_emitter(id, "c".into()))
            .with_trigger_payload(payload)
    }

    fn single(source: &str, value: Value) -> NodeInput {
        [(source.to_string(), value)].into_iter().collect()
    }

    #[tokio::test]
    async fn positive_sentiment_takes_true_branch() {
        let node = NodeSpec::condition("condition-1", "data.sentiment === 'positive'");
        let output = ConditionExecutor
            .execute(&node, single("ai-1", json!({"sentiment": "positive"})), &ctx(Value::Null))
            .await
            .unwrap();
        assert_eq!(output.next_ports, vec![ports::OUTPUT_TRUE.to_string()]);
        assert_eq!(output.output, json!({"result": true}));
    }

    #[tokio::test]
    async fn legacy_condition_key_and_false_branch() {
        let node = NodeSpec::new("c", NodeKind::Condition)
            .with_config("condition", "trigger.vip && data.total > 100");
        let output = ConditionExecutor
            .execute(&node, single("a", json!({"total": 50})), &ctx(json!({"vip": true})))
            .await
            .unwrap();
        assert!(output.activates(ports::OUTPUT_FALSE));
    }

    #[tokio::test]
    async fn join_input_is_addressed_by_source_id() {
        let node = NodeSpec::condition("c", "input.left.ok && input.right.ok");
        let input: NodeInput = [
            ("left".to_string(), json!({"ok": true})),
            ("right".to_string(), json!({"ok": true})),
        ]
        .into_iter()
        .collect();
        let output = ConditionExecutor
            .execute(&node, input, &ctx(Value::Null))
            .await
            .unwrap();
        assert!(output.activates(ports::OUTPUT_TRUE));
    }

    #[tokio::test]
    async fn malformed_expression_is_evaluation_error() {
        let node = NodeSpec::condition("c", "data.sentiment ===");
        assert!(matches!(
            ConditionExecutor
                .execute(&node, NodeInput::new(), &ctx(Value::Null))
                .await,
            Err(NodeError::Evaluation(_))
        ));
        assert!(ConditionExecutor.validate_config(&node).is_err());
    }

    #[test]
    fn missing_expression_is_configuration_error() {
        let node = NodeSpec::new("c", NodeKind::Condition);
        assert!(matches!(
            ConditionExecutor.validate_config(&node),
            Err(NodeError::Configuration(_))
        ));
    }
}
