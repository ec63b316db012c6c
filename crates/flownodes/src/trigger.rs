use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeInput, NodeKind, NodeOutput, NodeSpec};

/// Entry point of a run: hands the trigger payload to its successors
pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Trigger
    }

    fn description(&self) -> &str {
        "Starts the workflow with the incoming payload"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        _input: NodeInput,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        if let Some(kind) = node.config_str("triggerType") {
            ctx.events.info(format!("Triggered by {}", kind));
        }
        Ok(NodeOutput::new(ctx.trigger_payload.as_ref().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::EventBus;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn returns_payload_on_output() {
        let bus = EventBus::new(8);
        let id = Uuid::new_v4();
        let ctx = NodeContext::new(id, Uuid::new_v4(), "t", bus.create_emitter(id, "t".into()))
            .with_trigger_payload(json!({"text": "hi"}));
        let output = TriggerExecutor
            .execute(&NodeSpec::trigger("t"), NodeInput::new(), &ctx)
            .await
            .unwrap();
        assert_eq!(output.output, json!({"text": "hi"}));
        assert!(output.activates("output"));
    }
}
