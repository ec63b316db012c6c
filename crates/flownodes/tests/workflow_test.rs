// crates/flownodes/tests/workflow_test.rs

use async_trait::async_trait;
use flowcore::{
    ports, ExecutionStatus, NodeSpec, NodeStatus, RetryPolicy, WorkflowDefinition,
    WorkflowSettings,
};
use flownodes::{
    standard_registry, ActionProvider, ActionRequest, AiProvider, AiRequest, ProviderError,
    StandardActionProvider,
};
use flowruntime::{FlowRuntime, RunOptions};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Classifies by keyword; fails the first `failures` calls.
struct KeywordModel {
    calls: AtomicU32,
    failures: u32,
}

impl KeywordModel {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures,
        })
    }
}

#[async_trait]
impl AiProvider for KeywordModel {
    async fn complete(&self, request: AiRequest) -> Result<Value, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(ProviderError::Status {
                status: 503,
                body: "model overloaded".to_string(),
            });
        }
        let text = request.input["text"].as_str().unwrap_or_default();
        let sentiment = if text.contains("love") { "positive" } else { "negative" };
        Ok(json!({ "sentiment": sentiment, "prompt": request.prompt }))
    }
}

/// Records every action and answers like the log handler.
#[derive(Default)]
struct RecordingActions {
    performed: Mutex<Vec<ActionRequest>>,
}

#[async_trait]
impl ActionProvider for RecordingActions {
    async fn perform(&self, request: ActionRequest) -> Result<Value, ProviderError> {
        self.performed.lock().unwrap().push(request.clone());
        Ok(json!({ "done": request.config }))
    }
}

fn sentiment_workflow() -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("Customer feedback").with_settings(WorkflowSettings {
        retry: Some(RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            ..RetryPolicy::default()
        }),
        ..WorkflowSettings::default()
    });
    def.add_node(NodeSpec::trigger("trigger-1").with_config("triggerType", "webhook"));
    def.add_node(
        NodeSpec::ai("ai-1")
            .with_config("model", "gpt-4o")
            .with_config("prompt", "Classify the sentiment of: {{data.text}}"),
    );
    def.add_node(NodeSpec::condition(
        "condition-1",
        "data.sentiment === 'positive'",
    ));
    def.add_node(
        NodeSpec::action("action-positive")
            .with_config("actionType", "log")
            .with_config("actionConfig", json!({"message": "thank the customer"})),
    );
    def.add_node(
        NodeSpec::action("action-negative")
            .with_config("actionType", "log")
            .with_config("actionConfig", json!({"message": "open a ticket"})),
    );
    def.connect("trigger-1", ports::OUTPUT, "ai-1");
    def.connect("ai-1", ports::OUTPUT, "condition-1");
    def.connect("condition-1", ports::OUTPUT_TRUE, "action-positive");
    def.connect("condition-1", ports::OUTPUT_FALSE, "action-negative");
    def
}

fn create_runtime(model: Arc<KeywordModel>, actions: Arc<RecordingActions>) -> FlowRuntime {
    FlowRuntime::new(standard_registry(model, actions))
}

#[tokio::test]
async fn test_positive_feedback_takes_positive_branch() {
    let model = KeywordModel::new(0);
    let actions = Arc::new(RecordingActions::default());
    let runtime = create_runtime(model.clone(), actions.clone());

    let report = runtime
        .run_workflow_blocking(
            sentiment_workflow(),
            json!({"text": "I love this product"}),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(
        report.node("ai-1").unwrap().output.as_ref().unwrap()["prompt"],
        json!("Classify the sentiment of: I love this product")
    );
    assert_eq!(
        report.node("condition-1").unwrap().ports,
        vec![ports::OUTPUT_TRUE.to_string()]
    );
    assert_eq!(
        report.node("action-negative").unwrap().status,
        NodeStatus::Pruned
    );

    let performed = actions.performed.lock().unwrap();
    assert_eq!(performed.len(), 1);
    assert_eq!(performed[0].node_id, "action-positive");
    assert_eq!(performed[0].input, json!({"result": true}));

    let outputs = &report.output_data.as_ref().unwrap()["outputs"];
    assert_eq!(
        outputs["action-positive"],
        json!({"done": {"message": "thank the customer"}})
    );
}

#[tokio::test]
async fn test_negative_feedback_takes_negative_branch() {
    let actions = Arc::new(RecordingActions::default());
    let runtime = create_runtime(KeywordModel::new(0), actions.clone());

    let report = runtime
        .run_workflow_blocking(
            sentiment_workflow(),
            json!({"text": "arrived broken"}),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(
        report.node("action-positive").unwrap().status,
        NodeStatus::Pruned
    );
    assert_eq!(
        actions.performed.lock().unwrap()[0].node_id,
        "action-negative"
    );
}

#[tokio::test]
async fn test_flaky_model_recovers_within_retry_budget() {
    let model = KeywordModel::new(1);
    let runtime = create_runtime(model.clone(), Arc::new(RecordingActions::default()));

    let report = runtime
        .run_workflow_blocking(sentiment_workflow(), json!({"text": "love"}), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.node("ai-1").unwrap().attempts, 2);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_model_outage_fails_the_run() {
    let model = KeywordModel::new(u32::MAX);
    let actions = Arc::new(RecordingActions::default());
    let runtime = create_runtime(model.clone(), actions.clone());

    let report = runtime
        .run_workflow_blocking(sentiment_workflow(), json!({"text": "love"}), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    let ai = report.node("ai-1").unwrap();
    assert_eq!(ai.attempts, 2);
    assert_eq!(
        ai.error.as_deref(),
        Some("Provider error: Unexpected response status 503: model overloaded")
    );
    assert_eq!(
        report.node("condition-1").unwrap().status,
        NodeStatus::UpstreamFailed
    );
    assert!(actions.performed.lock().unwrap().is_empty());

    let stored = runtime.get_execution_status(report.execution_id).await.unwrap();
    assert_eq!(stored, report);
}

#[tokio::test]
async fn test_editor_json_runs_with_standard_actions() {
    let definition: WorkflowDefinition = serde_json::from_value(json!({
        "name": "From the editor",
        "nodes": [
            { "id": "trigger-1", "type": "trigger", "data": { "label": "Webhook" } },
            { "id": "condition-1", "type": "condition",
              "data": { "condition": "trigger.amount > 100" } },
            { "id": "big", "type": "action",
              "data": { "actionType": "log", "actionConfig": { "message": "big order" } } },
            { "id": "small", "type": "action",
              "data": { "actionType": "delay", "actionConfig": { "delay_ms": 1 } } }
        ],
        "edges": [
            { "id": "e1", "source": "trigger-1", "target": "condition-1" },
            { "id": "e2", "source": "condition-1", "sourceHandle": "outputTrue", "target": "big" },
            { "id": "e3", "source": "condition-1", "sourceHandle": "outputFalse", "target": "small" }
        ]
    }))
    .unwrap();

    let runtime = FlowRuntime::new(standard_registry(
        KeywordModel::new(0),
        Arc::new(StandardActionProvider::new()),
    ));
    let report = runtime
        .run_workflow_blocking(definition, json!({"amount": 250}), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(
        report.node("big").unwrap().output.as_ref().unwrap()["message"],
        json!("big order")
    );
    assert_eq!(report.node("small").unwrap().status, NodeStatus::Pruned);
}
