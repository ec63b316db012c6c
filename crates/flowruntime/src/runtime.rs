use crate::executor::{RunOptions, WorkflowExecutor};
use crate::registry::NodeRegistry;
use crate::reporter::ExecutionStatusReport;
use flowcore::{
    EventBus, ExecutionEvent, ExecutionId, ExecutionStore, FlowError, InMemoryExecutionStore,
    RetryPolicy, StoreError, WorkflowDefinition,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Handle kept for every run that has not reached a terminal state yet
#[derive(Clone)]
struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Main runtime for executing workflows
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: EventBus,
    store: Arc<dyn ExecutionStore>,
    active: Arc<RwLock<HashMap<ExecutionId, ActiveRun>>>,
}

impl FlowRuntime {
    /// Create a runtime with default settings and an in-memory store
    pub fn new(registry: NodeRegistry) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        Self::with_store(
            Arc::new(registry),
            Arc::new(InMemoryExecutionStore::with_retention(
                config.retained_executions,
            )),
            config,
        )
    }

    /// Create a runtime backed by the given store
    pub fn with_store(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn ExecutionStore>,
        config: RuntimeConfig,
    ) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            event_bus.clone(),
            config,
        ));

        Self {
            registry,
            executor,
            event_bus,
            store,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Validate, create the record and start the run in the background.
    ///
    /// Returns as soon as the `running` record exists. Graph errors are
    /// returned here and leave no record behind.
    pub async fn run_workflow(
        &self,
        definition: WorkflowDefinition,
        trigger_payload: Value,
        options: RunOptions,
    ) -> Result<ExecutionId, FlowError> {
        let prepared = self
            .executor
            .prepare(definition, trigger_payload, options)
            .await?;
        let execution_id = prepared.execution_id();
        let (cancel, done_tx) = self.track(execution_id).await;

        let executor = Arc::clone(&self.executor);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            if let Err(e) = executor.execute(prepared, cancel).await {
                tracing::error!("Execution {} left unfinalized: {}", execution_id, e);
            }
            active.write().await.remove(&execution_id);
            let _ = done_tx.send(true);
        });

        Ok(execution_id)
    }

    /// Run to completion on the caller's task and return the final report.
    pub async fn run_workflow_blocking(
        &self,
        definition: WorkflowDefinition,
        trigger_payload: Value,
        options: RunOptions,
    ) -> Result<ExecutionStatusReport, FlowError> {
        let prepared = self
            .executor
            .prepare(definition, trigger_payload, options)
            .await?;
        let execution_id = prepared.execution_id();
        let (cancel, done_tx) = self.track(execution_id).await;

        let result = self.executor.execute(prepared, cancel).await;
        self.active.write().await.remove(&execution_id);
        let _ = done_tx.send(true);
        result
    }

    async fn track(&self, execution_id: ExecutionId) -> (CancellationToken, watch::Sender<bool>) {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.active.write().await.insert(
            execution_id,
            ActiveRun {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        (cancel, done_tx)
    }

    pub async fn get_execution_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionStatusReport, FlowError> {
        let record = self.store.load(execution_id).await.map_err(|e| match e {
            StoreError::NotFound(id) => FlowError::ExecutionNotFound(id),
            other => FlowError::Store(other),
        })?;
        Ok(ExecutionStatusReport::from_record(&record))
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `false` when the run already finished; unknown ids are an error.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<bool, FlowError> {
        if let Some(run) = self.active.read().await.get(&execution_id) {
            tracing::info!("Cancellation requested for execution {}", execution_id);
            run.cancel.cancel();
            return Ok(true);
        }
        self.get_execution_status(execution_id).await?;
        Ok(false)
    }

    /// Wait until the run is terminal and return its report.
    pub async fn wait(&self, execution_id: ExecutionId) -> Result<ExecutionStatusReport, FlowError> {
        let done = self
            .active
            .read()
            .await
            .get(&execution_id)
            .map(|run| run.done.clone());
        if let Some(mut done) = done {
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        }
        self.get_execution_status(execution_id).await
    }

    pub async fn active_executions(&self) -> Vec<ExecutionId> {
        self.active.read().await.keys().copied().collect()
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Used when neither the node nor the workflow carries a policy
    pub retry: RetryPolicy,
    pub node_timeout_ms: u64,
    /// Finalized records the built-in in-memory store keeps
    pub retained_executions: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            retry: RetryPolicy::default(),
            node_timeout_ms: 30_000,
            retained_executions: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
