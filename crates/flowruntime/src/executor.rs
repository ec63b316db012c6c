use crate::context::RunContext;
use crate::registry::NodeRegistry;
use crate::reporter::{self, ExecutionStatusReport};
use crate::runtime::RuntimeConfig;
use crate::scheduler::{Outcome, Scheduler};
use chrono::{DateTime, Utc};
use flowcore::{
    ErrorHandling, EventBus, ExecutionEvent, ExecutionGraph, ExecutionId, ExecutionRecord,
    ExecutionStatus, ExecutionStore, FlowError, GraphError, NodeContext, NodeError, NodeExecutor,
    NodeId, NodeInput, NodeKind, NodeOutput, NodeResult, NodeSpec, NodeStatus, RetryPolicy,
    Transition, WorkflowDefinition,
};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use petgraph::graph::NodeIndex;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Caller-supplied knobs for a single run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Recorded on the execution record as the initiating user
    pub user_id: Option<Uuid>,
    /// Fire only this trigger instead of every trigger in the definition
    pub trigger_node: Option<NodeId>,
    /// Use a caller-chosen id instead of a fresh one
    pub execution_id: Option<ExecutionId>,
}

impl RunOptions {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn with_trigger(mut self, trigger: impl Into<NodeId>) -> Self {
        self.trigger_node = Some(trigger.into());
        self
    }
}

/// A validated run whose record already exists in the store.
pub struct PreparedRun {
    definition: Arc<WorkflowDefinition>,
    graph: ExecutionGraph,
    starts: Vec<NodeIndex>,
    context: RunContext,
}

impl PreparedRun {
    pub fn execution_id(&self) -> ExecutionId {
        self.context.execution_id()
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }
}

/// Everything one node attempt loop produced
struct Attempted {
    result: Result<NodeOutput, NodeError>,
    attempts: u32,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
}

/// Executes workflow definitions frontier by frontier.
///
/// All members of a frontier run concurrently (bounded by the parallelism
/// limit); their results are applied to the run in declaration order once
/// the whole frontier has settled.
pub struct WorkflowExecutor {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn ExecutionStore>,
    events: EventBus,
    config: RuntimeConfig,
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn ExecutionStore>,
        events: EventBus,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            store,
            events,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Validate the definition and create the `running` record.
    ///
    /// Nothing is persisted when the graph is invalid.
    pub async fn prepare(
        &self,
        definition: WorkflowDefinition,
        trigger_payload: Value,
        options: RunOptions,
    ) -> Result<PreparedRun, FlowError> {
        let graph = ExecutionGraph::build(&definition)?;

        let starts = match &options.trigger_node {
            Some(id) => {
                let idx = graph
                    .index_of(id)
                    .filter(|&idx| graph.node(idx).kind == NodeKind::Trigger)
                    .ok_or_else(|| GraphError::NotATrigger(id.clone()))?;
                vec![idx]
            }
            None => graph.triggers(),
        };

        let execution_id = options.execution_id.unwrap_or_else(Uuid::new_v4);
        let record = ExecutionRecord::running(
            execution_id,
            definition.id,
            options.user_id,
            trigger_payload.clone(),
        );
        self.store.create(record).await?;

        tracing::info!(
            "Prepared execution {} of workflow '{}' ({} nodes)",
            execution_id,
            definition.name,
            definition.nodes.len()
        );

        Ok(PreparedRun {
            context: RunContext::new(execution_id, definition.id, trigger_payload),
            definition: Arc::new(definition),
            graph,
            starts,
        })
    }

    /// Validate, create the record and drive the run to a terminal state.
    pub async fn run(
        &self,
        definition: WorkflowDefinition,
        trigger_payload: Value,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<ExecutionStatusReport, FlowError> {
        let prepared = self.prepare(definition, trigger_payload, options).await?;
        self.execute(prepared, cancel).await
    }

    /// Drive a prepared run to a terminal state.
    ///
    /// Cancellation is observed between frontiers; nodes already dispatched
    /// run to completion (including their retries) and are recorded.
    ///
    /// An error that breaks the run itself (a store failure, say) still
    /// finalizes the record as `failed` when the store accepts it; the
    /// returned report then names the error.
    #[tracing::instrument(skip_all, fields(execution_id = %run.execution_id()))]
    pub async fn execute(
        &self,
        run: PreparedRun,
        cancel: CancellationToken,
    ) -> Result<ExecutionStatusReport, FlowError> {
        let execution_id = run.execution_id();
        let definition = Arc::clone(&run.definition);
        let start_time = Instant::now();

        match self.drive(run, cancel, start_time).await {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!("Execution {} aborted: {}", execution_id, e);
                self.abort(&definition, execution_id, e, start_time).await
            }
        }
    }

    async fn abort(
        &self,
        definition: &WorkflowDefinition,
        execution_id: ExecutionId,
        error: FlowError,
        start_time: Instant,
    ) -> Result<ExecutionStatusReport, FlowError> {
        let record = self.store.load(execution_id).await.ok();
        if record.as_ref().is_some_and(ExecutionRecord::is_finalized) {
            return Err(error);
        }

        let output_data = reporter::aborted_output(definition, record.as_ref(), &error.to_string());
        let finalized = self
            .store
            .append(
                execution_id,
                Transition::Finalized {
                    status: ExecutionStatus::Failed,
                    completed_at: Utc::now(),
                    output_data,
                },
            )
            .await;
        if let Err(e) = finalized {
            tracing::error!("Execution {} could not be finalized: {}", execution_id, e);
            return Err(error);
        }

        self.events.emit(ExecutionEvent::RunFinished {
            execution_id,
            status: ExecutionStatus::Failed,
            duration_ms: start_time.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        match self.store.load(execution_id).await {
            Ok(record) => Ok(ExecutionStatusReport::from_record(&record)),
            Err(_) => Err(error),
        }
    }

    async fn drive(
        &self,
        run: PreparedRun,
        cancel: CancellationToken,
        start_time: Instant,
    ) -> Result<ExecutionStatusReport, FlowError> {
        let PreparedRun {
            definition,
            graph,
            starts,
            mut context,
        } = run;
        let execution_id = context.execution_id();

        self.events.emit(ExecutionEvent::RunStarted {
            execution_id,
            workflow_id: definition.id,
            timestamp: Utc::now(),
        });
        tracing::info!("Starting workflow execution: {}", execution_id);

        let mut scheduler = Scheduler::new(&graph, &starts);
        let max_parallel = definition
            .settings
            .max_parallel_nodes
            .unwrap_or(self.config.max_parallel_nodes)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(max_parallel));

        let mut failures: Vec<NodeId> = Vec::new();
        let mut cancelled = false;
        let mut frontier_index = 0;
        let mut frontier = scheduler.take_ready();

        while !frontier.is_empty() {
            if cancel.is_cancelled() {
                tracing::info!(
                    "Execution {} cancelled before frontier {}",
                    execution_id,
                    frontier_index
                );
                cancelled = true;
                break;
            }
            if context.status() == ExecutionStatus::Pending {
                context.transition(ExecutionStatus::Running)?;
            }

            let node_ids: Vec<NodeId> = frontier
                .iter()
                .map(|&idx| graph.node(idx).id.clone())
                .collect();
            tracing::debug!("Frontier {}: {:?}", frontier_index, node_ids);
            self.events.emit(ExecutionEvent::FrontierStarted {
                execution_id,
                frontier: frontier_index,
                nodes: node_ids,
                timestamp: Utc::now(),
            });

            let mut outcomes = self
                .dispatch_frontier(&definition, &graph, &scheduler, &context, &frontier, &semaphore)
                .await;

            for &idx in &frontier {
                let spec = &definition.nodes[idx.index()];
                let attempted = outcomes.remove(&idx).ok_or_else(|| {
                    FlowError::Execution(format!("no outcome collected for node '{}'", spec.id))
                })?;

                let skipped = match attempted.result {
                    Ok(output) => {
                        tracing::info!(
                            "Node {} completed in {}ms",
                            spec.id,
                            attempted.duration_ms
                        );
                        context.record_output(&spec.id, output.output.clone())?;
                        let skipped =
                            scheduler.resolve(idx, Outcome::Succeeded(&output.next_ports));
                        self.events.emit(ExecutionEvent::NodeCompleted {
                            execution_id,
                            node_id: spec.id.clone(),
                            ports: output.next_ports.clone(),
                            duration_ms: attempted.duration_ms,
                            timestamp: Utc::now(),
                        });
                        self.record(
                            execution_id,
                            NodeResult {
                                node_id: spec.id.clone(),
                                kind: spec.kind,
                                status: NodeStatus::Succeeded,
                                output: Some(output.output),
                                next_ports: output.next_ports,
                                error: None,
                                attempts: attempted.attempts,
                                frontier: Some(frontier_index),
                                started_at: Some(attempted.started_at),
                                finished_at: Some(attempted.finished_at),
                                duration_ms: Some(attempted.duration_ms),
                            },
                        )
                        .await?;
                        skipped
                    }
                    Err(e) => {
                        let tolerated = spec.continue_on_error
                            || definition.settings.on_error == ErrorHandling::ContinueOnError;
                        if tolerated {
                            tracing::warn!("Node {} failed (tolerated): {}", spec.id, e);
                        } else {
                            tracing::error!("Node {} failed: {}", spec.id, e);
                            failures.push(spec.id.clone());
                        }
                        let skipped = scheduler.resolve(idx, Outcome::Failed);
                        self.events.emit(ExecutionEvent::NodeFailed {
                            execution_id,
                            node_id: spec.id.clone(),
                            error: e.to_string(),
                            attempts: attempted.attempts,
                            timestamp: Utc::now(),
                        });
                        self.record(
                            execution_id,
                            NodeResult {
                                node_id: spec.id.clone(),
                                kind: spec.kind,
                                status: NodeStatus::Failed,
                                output: None,
                                next_ports: Vec::new(),
                                error: Some(e.to_string()),
                                attempts: attempted.attempts,
                                frontier: Some(frontier_index),
                                started_at: Some(attempted.started_at),
                                finished_at: Some(attempted.finished_at),
                                duration_ms: Some(attempted.duration_ms),
                            },
                        )
                        .await?;
                        skipped
                    }
                };

                for (skipped_idx, status) in skipped {
                    let node = graph.node(skipped_idx);
                    tracing::debug!("Node {} skipped: {}", node.id, status);
                    self.events.emit(ExecutionEvent::NodeSkipped {
                        execution_id,
                        node_id: node.id.clone(),
                        status,
                        timestamp: Utc::now(),
                    });
                    self.record(
                        execution_id,
                        NodeResult::skipped(node.id.clone(), node.kind, status),
                    )
                    .await?;
                }
            }

            frontier = scheduler.take_ready();
            frontier_index += 1;
        }

        let record = self.store.load(execution_id).await?;
        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if !failures.is_empty() {
            ExecutionStatus::Failed
        } else if reporter::sink_outputs(&definition, &record).is_empty() {
            tracing::warn!("Execution {} has no successful branch", execution_id);
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        context.transition(status)?;

        let output_data = reporter::output_data(&definition, &record, status);
        self.store
            .append(
                execution_id,
                Transition::Finalized {
                    status,
                    completed_at: Utc::now(),
                    output_data,
                },
            )
            .await?;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        self.events.emit(ExecutionEvent::RunFinished {
            execution_id,
            status,
            duration_ms,
            timestamp: Utc::now(),
        });

        let report = ExecutionStatusReport::from_record(&self.store.load(execution_id).await?);
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    async fn record(&self, execution_id: ExecutionId, result: NodeResult) -> Result<(), FlowError> {
        self.store
            .append(execution_id, Transition::NodeRecorded(result))
            .await?;
        Ok(())
    }

    /// Run every node of the frontier and wait for all of them to settle.
    async fn dispatch_frontier(
        &self,
        definition: &WorkflowDefinition,
        graph: &ExecutionGraph,
        scheduler: &Scheduler,
        context: &RunContext,
        frontier: &[NodeIndex],
        semaphore: &Arc<Semaphore>,
    ) -> HashMap<NodeIndex, Attempted> {
        let snapshot = context.snapshot();
        let mut running = FuturesUnordered::new();

        for &idx in frontier {
            let spec = definition.nodes[idx.index()].clone();
            let input: NodeInput = scheduler
                .delivered_sources(idx)
                .iter()
                .filter_map(|&source| {
                    let id = &graph.node(source).id;
                    context.output(id).map(|value| (id.clone(), value.clone()))
                })
                .collect();

            let mut ctx = NodeContext::new(
                context.execution_id(),
                context.workflow_id(),
                spec.id.clone(),
                self.events.create_emitter(context.execution_id(), spec.id.clone()),
            );
            ctx.trigger_payload = context.trigger_payload();
            ctx.outputs = Arc::clone(&snapshot);

            let policy = self.retry_policy(definition, &spec);
            let limit = Duration::from_millis(self.node_timeout_ms(definition, &spec).max(1));
            let executor = self.registry.get(spec.kind);
            let events = self.events.clone();
            let semaphore = Arc::clone(semaphore);

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                match executor {
                    Ok(executor) => {
                        attempt_node(executor, spec, input, ctx, policy, limit, events).await
                    }
                    Err(e) => Attempted::immediate(Err(e)),
                }
            });
            running.push(async move { (idx, handle.await) });
        }

        let mut outcomes = HashMap::new();
        while let Some((idx, joined)) = running.next().await {
            let attempted = joined.unwrap_or_else(|e| {
                Attempted::immediate(Err(NodeError::Execution(format!("task aborted: {}", e))))
            });
            outcomes.insert(idx, attempted);
        }
        outcomes
    }

    fn retry_policy(&self, definition: &WorkflowDefinition, spec: &NodeSpec) -> RetryPolicy {
        spec.retry_policy
            .clone()
            .or_else(|| definition.settings.retry.clone())
            .unwrap_or_else(|| self.config.retry.clone())
    }

    fn node_timeout_ms(&self, definition: &WorkflowDefinition, spec: &NodeSpec) -> u64 {
        spec.timeout_ms
            .or(definition.settings.node_timeout_ms)
            .unwrap_or(self.config.node_timeout_ms)
    }
}

impl Attempted {
    fn immediate(result: Result<NodeOutput, NodeError>) -> Self {
        let now = Utc::now();
        Self {
            result,
            attempts: 1,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }
}

/// Attempt loop for one node: per-attempt timeout, exponential backoff
/// between retryable failures. A panic inside `execute` fails only that
/// attempt.
#[tracing::instrument(skip_all, fields(node_id = %spec.id, kind = %spec.kind))]
async fn attempt_node(
    executor: Arc<dyn NodeExecutor>,
    spec: NodeSpec,
    input: NodeInput,
    mut ctx: NodeContext,
    policy: RetryPolicy,
    limit: Duration,
    events: EventBus,
) -> Attempted {
    let started_at = Utc::now();
    let start = Instant::now();
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    let result = loop {
        ctx.attempt = attempt;
        events.emit(ExecutionEvent::NodeStarted {
            execution_id: ctx.execution_id,
            node_id: spec.id.clone(),
            kind: spec.kind,
            attempt,
            timestamp: Utc::now(),
        });

        let call = AssertUnwindSafe(executor.execute(&spec, input.clone(), &ctx)).catch_unwind();
        let outcome = match timeout(limit, call).await {
            Ok(Ok(Ok(output))) => check_ports(&spec, output),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(payload)) => Err(NodeError::Execution(format!(
                "node panicked: {}",
                panic_message(payload.as_ref())
            ))),
            Err(_) => Err(NodeError::Timeout {
                ms: limit.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(output) => break Ok(output),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    "Node {} attempt {}/{} failed: {}; retrying in {}ms",
                    spec.id,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                events.emit(ExecutionEvent::NodeRetrying {
                    execution_id: ctx.execution_id,
                    node_id: spec.id.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => break Err(e),
        }
    };

    Attempted {
        result,
        attempts: attempt,
        started_at,
        finished_at: Utc::now(),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Reject outputs that name ports the node kind does not have.
///
/// A condition activates exactly one branch; every other kind activates at
/// least its single output.
fn check_ports(spec: &NodeSpec, output: NodeOutput) -> Result<NodeOutput, NodeError> {
    if output.next_ports.is_empty() {
        return Err(NodeError::InvalidPort(format!(
            "node '{}' activated no port",
            spec.id
        )));
    }
    if let Some(port) = output
        .next_ports
        .iter()
        .find(|port| !spec.kind.has_output_port(port))
    {
        return Err(NodeError::InvalidPort(format!(
            "{} node '{}' has no port '{}'",
            spec.kind, spec.id, port
        )));
    }
    if spec.kind == NodeKind::Condition && output.next_ports.len() != 1 {
        return Err(NodeError::InvalidPort(format!(
            "condition '{}' must activate exactly one branch, got {:?}",
            spec.id, output.next_ports
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condition_must_pick_one_branch() {
        let spec = NodeSpec::condition("c", "true");
        let both = NodeOutput {
            output: json!(true),
            next_ports: vec!["outputTrue".into(), "outputFalse".into()],
        };
        assert!(matches!(check_ports(&spec, both), Err(NodeError::InvalidPort(_))));
        assert!(check_ports(&spec, NodeOutput::branch(false, json!(false))).is_ok());
    }

    #[test]
    fn action_cannot_activate_branch_ports() {
        let spec = NodeSpec::action("a");
        let wrong = NodeOutput::on_port("outputTrue", json!(null));
        assert!(matches!(check_ports(&spec, wrong), Err(NodeError::InvalidPort(_))));
        let none = NodeOutput {
            output: json!(null),
            next_ports: Vec::new(),
        };
        assert!(check_ports(&spec, none).is_err());
        assert!(check_ports(&spec, NodeOutput::new(json!(1))).is_ok());
    }
}
