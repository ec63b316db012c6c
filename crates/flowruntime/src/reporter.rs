use chrono::{DateTime, Utc};
use flowcore::{
    ExecutionId, ExecutionRecord, ExecutionStatus, NodeId, NodeKind, NodeResult, NodeStatus,
    WorkflowDefinition, WorkflowId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use uuid::Uuid;

/// Per-node slice of a status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontier: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl From<&NodeResult> for NodeReport {
    fn from(result: &NodeResult) -> Self {
        Self {
            kind: result.kind,
            status: result.status,
            attempts: result.attempts,
            output: result.output.clone(),
            error: result.error.clone(),
            ports: result.next_ports.clone(),
            frontier: result.frontier,
            duration_ms: result.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    /// Absent when the run itself broke rather than one of its nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub message: String,
}

impl FailureSummary {
    fn describe(&self) -> String {
        match &self.node_id {
            Some(id) => format!("node '{}': {}", id, self.message),
            None => format!("run: {}", self.message),
        }
    }
}

/// Caller-facing view of an execution, terminal or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusReport {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub per_node_results: BTreeMap<NodeId, NodeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
}

impl ExecutionStatusReport {
    pub fn from_record(record: &ExecutionRecord) -> Self {
        let per_node_results = record
            .node_results
            .iter()
            .map(|(id, result)| (id.clone(), NodeReport::from(result)))
            .collect();
        let duration_ms = record
            .completed_at
            .map(|done| (done - record.started_at).num_milliseconds().max(0) as u64);

        Self {
            execution_id: record.id,
            workflow_id: record.workflow_id,
            user_id: record.user_id,
            status: record.status,
            started_at: record.started_at,
            completed_at: record.completed_at,
            duration_ms,
            per_node_results,
            failure: first_failure(record).or_else(|| run_failure(record)),
            output_data: record.output_data.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeReport> {
        self.per_node_results.get(node_id)
    }

    /// Ids of every node that actually ran, successfully or not
    pub fn executed_nodes(&self) -> BTreeSet<NodeId> {
        self.per_node_results
            .iter()
            .filter(|(_, report)| report.status.was_executed())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.per_node_results
            .values()
            .filter(|report| report.status == status)
            .count()
    }

    /// One line, suitable for logs.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "execution {} {}: {} succeeded, {} failed, {} pruned, {} upstream failed",
            self.execution_id,
            self.status,
            self.count(NodeStatus::Succeeded),
            self.count(NodeStatus::Failed),
            self.count(NodeStatus::Pruned),
            self.count(NodeStatus::UpstreamFailed),
        );
        if let Some(failure) = &self.failure {
            let _ = write!(line, " ({})", failure.describe());
        }
        line
    }

    /// Multi-line rendering for the CLI
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Execution {}", self.execution_id);
        let _ = writeln!(out, "  status:   {}", self.status);
        if let Some(ms) = self.duration_ms {
            let _ = writeln!(out, "  duration: {}ms", ms);
        }
        let _ = writeln!(out, "  nodes:");

        let mut rows: Vec<_> = self.per_node_results.iter().collect();
        rows.sort_by_key(|(id, report)| (report.frontier.unwrap_or(usize::MAX), (*id).clone()));
        for (id, report) in rows {
            let _ = write!(out, "    {:<24} {:<16}", id, report.status.to_string());
            if report.attempts > 1 {
                let _ = write!(out, " attempts={}", report.attempts);
            }
            if let Some(error) = &report.error {
                let _ = write!(out, " error={}", error);
            }
            out.push('\n');
        }
        if let Some(failure) = &self.failure {
            let _ = writeln!(out, "  failed at {}", failure.describe());
        }
        out
    }
}

/// First failure by frontier, then node id.
fn first_failure(record: &ExecutionRecord) -> Option<FailureSummary> {
    record
        .node_results
        .values()
        .filter(|result| result.status == NodeStatus::Failed)
        .min_by_key(|result| (result.frontier.unwrap_or(usize::MAX), result.node_id.clone()))
        .map(|result| FailureSummary {
            node_id: Some(result.node_id.clone()),
            message: result.error.clone().unwrap_or_default(),
        })
}

/// Failure recorded on `output_data` by a run that aborted outside any node.
fn run_failure(record: &ExecutionRecord) -> Option<FailureSummary> {
    if record.status != ExecutionStatus::Failed {
        return None;
    }
    let error = record.output_data.as_ref()?.get("error")?;
    Some(FailureSummary {
        node_id: error.get("nodeId").and_then(Value::as_str).map(str::to_string),
        message: error.get("message").and_then(Value::as_str)?.to_string(),
    })
}

/// Succeeded nodes none of whose activated ports lead anywhere.
pub fn sink_outputs(definition: &WorkflowDefinition, record: &ExecutionRecord) -> Map<String, Value> {
    let mut outputs = Map::new();
    for node in &definition.nodes {
        let Some(result) = record.node_results.get(&node.id) else {
            continue;
        };
        if result.status != NodeStatus::Succeeded {
            continue;
        }
        let feeds_downstream = definition.edges.iter().any(|edge| {
            edge.source == node.id && result.next_ports.iter().any(|p| *p == edge.source_port)
        });
        if !feeds_downstream {
            outputs.insert(
                node.id.clone(),
                result.output.clone().unwrap_or(Value::Null),
            );
        }
    }
    outputs
}

/// Build the `output_data` stored on the finalized record.
///
/// Only a failed run carries the first failure next to its sink outputs.
pub fn output_data(
    definition: &WorkflowDefinition,
    record: &ExecutionRecord,
    status: ExecutionStatus,
) -> Value {
    let mut data = json!({ "outputs": Value::Object(sink_outputs(definition, record)) });
    if status == ExecutionStatus::Failed {
        if let Some(failure) = first_failure(record) {
            data["error"] = json!({
                "nodeId": failure.node_id,
                "message": failure.message,
            });
        }
    }
    data
}

/// `output_data` for a run that broke outside any node, e.g. on a store error.
pub fn aborted_output(
    definition: &WorkflowDefinition,
    record: Option<&ExecutionRecord>,
    message: &str,
) -> Value {
    let outputs = record
        .map(|record| sink_outputs(definition, record))
        .unwrap_or_default();
    json!({
        "outputs": Value::Object(outputs),
        "error": { "nodeId": Value::Null, "message": message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::{ports, NodeSpec, Transition};

    fn succeeded(id: &str, kind: NodeKind, ports: &[&str], frontier: usize) -> NodeResult {
        NodeResult {
            node_id: id.to_string(),
            kind,
            status: NodeStatus::Succeeded,
            output: Some(json!({ "from": id })),
            next_ports: ports.iter().map(|p| p.to_string()).collect(),
            error: None,
            attempts: 1,
            frontier: Some(frontier),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            duration_ms: Some(1),
        }
    }

    fn failed(id: &str, frontier: usize, message: &str) -> NodeResult {
        NodeResult {
            status: NodeStatus::Failed,
            output: None,
            next_ports: Vec::new(),
            error: Some(message.to_string()),
            attempts: 2,
            ..succeeded(id, NodeKind::Action, &[], frontier)
        }
    }

    fn definition() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("report");
        def.add_node(NodeSpec::trigger("t"));
        def.add_node(NodeSpec::condition("c", "true"));
        def.add_node(NodeSpec::action("yes"));
        def.add_node(NodeSpec::action("no"));
        def.connect("t", ports::OUTPUT, "c");
        def.connect("c", ports::OUTPUT_TRUE, "yes");
        def.connect("c", ports::OUTPUT_FALSE, "no");
        def
    }

    fn record_with(results: Vec<NodeResult>) -> ExecutionRecord {
        let mut record = ExecutionRecord::running(Uuid::new_v4(), Uuid::new_v4(), None, json!({}));
        for result in results {
            record.apply(&Transition::NodeRecorded(result)).unwrap();
        }
        record
    }

    #[test]
    fn sinks_are_nodes_whose_active_ports_lead_nowhere() {
        let record = record_with(vec![
            succeeded("t", NodeKind::Trigger, &[ports::OUTPUT], 0),
            succeeded("c", NodeKind::Condition, &[ports::OUTPUT_TRUE], 1),
            succeeded("yes", NodeKind::Action, &[ports::OUTPUT], 2),
            NodeResult::skipped("no", NodeKind::Action, NodeStatus::Pruned),
        ]);
        let data = output_data(&definition(), &record, ExecutionStatus::Completed);
        assert_eq!(data, json!({ "outputs": { "yes": { "from": "yes" } } }));
    }

    #[test]
    fn failure_is_reported_once_by_frontier_order() {
        let record = record_with(vec![
            succeeded("t", NodeKind::Trigger, &[ports::OUTPUT], 0),
            failed("z-first", 1, "boom"),
            failed("a-later", 2, "later"),
        ]);
        let report = ExecutionStatusReport::from_record(&record);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.node_id.as_deref(), Some("z-first"));
        assert_eq!(failure.message, "boom");
        assert_eq!(report.node("z-first").unwrap().attempts, 2);
        assert!(report.summary().contains("node 'z-first': boom"));
    }

    #[test]
    fn error_block_only_on_failed_runs() {
        let record = record_with(vec![
            succeeded("t", NodeKind::Trigger, &[ports::OUTPUT], 0),
            failed("c", 1, "boom"),
        ]);
        let completed = output_data(&definition(), &record, ExecutionStatus::Completed);
        assert!(completed.get("error").is_none());

        let failed = output_data(&definition(), &record, ExecutionStatus::Failed);
        assert_eq!(failed["error"], json!({ "nodeId": "c", "message": "boom" }));
    }

    #[test]
    fn aborted_run_reports_failure_without_node() {
        let mut record = record_with(vec![succeeded("t", NodeKind::Trigger, &[ports::OUTPUT], 0)]);
        let data = aborted_output(&definition(), Some(&record), "Store error: disk full");
        record
            .apply(&Transition::Finalized {
                status: ExecutionStatus::Failed,
                completed_at: Utc::now(),
                output_data: data,
            })
            .unwrap();

        let report = ExecutionStatusReport::from_record(&record);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.node_id, None);
        assert_eq!(failure.message, "Store error: disk full");
        assert!(report.render_text().contains("failed at run: Store error: disk full"));
    }

    #[test]
    fn executed_nodes_excludes_skipped() {
        let record = record_with(vec![
            succeeded("t", NodeKind::Trigger, &[ports::OUTPUT], 0),
            failed("c", 1, "bad expression"),
            NodeResult::skipped("yes", NodeKind::Action, NodeStatus::UpstreamFailed),
        ]);
        let report = ExecutionStatusReport::from_record(&record);
        let executed: Vec<_> = report.executed_nodes().into_iter().collect();
        assert_eq!(executed, vec!["c".to_string(), "t".to_string()]);
        assert_eq!(report.count(NodeStatus::UpstreamFailed), 1);
    }

    #[test]
    fn report_serializes_camel_case() {
        let record = record_with(vec![succeeded("t", NodeKind::Trigger, &[ports::OUTPUT], 0)]);
        let value = serde_json::to_value(ExecutionStatusReport::from_record(&record)).unwrap();
        assert!(value.get("perNodeResults").is_some());
        assert_eq!(value["status"], json!("running"));
        assert!(report_text_lists(&record, "t"));
    }

    fn report_text_lists(record: &ExecutionRecord, id: &str) -> bool {
        ExecutionStatusReport::from_record(record)
            .render_text()
            .lines()
            .any(|line| line.trim_start().starts_with(id))
    }
}
