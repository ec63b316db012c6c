// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{graph, ports, ExecutionEvent, ExecutionStatus, NodeEvent, NodeSpec, WorkflowDefinition};
use flownodes::{standard_registry, OpenAiProvider, StandardActionProvider};
use flowruntime::{FlowRuntime, NodeRegistry, RunOptions, RuntimeConfig};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger payload as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Fire only this trigger node
        #[arg(short, long)]
        trigger: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn create_registry() -> NodeRegistry {
    standard_registry(
        Arc::new(OpenAiProvider::from_env()),
        Arc::new(StandardActionProvider::new()),
    )
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            trigger,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(file, input, config, trigger).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    config: Option<PathBuf>,
    trigger: Option<String>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(&file)?;
    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let payload: Value = match input {
        Some(text) => serde_json::from_str(&text).context("--input must be valid JSON")?,
        None => json!({}),
    };

    let config = match config {
        Some(path) => RuntimeConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let runtime = FlowRuntime::with_config(create_registry(), config);

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { execution_id, .. } => {
                    println!("▶️  Execution {} started", execution_id);
                }
                ExecutionEvent::FrontierStarted { frontier, nodes, .. } => {
                    println!("  ── frontier {}: {}", frontier, nodes.join(", "));
                }
                ExecutionEvent::NodeStarted {
                    node_id,
                    kind,
                    attempt,
                    ..
                } => {
                    if attempt > 1 {
                        println!("  ⚡ Starting node: {} ({}) attempt {}", node_id, kind, attempt);
                    } else {
                        println!("  ⚡ Starting node: {} ({})", node_id, kind);
                    }
                }
                ExecutionEvent::NodeRetrying {
                    node_id,
                    delay_ms,
                    error,
                    ..
                } => {
                    println!("  🔁 Node {} failed ({}), retrying in {}ms", node_id, error, delay_ms);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    ports,
                    duration_ms,
                    ..
                } => {
                    println!(
                        "  ✅ Node {} completed in {}ms → {}",
                        node_id,
                        duration_ms,
                        ports.join(", ")
                    );
                }
                ExecutionEvent::NodeFailed {
                    node_id,
                    error,
                    attempts,
                    ..
                } => {
                    println!("  ❌ Node {} failed after {} attempt(s): {}", node_id, attempts, error);
                }
                ExecutionEvent::NodeSkipped { node_id, status, .. } => {
                    println!("  ⏭️  Node {} {}", node_id, status);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                },
                ExecutionEvent::RunFinished {
                    status,
                    duration_ms,
                    ..
                } => {
                    println!("🏁 Execution {} in {}ms", status, duration_ms);
                    break;
                }
            }
        }
    });

    let options = RunOptions {
        trigger_node: trigger,
        ..RunOptions::default()
    };
    let report = runtime
        .run_workflow_blocking(workflow, payload, options)
        .await?;

    let _ = tokio::time::timeout(Duration::from_millis(200), event_task).await;

    println!();
    println!("📊 Execution Summary:");
    print!("{}", report.render_text());

    if let Some(data) = &report.output_data {
        println!();
        println!("📤 Outputs:");
        println!("{}", serde_json::to_string_pretty(data)?);
    }

    if report.status != ExecutionStatus::Completed {
        bail!("workflow {}", report.status);
    }
    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(&file)?;
    graph::validate(&workflow)?;

    let failures = create_registry().validate_configs(&workflow);
    if !failures.is_empty() {
        for (node_id, error) in &failures {
            println!("  ❌ {}: {}", node_id, error);
        }
        bail!("{} node(s) have invalid configuration", failures.len());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!("   Triggers: {}", workflow.triggers().count());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Kinds:");
    println!();

    let registry = create_registry();
    for kind in registry.list_node_kinds() {
        if let Some(metadata) = registry.get_metadata(kind) {
            let outputs: Vec<_> = metadata.outputs.iter().map(|p| p.name.as_str()).collect();
            println!("  • {} ({})", kind, metadata.category);
            println!("    {}", metadata.description);
            println!("    outputs: {}", outputs.join(", "));
        } else {
            println!("  • {}", kind);
        }
    }
    println!();
    println!(
        "  Action types: {}",
        StandardActionProvider::ACTION_TYPES.join(", ")
    );
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut workflow = WorkflowDefinition::new("Customer Feedback Triage");
    workflow.description =
        Some("Classifies incoming feedback and routes it by sentiment".to_string());

    workflow.add_node(
        NodeSpec::trigger("trigger-1")
            .with_name("Webhook")
            .with_config("triggerType", "webhook"),
    );
    workflow.add_node(
        NodeSpec::ai("ai-1")
            .with_name("Sentiment Analysis")
            .with_config("model", "gpt-4o")
            .with_config(
                "prompt",
                "Classify the sentiment of the customer's message: {{data.text}}. \
                 Reply with JSON {\"sentiment\": \"positive\" | \"negative\"}.",
            ),
    );
    workflow.add_node(
        NodeSpec::condition("condition-1", "data.sentiment === 'positive'")
            .with_name("Is Positive?"),
    );
    workflow.add_node(
        NodeSpec::action("action-positive")
            .with_name("Thank Customer")
            .with_config("actionType", "log")
            .with_config("actionConfig", json!({ "message": "positive feedback received" })),
    );
    workflow.add_node(
        NodeSpec::action("action-negative")
            .with_name("Open Ticket")
            .with_config("actionType", "log")
            .with_config(
                "actionConfig",
                json!({ "message": "negative feedback received", "level": "warn" }),
            ),
    );

    workflow.connect("trigger-1", ports::OUTPUT, "ai-1");
    workflow.connect("ai-1", ports::OUTPUT, "condition-1");
    workflow.connect("condition-1", ports::OUTPUT_TRUE, "action-positive");
    workflow.connect("condition-1", ports::OUTPUT_FALSE, "action-negative");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  OPENAI_API_KEY=... flow run --file {} --input '{{\"text\": \"I love it\"}}'",
        output.display()
    );

    Ok(())
}
