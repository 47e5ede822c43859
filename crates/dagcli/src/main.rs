use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dagcore::broker::{BrokerConfig, MessageBroker, NatsBroker};
use dagcore::{
    DagAnalyzer, DagError, EventBus, ExecutionEvent, ExecutionStatus, FlowDefinition, Graph, Node,
    Value,
};
use dagruntime::{
    Engine, ExecutionStore, InMemoryStore, InteractiveOrchestrator, NodeRegistry,
    QueuedOrchestrator, RunContext, RuntimeConfig, SessionControl,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dagflow")]
#[command(about = "Flow orchestration CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file in-process
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Prompt on stdin for nodes that require user input
        #[arg(long)]
        interactive: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// NATS server URL; when set, tasks are queued for dagflow-worker processes
        #[arg(long, env = "DAGFLOW_BROKER_URL")]
        broker_url: Option<String>,

        /// Prefix of the broker streams
        #[arg(long, env = "DAGFLOW_STREAM_PREFIX", default_value = "DAGFLOW")]
        stream_prefix: String,

        /// Fail a queued run when a task reports nothing back within this many seconds
        #[arg(long, env = "DAGFLOW_TASK_TIMEOUT_SECS")]
        task_timeout_secs: Option<u64>,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },

    /// Show broker queue depths
    Queues {
        /// NATS server URL
        #[arg(long, env = "DAGFLOW_BROKER_URL", default_value = "nats://127.0.0.1:4222")]
        broker_url: String,

        /// Prefix of the broker streams
        #[arg(long, env = "DAGFLOW_STREAM_PREFIX", default_value = "DAGFLOW")]
        stream_prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            interactive,
            verbose,
            broker_url,
            stream_prefix,
            task_timeout_secs,
        } => {
            // Initialize logging
            let default_level = if verbose { "debug" } else { "warn" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            let inputs = parse_inputs(input.as_deref())?;
            if interactive {
                run_interactive(&file, inputs).await?;
            } else {
                let broker = broker_url.map(|url| BrokerConfig {
                    url,
                    stream_prefix,
                    ..BrokerConfig::default()
                });
                let config = RuntimeConfig {
                    task_timeout: task_timeout_secs.map(Duration::from_secs),
                    ..RuntimeConfig::default()
                };
                run_flow(&file, inputs, broker, config).await?;
            }
        }

        Commands::Validate { file } => {
            validate_flow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_flow(&output)?;
        }

        Commands::Queues {
            broker_url,
            stream_prefix,
        } => {
            show_queues(broker_url, stream_prefix).await?;
        }
    }

    Ok(())
}

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    dagnodes::register_all(&mut registry);
    registry
}

fn load_flow(file: &Path) -> Result<FlowDefinition> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let flow: FlowDefinition =
        serde_json::from_str(&json).with_context(|| format!("parsing {}", file.display()))?;
    Ok(flow)
}

fn parse_inputs(input: Option<&str>) -> Result<HashMap<String, Value>> {
    let Some(input) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<Value>(input)? {
        Value::Object(obj) => Ok(obj.into_iter().collect()),
        _ => bail!("Input must be a JSON object"),
    }
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::NodeStarted {
            node_id, node_type, label, ..
        } => {
            if label == node_id {
                println!("  ⚡ Starting node: {} ({})", node_id, node_type);
            } else {
                println!("  ⚡ Starting node: {} [{}] ({})", label, node_id, node_type);
            }
        }
        ExecutionEvent::NodeCompleted { node_id, .. } => {
            println!("  ✅ Node {} completed", node_id);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::InputRequired { node_id, .. } => {
            println!("  ⏸️  Node {} is waiting for input", node_id);
        }
        ExecutionEvent::Output { node_id, result, .. } => {
            println!("  📤 Output from {}: {}", node_id, result);
        }
        ExecutionEvent::Streaming { update, .. } => {
            if update.is_complete {
                println!();
            } else {
                print!("{}", update.delta);
            }
        }
    }
}

async fn run_flow(
    file: &Path,
    inputs: HashMap<String, Value>,
    broker: Option<BrokerConfig>,
    config: RuntimeConfig,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());
    let flow = load_flow(file)?;

    println!("📋 Flow: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!();

    let store = Arc::new(InMemoryStore::new());
    let flow_id = flow.id.clone();
    store.insert_flow(flow).await;
    let execution = store.create_execution(&flow_id, inputs).await?;
    tracing::info!(execution_id = %execution.id, flow_id = %flow_id, "Execution created");

    let registry = Arc::new(registry());
    let engine = match broker {
        Some(broker_config) => {
            println!("📡 Connecting to broker at {}", broker_config.url);
            let broker = Arc::new(NatsBroker::new(broker_config));
            Engine::connect(registry, store.clone(), broker, config).await
        }
        None => Engine::direct(registry, store.clone()),
    };
    if engine.is_distributed() {
        println!("   Mode: queued (tasks run on dagflow-worker processes)");
    } else {
        println!("   Mode: direct");
    }
    println!();

    // Subscribe to events for real-time output
    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut outcome = engine.execute(&execution.id).await.map(|_| ());
    if outcome.is_ok() {
        if let Some(queued) = engine.queued() {
            outcome = wait_for_queued(store.as_ref(), queued, &execution.id).await;
        }
    }
    engine.shutdown().await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let record = store
        .get_execution(&execution.id)
        .await?
        .context("execution record missing")?;
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", record.id);
    println!("   Status: {:?}", record.status);
    if let Some(message) = &record.error_message {
        println!("   Error: {}", message);
    }

    if !record.outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        let mut outputs: Vec<_> = record.outputs.iter().collect();
        outputs.sort_by(|a, b| a.0.cmp(b.0));
        for (node_id, value) in outputs {
            println!("   {}: {}", node_id, value);
        }
    }

    outcome?;
    if record.status == ExecutionStatus::Failed {
        bail!("execution {} failed", record.id);
    }
    Ok(())
}

/// Poll the store until a queued execution settles; ctrl-c cancels it
async fn wait_for_queued(
    store: &InMemoryStore,
    queued: &QueuedOrchestrator,
    execution_id: &str,
) -> Result<(), DagError> {
    println!("⏳ Waiting for workers...");
    loop {
        if let Some(record) = store.get_execution(execution_id).await? {
            if record.status.is_terminal() {
                return Ok(());
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("🛑 Cancelling execution {}", execution_id);
                return queued.cancel(execution_id).await;
            }
        }
    }
}

async fn run_interactive(file: &Path, inputs: HashMap<String, Value>) -> Result<()> {
    let flow = load_flow(file)?;
    let graph = Graph::from_definition(&flow)?;
    println!("🚀 Running {} interactively", flow.name);

    let bus = EventBus::new(1000);
    let ctx = RunContext::new(Uuid::new_v4().to_string(), flow.id.clone());
    let emitter = Arc::new(bus.create_emitter(ctx.execution_id.clone()));
    let mut events = bus.subscribe();

    let orchestrator = InteractiveOrchestrator::new(Arc::new(registry()));
    let session = orchestrator.start(graph, ctx, inputs, Some(emitter));
    let control = session.control();

    let prompt_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            print_event(&event);
            if let ExecutionEvent::InputRequired { node_id, .. } = event {
                prompt_for_input(&control, &node_id, &mut lines).await;
            }
        }
    });

    let outcome = session.join().await;
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    prompt_task.abort();

    let report = outcome?;
    println!();
    println!("📊 Status: {:?}", report.status);
    let mut outputs: Vec<_> = report.outputs.iter().collect();
    outputs.sort_by(|a, b| a.0.cmp(b.0));
    for (node_id, value) in outputs {
        println!("   {}: {}", node_id, value);
    }
    Ok(())
}

async fn prompt_for_input<R>(
    control: &SessionControl,
    node_id: &str,
    lines: &mut tokio::io::Lines<R>,
) where
    R: tokio::io::AsyncBufRead + Unpin,
{
    println!("  ✏️  Enter a value for {} (JSON or text):", node_id);
    match lines.next_line().await {
        Ok(Some(line)) => {
            // Bare text is taken as a string
            let data = serde_json::from_str(&line).unwrap_or(Value::String(line));
            if let Err(e) = control.provide_input(node_id, data).await {
                eprintln!("  ⚠️  Input rejected: {}", e);
            }
        }
        _ => control.cancel().await,
    }
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());
    let flow = load_flow(file)?;

    let graph = Graph::from_definition(&flow)?;
    let order = DagAnalyzer::new(&graph).topological_order()?;
    registry().check_graph(&graph)?;

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!("   Execution order: {}", order.join(" → "));

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_flow(output: &Path) -> Result<()> {
    let mut flow = FlowDefinition::new("Example Text Flow");
    flow.description = Some("Asks for a greeting and decorates it".to_string());

    let input = flow.add_node(
        Node::new("greeting", "input")
            .with_label("Greeting")
            .with_config("requires_input", true)
            .with_position(100.0, 100.0),
    );
    let transform = flow.add_node(
        Node::new("decorate", "transform.text")
            .with_label("Decorate")
            .with_config("prefix", "Transformed: ")
            .with_position(300.0, 100.0),
    );
    let result = flow.add_node(
        Node::new("result", "output")
            .with_label("Result")
            .with_position(500.0, 100.0),
    );
    flow.link(input, transform.clone());
    flow.link(transform, result);

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  dagflow run --file {} --input '{{\"value\": \"Hello World\"}}'",
        output.display()
    );
    println!("  dagflow run --file {} --interactive", output.display());

    Ok(())
}

async fn show_queues(broker_url: String, stream_prefix: String) -> Result<()> {
    let broker = NatsBroker::new(BrokerConfig {
        url: broker_url.clone(),
        stream_prefix,
        ..BrokerConfig::default()
    });
    broker
        .connect()
        .await
        .with_context(|| format!("connecting to broker at {}", broker_url))?;

    let depths = broker.queue_depths().await?;
    println!("📬 Queues at {}", broker_url);
    println!("   tasks:       {}", depths.tasks);
    println!("   results:     {}", depths.results);
    println!("   dead letter: {}", depths.dead_letter);

    broker.disconnect().await?;
    Ok(())
}
