use anyhow::{Context, Result};
use clap::Parser;
use dagcore::broker::{BrokerConfig, MessageBroker, NatsBroker};
use dagruntime::{NodeRegistry, Worker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dagflow-worker")]
#[command(about = "Executes flow tasks pulled from the message broker", long_about = None)]
struct Args {
    /// NATS server URL
    #[arg(long, env = "DAGFLOW_BROKER_URL", default_value = "nats://127.0.0.1:4222")]
    broker_url: String,

    /// Prefix of the broker streams and subjects
    #[arg(long, env = "DAGFLOW_STREAM_PREFIX", default_value = "DAGFLOW")]
    stream_prefix: String,

    /// Tasks executed concurrently by this process
    #[arg(short, long, env = "DAGFLOW_WORKER_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Deliveries attempted before a task is dead-lettered
    #[arg(long, env = "DAGFLOW_MAX_DELIVER", default_value_t = 5)]
    max_deliver: i64,

    /// Seconds the broker waits for an acknowledgement
    #[arg(long, default_value_t = 30)]
    ack_wait_secs: u64,

    /// Identifier used in logs
    #[arg(long, env = "DAGFLOW_WORKER_ID")]
    worker_id: Option<String>,

    /// Show debug output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("🚀 Starting dagflow worker");

    let mut registry = NodeRegistry::new();
    dagnodes::register_all(&mut registry);
    info!("✅ Registered {} node types", registry.list_node_types().len());

    let broker = Arc::new(NatsBroker::new(BrokerConfig {
        url: args.broker_url.clone(),
        stream_prefix: args.stream_prefix,
        max_deliver: args.max_deliver,
        ack_wait: Duration::from_secs(args.ack_wait_secs),
        ..BrokerConfig::default()
    }));
    broker
        .connect()
        .await
        .with_context(|| format!("connecting to broker at {}", args.broker_url))?;

    let mut config = WorkerConfig {
        concurrency: args.concurrency,
        ..WorkerConfig::default()
    };
    if let Some(worker_id) = args.worker_id {
        config.worker_id = worker_id;
    }

    let worker = Worker::new(Arc::new(registry), broker.clone(), config);
    worker.start().await?;
    info!("🌐 Worker {} consuming tasks from {}", worker.worker_id(), args.broker_url);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    worker.shutdown().await;
    broker.disconnect().await?;

    Ok(())
}
