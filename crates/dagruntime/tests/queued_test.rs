mod common;

use async_trait::async_trait;
use common::{diamond_flow, eventually, linear_flow, registry};
use dagcore::broker::{
    ConsumerHandle, InMemoryBroker, MessageBroker, ResultMessage, TaskHandler, TaskMessage,
};
use dagcore::{
    BrokerError, DagError, Execution, ExecutionStatus, FlowDefinition, Node, TaskStatus,
};
use dagruntime::{
    Engine, ExecutionStore, InMemoryStore, QueuedOrchestrator, RuntimeConfig, Worker,
    WorkerConfig,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Hands every published task to the test instead of a worker
struct Capture(mpsc::UnboundedSender<TaskMessage>);

#[async_trait]
impl TaskHandler for Capture {
    async fn handle_task(&self, task: TaskMessage) -> Result<(), BrokerError> {
        let _ = self.0.send(task);
        Ok(())
    }
}

struct Harness {
    broker: Arc<InMemoryBroker>,
    store: Arc<InMemoryStore>,
    orchestrator: QueuedOrchestrator,
}

impl Harness {
    async fn new(config: RuntimeConfig) -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        broker.connect().await.unwrap();
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = QueuedOrchestrator::new(broker.clone(), store.clone(), config);
        Self {
            broker,
            store,
            orchestrator,
        }
    }

    async fn capture(&self) -> (mpsc::UnboundedReceiver<TaskMessage>, ConsumerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = self.broker.consume_tasks(Arc::new(Capture(tx))).await.unwrap();
        (rx, consumer)
    }

    async fn create(&self, flow: FlowDefinition) -> Execution {
        let flow_id = flow.id.clone();
        self.store.insert_flow(flow).await;
        self.store.create_execution(&flow_id, HashMap::new()).await.unwrap()
    }

    async fn record(&self, execution_id: &str) -> Execution {
        self.store.get_execution(execution_id).await.unwrap().unwrap()
    }
}

async fn next_task(rx: &mut mpsc::UnboundedReceiver<TaskMessage>) -> TaskMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no task published")
        .expect("task channel closed")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<TaskMessage>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Ok(task) = rx.try_recv() {
        panic!("unexpected task published for node {}", task.node_id);
    }
}

fn roots_flow() -> FlowDefinition {
    let mut flow = FlowDefinition::new("roots").with_id("flow-roots");
    for id in ["one", "two", "three"] {
        flow.add_node(Node::new(id, "source").with_config("value", id));
    }
    flow
}

#[tokio::test]
async fn test_independent_roots_are_published_together() {
    common::init_tracing();
    let h = Harness::new(RuntimeConfig::default()).await;
    let execution = h.create(roots_flow()).await;

    h.orchestrator.execute_flow(&execution.id).await.unwrap();

    assert_eq!(h.broker.queue_depths().await.unwrap().tasks, 3);
    assert_eq!(h.record(&execution.id).await.status, ExecutionStatus::Running);
    let statuses = h.orchestrator.task_statuses(&execution.id).await.unwrap();
    assert_eq!(statuses.len(), 3);
    assert!(statuses.values().all(|s| *s == TaskStatus::Running));
    assert_eq!(h.orchestrator.active_executions().await, vec![execution.id.clone()]);
}

#[tokio::test]
async fn test_join_waits_for_both_branches() {
    let h = Harness::new(RuntimeConfig::default()).await;
    let (mut rx, consumer) = h.capture().await;
    let execution = h.create(diamond_flow()).await;
    let exec_id = execution.id.as_str();

    h.orchestrator.execute_flow(exec_id).await.unwrap();
    let a = next_task(&mut rx).await;
    assert_eq!(a.node_id, "A");
    assert!(a.task_id.starts_with("A-"));
    assert_eq!(a.execution_id, exec_id);
    assert_quiet(&mut rx).await;

    h.orchestrator
        .on_result(ResultMessage::success(&a.task_id, exec_id, json!(1)))
        .await
        .unwrap();
    let first = next_task(&mut rx).await;
    let second = next_task(&mut rx).await;
    let mut branches = vec![first.clone(), second.clone()];
    branches.sort_by(|x, y| x.node_id.cmp(&y.node_id));
    assert_eq!(branches[0].node_id, "B");
    assert_eq!(branches[1].node_id, "C");
    assert_eq!(branches[0].inputs.get("input"), Some(&json!(1)));

    h.orchestrator
        .on_result(ResultMessage::success(&branches[0].task_id, exec_id, json!(2)))
        .await
        .unwrap();
    // D still waits on C
    assert_quiet(&mut rx).await;
    let statuses = h.orchestrator.task_statuses(exec_id).await.unwrap();
    assert_eq!(statuses["D"], TaskStatus::Pending);

    h.orchestrator
        .on_result(ResultMessage::success(&branches[1].task_id, exec_id, json!(2)))
        .await
        .unwrap();
    let d = next_task(&mut rx).await;
    assert_eq!(d.node_id, "D");
    assert_eq!(d.inputs.get("input"), Some(&json!([2, 2])));
    assert_eq!(d.dependencies, vec!["B", "C"]);

    h.orchestrator
        .on_result(ResultMessage::success(&d.task_id, exec_id, json!(4)))
        .await
        .unwrap();

    let record = h.record(exec_id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.outputs.get("D"), Some(&json!(4)));
    assert_eq!(record.outputs.len(), 4);
    assert!(h.orchestrator.active_executions().await.is_empty());
    assert!(h.orchestrator.task_statuses(exec_id).await.is_none());

    consumer.shutdown().await;
}

#[tokio::test]
async fn test_failed_task_stops_its_dependents() {
    let h = Harness::new(RuntimeConfig::default()).await;
    let (mut rx, consumer) = h.capture().await;

    let mut flow = FlowDefinition::new("chain").with_id("flow-chain");
    flow.add_node(Node::new("A", "source"));
    flow.add_node(Node::new("B", "sink"));
    flow.link("A", "B");
    let execution = h.create(flow).await;
    let exec_id = execution.id.as_str();

    h.orchestrator.execute_flow(exec_id).await.unwrap();
    let a = next_task(&mut rx).await;
    h.orchestrator
        .on_result(ResultMessage::failure(&a.task_id, exec_id, "boom"))
        .await
        .unwrap();

    assert_quiet(&mut rx).await;
    let record = h.record(exec_id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    let message = record.error_message.unwrap();
    assert!(message.contains(&a.task_id), "unexpected message: {}", message);
    assert!(message.contains("boom"));
    assert!(h.orchestrator.active_executions().await.is_empty());

    // Anything arriving afterwards is acknowledged and dropped
    h.orchestrator
        .on_result(ResultMessage::success(&a.task_id, exec_id, json!(1)))
        .await
        .unwrap();
    assert_eq!(h.record(exec_id).await.status, ExecutionStatus::Failed);

    consumer.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_and_unknown_results_are_discarded() {
    let h = Harness::new(RuntimeConfig::default()).await;
    let (mut rx, consumer) = h.capture().await;
    let execution = h.create(diamond_flow()).await;
    let exec_id = execution.id.as_str();

    h.orchestrator.execute_flow(exec_id).await.unwrap();
    let a = next_task(&mut rx).await;
    let result = ResultMessage::success(&a.task_id, exec_id, json!(1));
    h.orchestrator.on_result(result.clone()).await.unwrap();
    next_task(&mut rx).await;
    next_task(&mut rx).await;

    h.orchestrator.on_result(result).await.unwrap();
    h.orchestrator
        .on_result(ResultMessage::success("no-such-task", exec_id, json!(0)))
        .await
        .unwrap();
    h.orchestrator
        .on_result(ResultMessage::success("t", "no-such-execution", json!(0)))
        .await
        .unwrap();
    assert_quiet(&mut rx).await;

    let statuses = h.orchestrator.task_statuses(exec_id).await.unwrap();
    assert_eq!(statuses["A"], TaskStatus::Completed);
    assert_eq!(statuses["B"], TaskStatus::Running);
    assert_eq!(statuses["D"], TaskStatus::Pending);

    consumer.shutdown().await;
}

#[tokio::test]
async fn test_cancel_abandons_execution() {
    let h = Harness::new(RuntimeConfig::default()).await;
    let execution = h.create(diamond_flow()).await;

    h.orchestrator.execute_flow(&execution.id).await.unwrap();
    h.orchestrator.cancel(&execution.id).await.unwrap();

    assert_eq!(h.record(&execution.id).await.status, ExecutionStatus::Cancelled);
    assert!(h.orchestrator.active_executions().await.is_empty());
    assert!(matches!(
        h.orchestrator.cancel(&execution.id).await,
        Err(DagError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_rejects_cyclic_flow() {
    let h = Harness::new(RuntimeConfig::default()).await;
    let mut flow = FlowDefinition::new("cycle").with_id("flow-cycle");
    flow.add_node(Node::new("A", "sink"));
    flow.add_node(Node::new("B", "sink"));
    flow.link("A", "B");
    flow.link("B", "A");
    let execution = h.create(flow).await;

    let err = h.orchestrator.execute_flow(&execution.id).await.unwrap_err();
    assert!(matches!(err, DagError::Validation(_)));
    assert_eq!(h.record(&execution.id).await.status, ExecutionStatus::Failed);
    assert_eq!(h.broker.queue_depths().await.unwrap().tasks, 0);
}

#[tokio::test]
async fn test_empty_flow_completes_immediately() {
    let h = Harness::new(RuntimeConfig::default()).await;
    let execution = h.create(FlowDefinition::new("empty").with_id("flow-empty")).await;

    h.orchestrator.execute_flow(&execution.id).await.unwrap();
    assert_eq!(h.record(&execution.id).await.status, ExecutionStatus::Completed);
    assert!(h.orchestrator.active_executions().await.is_empty());
}

#[tokio::test]
async fn test_requires_connected_broker() {
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryStore::new());
    store.insert_flow(linear_flow()).await;
    let execution = store.create_execution("flow-linear", HashMap::new()).await.unwrap();

    let orchestrator = QueuedOrchestrator::new(broker, store.clone(), RuntimeConfig::default());
    let err = orchestrator.execute_flow(&execution.id).await.unwrap_err();
    assert!(matches!(err, DagError::BrokerUnavailable(_)));

    let record = store.get_execution(&execution.id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Pending);

    assert!(matches!(
        orchestrator.execute_flow("missing").await,
        Err(DagError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_silent_task_times_out() {
    let h = Harness::new(RuntimeConfig {
        task_timeout: Some(Duration::from_millis(50)),
        ..RuntimeConfig::default()
    })
    .await;
    let execution = h.create(diamond_flow()).await;

    h.orchestrator.execute_flow(&execution.id).await.unwrap();

    let store = &h.store;
    let id = execution.id.as_str();
    eventually(|| async move {
        store.get_execution(id).await.unwrap().unwrap().status == ExecutionStatus::Failed
    })
    .await;
    let message = h.record(id).await.error_message.unwrap();
    assert!(message.contains("no result within 50ms"), "unexpected message: {}", message);
}

#[tokio::test]
async fn test_workers_drive_execution_to_completion() {
    common::init_tracing();
    let (registry, _) = registry();
    let h = Harness::new(RuntimeConfig::default()).await;
    let worker = Worker::new(
        registry,
        h.broker.clone(),
        WorkerConfig {
            worker_id: "worker-test".to_string(),
            concurrency: 2,
        },
    );
    worker.start().await.unwrap();
    assert_eq!(worker.worker_id(), "worker-test");

    let diamond = h.create(diamond_flow()).await;
    let mut failing = FlowDefinition::new("failing").with_id("flow-failing");
    failing.add_node(Node::new("A", "source").with_config("value", 1));
    failing.add_node(Node::new("B", "fail"));
    failing.link("A", "B");
    let failed = h.create(failing).await;

    h.orchestrator.execute_flow(&diamond.id).await.unwrap();
    h.orchestrator.execute_flow(&failed.id).await.unwrap();

    let store = &h.store;
    let ids = [diamond.id.as_str(), failed.id.as_str()];
    eventually(|| async move {
        for id in ids {
            let record = store.get_execution(id).await.unwrap().unwrap();
            if !record.status.is_terminal() {
                return false;
            }
        }
        true
    })
    .await;

    let record = h.record(&diamond.id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.outputs.get("D"), Some(&json!(4)));

    let record = h.record(&failed.id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.unwrap().contains("Node B failed"));

    worker.shutdown().await;
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_worker_reports_unknown_node_type() {
    let (registry, _) = registry();
    let broker = Arc::new(InMemoryBroker::new());
    let worker = Worker::new(registry, broker, WorkerConfig::default());

    let mut flow = FlowDefinition::new("unknown");
    flow.add_node(Node::new("x", "does.not.exist"));
    let graph = common::graph(&flow);
    let task = dagcore::Task::from_node(graph.node("x").unwrap(), &graph);
    let message = TaskMessage::from_task(&task, "exec-1", "flow-1", None);

    let result = worker.process(&message).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("does.not.exist"));
}

#[tokio::test]
async fn test_engine_falls_back_to_direct_when_broker_is_unreachable() {
    let (registry, _) = registry();
    let store = Arc::new(InMemoryStore::new());
    store.insert_flow(linear_flow()).await;
    let inputs = HashMap::from([("value".to_string(), json!("Hello World"))]);
    let execution = store.create_execution("flow-linear", inputs).await.unwrap();

    let engine = Engine::connect(
        registry,
        store.clone(),
        Arc::new(InMemoryBroker::unreachable()),
        RuntimeConfig::default(),
    )
    .await;
    assert!(!engine.is_distributed());

    let mut events = engine.subscribe_events();
    let status = engine.execute(&execution.id).await.unwrap();
    assert_eq!(status, ExecutionStatus::Completed);

    let record = store.get_execution(&execution.id).await.unwrap().unwrap();
    assert_eq!(record.outputs.get("out"), Some(&json!("Transformed: Hello World")));

    let first = events.recv().await.unwrap();
    assert_eq!(first.execution_id(), execution.id);
}

#[tokio::test]
async fn test_engine_uses_queue_when_broker_connects() {
    let (registry, _) = registry();
    let store = Arc::new(InMemoryStore::new());
    store.insert_flow(linear_flow()).await;
    let inputs = HashMap::from([("value".to_string(), json!("Hello World"))]);
    let execution = store.create_execution("flow-linear", inputs).await.unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let engine = Engine::connect(
        registry.clone(),
        store.clone(),
        broker.clone(),
        RuntimeConfig::default(),
    )
    .await;
    assert!(engine.is_distributed());

    let worker = Worker::new(registry, broker, WorkerConfig::default());
    worker.start().await.unwrap();

    let status = engine.execute(&execution.id).await.unwrap();
    assert_eq!(status, ExecutionStatus::Running);

    let s = &store;
    let id = execution.id.as_str();
    eventually(|| async move {
        s.get_execution(id).await.unwrap().unwrap().status == ExecutionStatus::Completed
    })
    .await;
    let record = store.get_execution(id).await.unwrap().unwrap();
    assert_eq!(record.outputs.get("out"), Some(&json!("Transformed: Hello World")));

    worker.shutdown().await;
    engine.shutdown().await;
}

#[tokio::test]
async fn test_started_execution_cannot_be_started_again() {
    let h = Harness::new(RuntimeConfig::default()).await;
    let (mut rx, consumer) = h.capture().await;
    let execution = h.create(diamond_flow()).await;
    let exec_id = execution.id.as_str();

    h.orchestrator.execute_flow(exec_id).await.unwrap();
    let a = next_task(&mut rx).await;

    let err = h.orchestrator.execute_flow(exec_id).await.unwrap_err();
    assert!(matches!(err, DagError::Validation(_)), "unexpected error {:?}", err);
    assert_quiet(&mut rx).await;

    // The original attempt still owns the execution
    h.orchestrator
        .on_result(ResultMessage::success(&a.task_id, exec_id, json!(1)))
        .await
        .unwrap();
    let statuses = h.orchestrator.task_statuses(exec_id).await.unwrap();
    assert_eq!(statuses["A"], TaskStatus::Completed);
    assert_eq!(statuses["B"], TaskStatus::Running);

    h.orchestrator.cancel(exec_id).await.unwrap();
    assert!(matches!(
        h.orchestrator.execute_flow(exec_id).await,
        Err(DagError::Validation(_))
    ));
    assert_eq!(h.record(exec_id).await.status, ExecutionStatus::Cancelled);

    consumer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sibling_results_publish_join_once() {
    let h = Harness::new(RuntimeConfig::default()).await;
    let (mut rx, consumer) = h.capture().await;

    for _ in 0..50 {
        let execution = h.create(diamond_flow()).await;
        let exec_id = execution.id.clone();

        h.orchestrator.execute_flow(&exec_id).await.unwrap();
        let a = next_task(&mut rx).await;
        h.orchestrator
            .on_result(ResultMessage::success(&a.task_id, exec_id.as_str(), json!(1)))
            .await
            .unwrap();
        let branches = [next_task(&mut rx).await, next_task(&mut rx).await];

        let mut handles = Vec::new();
        for branch in branches {
            let orchestrator = h.orchestrator.clone();
            let result = ResultMessage::success(&branch.task_id, exec_id.as_str(), json!(2));
            handles.push(tokio::spawn(async move { orchestrator.on_result(result).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let d = next_task(&mut rx).await;
        assert_eq!(d.node_id, "D");
        assert_eq!(d.inputs.get("input"), Some(&json!([2, 2])));
        assert_quiet(&mut rx).await;

        h.orchestrator.cancel(&exec_id).await.unwrap();
    }

    consumer.shutdown().await;
}
