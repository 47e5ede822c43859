use crate::interactive::{InputGate, InputSignal};
use crate::registry::NodeRegistry;
use crate::store::ExecutionStore;
use dagcore::{
    DagAnalyzer, DagError, Execution, ExecutionId, ExecutionObserver, ExecutionStatus, FlowId,
    Graph, NodeContext, NodeError, NodeId, ObserverHandle, Task, Value, USER_INPUT_KEY,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Identity of one in-process run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub user_id: Option<String>,
}

impl RunContext {
    pub fn new(execution_id: impl Into<ExecutionId>, flow_id: impl Into<FlowId>) -> Self {
        Self {
            execution_id: execution_id.into(),
            flow_id: flow_id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn for_execution(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id.clone(),
            flow_id: execution.flow_id.clone(),
            user_id: execution.user_id.clone(),
        }
    }
}

/// Result of an in-process run that did not fail
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    /// Result of every completed node
    pub outputs: HashMap<NodeId, Value>,
    pub tasks: HashMap<NodeId, Task>,
}

impl ExecutionReport {
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }
}

/// Executes a flow in-process, one node at a time, in dependency order
pub struct DirectOrchestrator {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn ExecutionStore>,
    observer: ObserverHandle,
}

impl DirectOrchestrator {
    pub fn new(registry: Arc<NodeRegistry>, store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            registry,
            store,
            observer: ObserverHandle::none(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = ObserverHandle::new(observer);
        self
    }

    /// Run a stored execution to a terminal state and persist it
    pub async fn execute(&self, execution_id: &str) -> Result<ExecutionReport, DagError> {
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| DagError::NotFound(format!("execution {}", execution_id)))?;
        let flow = self
            .store
            .get_flow(&execution.flow_id)
            .await?
            .ok_or_else(|| DagError::NotFound(format!("flow {}", execution.flow_id)))?;

        ensure_pending(&execution)?;

        execution.mark_running();
        self.store.update_execution(&execution).await?;

        let ctx = RunContext::for_execution(&execution);
        let outcome = match Graph::from_definition(&flow) {
            Ok(graph) => self.run(&graph, &ctx, execution.inputs.clone()).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(report) => {
                match report.status {
                    ExecutionStatus::Cancelled => execution.mark_cancelled(),
                    _ => execution.mark_completed(report.outputs.clone()),
                }
                self.store.update_execution(&execution).await?;
                Ok(report)
            }
            Err(e) => {
                execution.mark_failed(e.to_string());
                self.store.update_execution(&execution).await?;
                Err(e)
            }
        }
    }

    /// Run a graph without touching the store
    pub async fn run(
        &self,
        graph: &Graph,
        ctx: &RunContext,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionReport, DagError> {
        run_graph(
            &self.registry,
            graph,
            ctx,
            inputs,
            &self.observer,
            &CancellationToken::new(),
            None,
        )
        .await
    }
}

/// Only a pending execution may be started; a started one belongs to
/// whoever started it
pub(crate) fn ensure_pending(execution: &Execution) -> Result<(), DagError> {
    if execution.status != ExecutionStatus::Pending {
        return Err(DagError::Validation(format!(
            "execution {} is {:?}, expected Pending",
            execution.id, execution.status
        )));
    }
    Ok(())
}

/// Sequential run shared by the direct and interactive orchestrators.
///
/// Fail-fast: the first node error stops the run and is returned.
/// Cancellation is checked between nodes and while waiting for input; a
/// dispatched node gets its own token and always runs to an outcome.
pub(crate) async fn run_graph(
    registry: &NodeRegistry,
    graph: &Graph,
    ctx: &RunContext,
    inputs: HashMap<String, Value>,
    observer: &ObserverHandle,
    cancel: &CancellationToken,
    gate: Option<&InputGate>,
) -> Result<ExecutionReport, DagError> {
    let order = DagAnalyzer::new(graph).topological_order()?;
    let entry_points: HashSet<NodeId> = graph.entry_points().into_iter().collect();
    let mut tasks: HashMap<NodeId, Task> = graph
        .nodes()
        .iter()
        .map(|node| (node.id.clone(), Task::from_node(node, graph)))
        .collect();
    let mut results: HashMap<NodeId, Value> = HashMap::new();
    let started = Instant::now();

    info!(
        execution_id = %ctx.execution_id,
        nodes = order.len(),
        "Starting in-process execution"
    );

    for node_id in &order {
        if cancel.is_cancelled() {
            return Ok(cancelled(ctx, tasks, results));
        }

        let node = graph
            .node(node_id)
            .ok_or_else(|| DagError::NotFound(format!("node {}", node_id)))?;
        let mut task = tasks
            .remove(node_id)
            .ok_or_else(|| DagError::NotFound(format!("task for node {}", node_id)))?;

        if entry_points.contains(node_id) {
            task.inputs.extend(inputs.clone());
        }
        task.absorb_results(&results);

        if let Some(gate) = gate {
            if node.requires_input() && node.default_value().is_none() {
                let signal = gate.wait_for(node_id, &node.input_schema(), observer).await;
                match signal {
                    InputSignal::Data(data) => {
                        task.inputs.insert(USER_INPUT_KEY.to_string(), data);
                    }
                    InputSignal::Cancelled => {
                        tasks.insert(node_id.clone(), task);
                        return Ok(cancelled(ctx, tasks, results));
                    }
                }
            }
        }

        task.start()?;
        observer.node_start(node_id, &node.node_type, node.display_label());

        let worker = match registry.resolve(&node.node_type) {
            Ok(worker) => worker,
            Err(e) => {
                let message = e.to_string();
                task.fail(message.clone())?;
                error!("Node {} failed: {}", node_id, message);
                observer.node_error(node_id, &message);
                return Err(e);
            }
        };

        let node_ctx = NodeContext::new(
            ctx.execution_id.clone(),
            ctx.flow_id.clone(),
            node_id.clone(),
        )
        .with_user(ctx.user_id.clone())
        .with_node(node.node_type.clone(), node.display_label())
        .with_observer_handle(observer.clone());

        let node_started = Instant::now();
        let outcome = worker.execute(&task.config, &task.inputs, &node_ctx).await;
        match outcome {
            Ok(result) => {
                info!(
                    "Node {} completed in {}ms",
                    node_id,
                    node_started.elapsed().as_millis()
                );
                task.complete(result.clone())?;
                observer.node_complete(node_id, &result);
                if graph.is_sink(node_id) {
                    observer.output(node_id, &result);
                }
                results.insert(node_id.clone(), result);
                tasks.insert(node_id.clone(), task);
            }
            Err(NodeError::Cancelled) if cancel.is_cancelled() => {
                task.cancel()?;
                tasks.insert(node_id.clone(), task);
                return Ok(cancelled(ctx, tasks, results));
            }
            Err(e) => {
                let message = e.to_string();
                task.fail(message.clone())?;
                error!("Node {} failed: {}", node_id, message);
                observer.node_error(node_id, &message);
                return Err(DagError::ComponentExecution {
                    node_id: node_id.clone(),
                    source: e,
                });
            }
        }
    }

    info!(
        execution_id = %ctx.execution_id,
        "Execution completed in {}ms",
        started.elapsed().as_millis()
    );

    Ok(ExecutionReport {
        execution_id: ctx.execution_id.clone(),
        status: ExecutionStatus::Completed,
        outputs: results,
        tasks,
    })
}

fn cancelled(
    ctx: &RunContext,
    mut tasks: HashMap<NodeId, Task>,
    results: HashMap<NodeId, Value>,
) -> ExecutionReport {
    for task in tasks.values_mut() {
        if !task.status.is_terminal() {
            // Pending and Running both accept the transition
            let _ = task.cancel();
        }
    }
    info!(execution_id = %ctx.execution_id, "Execution cancelled");
    ExecutionReport {
        execution_id: ctx.execution_id.clone(),
        status: ExecutionStatus::Cancelled,
        outputs: results,
        tasks,
    }
}
