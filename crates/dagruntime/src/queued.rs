//! Distributed orchestration through the message broker
//!
//! Ready tasks are published to the task queue and results are applied as
//! they come back on the result queue. Each in-flight execution owns its
//! own lock, so sibling results for one execution are serialised while
//! unrelated executions progress in parallel.

use crate::config::RuntimeConfig;
use crate::direct::ensure_pending;
use crate::store::ExecutionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dagcore::broker::{ConsumerHandle, MessageBroker, ResultHandler, ResultMessage, TaskMessage};
use dagcore::{
    BrokerError, DagAnalyzer, DagError, ExecutionId, FlowId, Graph, NodeId, Task, TaskStatus,
    Value,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

/// Scheduling state of one in-flight execution
struct ExecutionState {
    flow_id: FlowId,
    user_id: Option<String>,
    dag: DagAnalyzer,
    tasks: HashMap<NodeId, Task>,
    /// task id -> node id
    task_index: HashMap<String, NodeId>,
    completed_nodes: HashSet<NodeId>,
    results: HashMap<NodeId, Value>,
    /// Set once a terminal outcome is decided; later results are discarded
    finished: bool,
    started_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Start every ready task that is still pending and build its message
    fn dispatch_ready(&mut self, execution_id: &str) -> Result<Vec<TaskMessage>, DagError> {
        let mut messages = Vec::new();
        for node_id in self.dag.ready_nodes(&self.completed_nodes) {
            let Some(task) = self.tasks.get_mut(&node_id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            task.absorb_results(&self.results);
            task.start()?;
            messages.push(TaskMessage::from_task(
                task,
                execution_id,
                self.flow_id.clone(),
                self.user_id.clone(),
            ));
        }
        Ok(messages)
    }
}

enum Outcome {
    Completed(HashMap<NodeId, Value>),
    Failed(String),
    Cancelled,
}

struct QueuedInner {
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn ExecutionStore>,
    config: RuntimeConfig,
    executions: RwLock<HashMap<ExecutionId, Arc<Mutex<ExecutionState>>>>,
    consumers: Mutex<Vec<ConsumerHandle>>,
}

/// Drives many concurrent executions through remote workers
#[derive(Clone)]
pub struct QueuedOrchestrator {
    inner: Arc<QueuedInner>,
}

impl QueuedOrchestrator {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        store: Arc<dyn ExecutionStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(QueuedInner {
                broker,
                store,
                config,
                executions: RwLock::new(HashMap::new()),
                consumers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start a stored execution by publishing its root tasks.
    ///
    /// Returns once the first frontier is on the task queue; the execution
    /// advances as results arrive.
    pub async fn execute_flow(&self, execution_id: &str) -> Result<(), DagError> {
        let store = &self.inner.store;
        let mut execution = store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| DagError::NotFound(format!("execution {}", execution_id)))?;
        let flow = store
            .get_flow(&execution.flow_id)
            .await?
            .ok_or_else(|| DagError::NotFound(format!("flow {}", execution.flow_id)))?;

        ensure_pending(&execution)?;
        if self.inner.executions.read().await.contains_key(execution_id) {
            return Err(DagError::Validation(format!(
                "execution {} is already in flight",
                execution_id
            )));
        }

        if !self.inner.broker.is_connected() {
            return Err(DagError::BrokerUnavailable(
                "broker is not connected".to_string(),
            ));
        }

        execution.mark_running();
        store.update_execution(&execution).await?;

        let prepared = Graph::from_definition(&flow).and_then(|graph| {
            let dag = DagAnalyzer::new(&graph);
            dag.validate()?;
            Ok((graph, dag))
        });
        let (graph, dag) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(execution_id, "Rejecting flow {}: {}", flow.id, e);
                execution.mark_failed(e.to_string());
                store.update_execution(&execution).await?;
                return Err(e);
            }
        };

        if graph.is_empty() {
            info!(execution_id, "Flow has no nodes; completing immediately");
            execution.mark_completed(HashMap::new());
            return store.update_execution(&execution).await;
        }

        let entry_points: HashSet<NodeId> = graph.entry_points().into_iter().collect();
        let mut tasks = HashMap::with_capacity(graph.len());
        let mut task_index = HashMap::with_capacity(graph.len());
        for node in graph.nodes() {
            let mut task = Task::from_node(node, &graph).with_unique_id();
            if entry_points.contains(&node.id) {
                task = task.with_inputs(execution.inputs.clone());
            }
            task_index.insert(task.id.clone(), node.id.clone());
            tasks.insert(node.id.clone(), task);
        }

        let state = Arc::new(Mutex::new(ExecutionState {
            flow_id: execution.flow_id.clone(),
            user_id: execution.user_id.clone(),
            dag,
            tasks,
            task_index,
            completed_nodes: HashSet::new(),
            results: HashMap::new(),
            finished: false,
            started_at: Utc::now(),
        }));
        {
            let mut executions = self.inner.executions.write().await;
            if executions.contains_key(execution_id) {
                return Err(DagError::Validation(format!(
                    "execution {} is already in flight",
                    execution_id
                )));
            }
            executions.insert(execution_id.to_string(), state.clone());
        }

        if let Err(e) = self.ensure_result_consumers().await {
            state.lock().await.finished = true;
            self.finish(execution_id, Outcome::Failed(e.to_string()))
                .await?;
            return Err(e);
        }

        info!(
            execution_id,
            flow_id = %execution.flow_id,
            nodes = graph.len(),
            "Execution started"
        );

        let guard = state.lock().await;
        self.advance(execution_id, guard).await
    }

    /// Apply one result message to its execution.
    ///
    /// Results for unknown or finished executions, unknown tasks, or tasks
    /// that are no longer running are discarded and return `Ok` so the
    /// broker acknowledges them.
    pub async fn on_result(&self, message: ResultMessage) -> Result<(), DagError> {
        let execution_id = message.execution_id.as_str();
        let Some(entry) = self.entry(execution_id).await else {
            warn!(
                execution_id,
                task_id = %message.task_id,
                "Discarding result for inactive execution"
            );
            return Ok(());
        };

        let mut guard = entry.lock().await;
        if guard.finished {
            warn!(
                execution_id,
                task_id = %message.task_id,
                "Discarding result for finished execution"
            );
            return Ok(());
        }

        let state = &mut *guard;
        let Some(node_id) = state.task_index.get(&message.task_id).cloned() else {
            warn!(execution_id, task_id = %message.task_id, "Discarding result for unknown task");
            return Ok(());
        };
        let Some(task) = state.tasks.get_mut(&node_id) else {
            warn!(execution_id, node_id = %node_id, "Discarding result for unknown node");
            return Ok(());
        };
        if task.status != TaskStatus::Running {
            debug!(
                execution_id,
                task_id = %message.task_id,
                status = ?task.status,
                "Discarding duplicate result"
            );
            return Ok(());
        }

        if message.success {
            let result = message.result.unwrap_or(Value::Null);
            task.complete(result.clone())?;
            debug!(execution_id, node_id = %node_id, "Task completed");
            state.results.insert(node_id.clone(), result);
            state.completed_nodes.insert(node_id);

            if state.dag.is_complete(&state.completed_nodes) {
                state.finished = true;
                let outputs = state.results.clone();
                let elapsed = Utc::now() - state.started_at;
                drop(guard);
                info!(
                    execution_id,
                    "Execution completed in {}ms",
                    elapsed.num_milliseconds()
                );
                return self.finish(execution_id, Outcome::Completed(outputs)).await;
            }

            self.advance(execution_id, guard).await
        } else {
            let reason = message
                .error
                .unwrap_or_else(|| "unknown error".to_string());
            task.fail(reason.clone())?;
            let failure = format!("Task {} (node {}) failed: {}", task.id, node_id, reason);
            state.finished = true;
            drop(guard);
            error!(execution_id, "{}", failure);
            self.finish(execution_id, Outcome::Failed(failure)).await
        }
    }

    /// Abandon an in-flight execution; results still in flight are discarded
    pub async fn cancel(&self, execution_id: &str) -> Result<(), DagError> {
        let entry = self
            .entry(execution_id)
            .await
            .ok_or_else(|| DagError::NotFound(format!("active execution {}", execution_id)))?;

        let mut guard = entry.lock().await;
        if guard.finished {
            return Ok(());
        }
        for task in guard.tasks.values_mut() {
            if !task.status.is_terminal() {
                task.cancel()?;
            }
        }
        guard.finished = true;
        drop(guard);

        info!(execution_id, "Execution cancelled");
        self.finish(execution_id, Outcome::Cancelled).await
    }

    /// Ids of executions with scheduling state, sorted
    pub async fn active_executions(&self) -> Vec<ExecutionId> {
        let mut ids: Vec<ExecutionId> = self.inner.executions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of task states for an in-flight execution
    pub async fn task_statuses(&self, execution_id: &str) -> Option<HashMap<NodeId, TaskStatus>> {
        let entry = self.entry(execution_id).await?;
        let state = entry.lock().await;
        Some(
            state
                .tasks
                .iter()
                .map(|(node_id, task)| (node_id.clone(), task.status))
                .collect(),
        )
    }

    /// Stop the result consumers
    pub async fn shutdown(&self) {
        let consumers: Vec<ConsumerHandle> = self.inner.consumers.lock().await.drain(..).collect();
        for consumer in consumers {
            consumer.shutdown().await;
        }
    }

    async fn entry(&self, execution_id: &str) -> Option<Arc<Mutex<ExecutionState>>> {
        self.inner.executions.read().await.get(execution_id).cloned()
    }

    /// Publish the current frontier of an execution, consuming its lock
    async fn advance(
        &self,
        execution_id: &str,
        mut guard: MutexGuard<'_, ExecutionState>,
    ) -> Result<(), DagError> {
        let messages = guard.dispatch_ready(execution_id)?;
        for message in messages {
            if let Err(e) = self.inner.broker.publish_task(&message).await {
                guard.finished = true;
                drop(guard);
                let failure = format!("Failed to publish task {}: {}", message.task_id, e);
                error!(execution_id, "{}", failure);
                self.finish(execution_id, Outcome::Failed(failure)).await?;
                return Err(e.into());
            }
            debug!(
                execution_id,
                task_id = %message.task_id,
                node_type = %message.node_type,
                "Published task"
            );
            self.arm_watchdog(&message);
        }
        Ok(())
    }

    /// Drop scheduling state and persist the terminal outcome
    async fn finish(&self, execution_id: &str, outcome: Outcome) -> Result<(), DagError> {
        self.inner.executions.write().await.remove(execution_id);

        let Some(mut execution) = self.inner.store.get_execution(execution_id).await? else {
            warn!(execution_id, "Execution record disappeared before completion");
            return Ok(());
        };
        match outcome {
            Outcome::Completed(outputs) => execution.mark_completed(outputs),
            Outcome::Failed(message) => execution.mark_failed(message),
            Outcome::Cancelled => execution.mark_cancelled(),
        }
        self.inner.store.update_execution(&execution).await
    }

    /// Fail the execution if this task has not reported back in time
    fn arm_watchdog(&self, message: &TaskMessage) {
        let Some(timeout) = self.inner.config.task_timeout else {
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        let execution_id = message.execution_id.clone();
        let task_id = message.task_id.clone();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let orchestrator = QueuedOrchestrator { inner };
            let expired = ResultMessage::failure(
                task_id,
                execution_id,
                format!("no result within {}ms", timeout.as_millis()),
            );
            if let Err(e) = orchestrator.on_result(expired).await {
                warn!("Task watchdog failed: {}", e);
            }
        });
    }

    /// Start the shared result consumers once per orchestrator
    async fn ensure_result_consumers(&self) -> Result<(), DagError> {
        let mut consumers = self.inner.consumers.lock().await;
        consumers.retain(|c| !c.is_finished());
        if !consumers.is_empty() {
            return Ok(());
        }

        let count = self.inner.config.result_consumers.max(1);
        for _ in 0..count {
            let router = Arc::new(ResultRouter {
                inner: Arc::downgrade(&self.inner),
            });
            consumers.push(self.inner.broker.consume_results(router).await?);
        }
        info!(consumers = count, "Result consumers started");
        Ok(())
    }
}

/// Routes result messages back into the orchestrator
struct ResultRouter {
    inner: Weak<QueuedInner>,
}

#[async_trait]
impl ResultHandler for ResultRouter {
    async fn handle_result(&self, result: ResultMessage) -> Result<(), BrokerError> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        QueuedOrchestrator { inner }
            .on_result(result)
            .await
            .map_err(|e| BrokerError::Handler(e.to_string()))
    }
}
