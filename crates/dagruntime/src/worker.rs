use crate::config::WorkerConfig;
use crate::registry::NodeRegistry;
use async_trait::async_trait;
use dagcore::broker::{ConsumerHandle, MessageBroker, ResultMessage, TaskHandler, TaskMessage};
use dagcore::{BrokerError, DagError, NodeContext};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Executes task messages against the registry and reports the outcome
struct TaskRunner {
    worker_id: String,
    registry: Arc<NodeRegistry>,
    broker: Arc<dyn MessageBroker>,
}

impl TaskRunner {
    async fn run(&self, task: &TaskMessage) -> ResultMessage {
        let worker = match self.registry.resolve(&task.node_type) {
            Ok(worker) => worker,
            Err(e) => {
                error!(
                    worker_id = %self.worker_id,
                    task_id = %task.task_id,
                    "Cannot execute task: {}",
                    e
                );
                return ResultMessage::failure(&task.task_id, &task.execution_id, e.to_string());
            }
        };

        let ctx = NodeContext::new(
            task.execution_id.clone(),
            task.flow_id.clone(),
            task.node_id.clone(),
        )
        .with_user(task.user_id.clone())
        .with_node(task.node_type.clone(), task.node_id.clone());

        debug!(
            worker_id = %self.worker_id,
            task_id = %task.task_id,
            node_type = %task.node_type,
            "Executing task"
        );
        let started = Instant::now();
        match worker.execute(&task.config, &task.inputs, &ctx).await {
            Ok(result) => {
                info!(
                    worker_id = %self.worker_id,
                    "Task {} completed in {}ms",
                    task.task_id,
                    started.elapsed().as_millis()
                );
                ResultMessage::success(&task.task_id, &task.execution_id, result)
            }
            Err(e) => {
                let failure = DagError::ComponentExecution {
                    node_id: task.node_id.clone(),
                    source: e,
                };
                error!(worker_id = %self.worker_id, "Task {} failed: {}", task.task_id, failure);
                ResultMessage::failure(&task.task_id, &task.execution_id, failure.to_string())
            }
        }
    }
}

#[async_trait]
impl TaskHandler for TaskRunner {
    async fn handle_task(&self, task: TaskMessage) -> Result<(), BrokerError> {
        let result = self.run(&task).await;
        // Unpublished results leave the task unacknowledged for redelivery
        self.broker.publish_result(&result).await
    }
}

/// Stateless task executor pulling from the broker's task queue
pub struct Worker {
    runner: Arc<TaskRunner>,
    concurrency: usize,
    consumers: Mutex<Vec<ConsumerHandle>>,
}

impl Worker {
    pub fn new(
        registry: Arc<NodeRegistry>,
        broker: Arc<dyn MessageBroker>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            runner: Arc::new(TaskRunner {
                worker_id: config.worker_id,
                registry,
                broker,
            }),
            concurrency: config.concurrency.max(1),
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.runner.worker_id
    }

    /// Execute one task without going through the broker
    pub async fn process(&self, task: &TaskMessage) -> ResultMessage {
        self.runner.run(task).await
    }

    /// Start the competing task consumers
    pub async fn start(&self) -> Result<(), DagError> {
        let mut consumers = self.consumers.lock().await;
        if !consumers.is_empty() {
            return Ok(());
        }
        for _ in 0..self.concurrency {
            let handler: Arc<dyn TaskHandler> = self.runner.clone();
            consumers.push(self.runner.broker.consume_tasks(handler).await?);
        }
        info!(
            worker_id = %self.runner.worker_id,
            concurrency = self.concurrency,
            "Worker started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) {
        let consumers: Vec<ConsumerHandle> = self.consumers.lock().await.drain(..).collect();
        for consumer in consumers {
            consumer.shutdown().await;
        }
        info!(worker_id = %self.runner.worker_id, "Worker stopped");
    }
}
