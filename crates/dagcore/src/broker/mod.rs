//! Message broker gateway
//!
//! A durable task queue shared by competing workers, a result queue read by
//! the orchestrator, and a dead-letter queue for messages that keep failing.
//! Consumers acknowledge a message only after their handler returns `Ok`.

mod memory;
mod message;
mod nats;

pub use memory::{InMemoryBroker, InMemoryBrokerConfig};
pub use message::{DeadLetter, ResultMessage, TaskMessage};
pub use nats::{BrokerConfig, NatsBroker};

use crate::BrokerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TASK_QUEUE: &str = "tasks";
pub const RESULT_QUEUE: &str = "results";
pub const DEAD_LETTER_QUEUE: &str = "dead_letter";

/// Worker side: executes one task message
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle_task(&self, task: TaskMessage) -> Result<(), BrokerError>;
}

/// Orchestrator side: applies one result message
#[async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle_result(&self, result: ResultMessage) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    async fn publish_task(&self, task: &TaskMessage) -> Result<(), BrokerError>;

    /// Start a competing consumer on the task queue
    async fn consume_tasks(&self, handler: Arc<dyn TaskHandler>) -> Result<ConsumerHandle, BrokerError>;

    async fn publish_result(&self, result: &ResultMessage) -> Result<(), BrokerError>;

    async fn consume_results(
        &self,
        handler: Arc<dyn ResultHandler>,
    ) -> Result<ConsumerHandle, BrokerError>;

    async fn queue_depths(&self) -> Result<QueueDepths, BrokerError>;
}

/// Messages waiting in each queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    pub tasks: u64,
    pub results: u64,
    pub dead_letter: u64,
}

/// Running consumer loop
pub struct ConsumerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    pub(crate) fn new(cancel: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { cancel, join }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!("Consumer task ended abnormally: {}", e);
        }
    }
}

/// Decodes a payload and hands it to the right handler
#[derive(Clone)]
pub(crate) enum Dispatch {
    Task(Arc<dyn TaskHandler>),
    Result(Arc<dyn ResultHandler>),
}

impl Dispatch {
    pub(crate) fn queue(&self) -> &'static str {
        match self {
            Dispatch::Task(_) => TASK_QUEUE,
            Dispatch::Result(_) => RESULT_QUEUE,
        }
    }

    pub(crate) async fn deliver(&self, payload: &[u8]) -> Result<(), BrokerError> {
        match self {
            Dispatch::Task(handler) => handler.handle_task(TaskMessage::from_slice(payload)?).await,
            Dispatch::Result(handler) => {
                handler
                    .handle_result(ResultMessage::from_slice(payload)?)
                    .await
            }
        }
    }
}
