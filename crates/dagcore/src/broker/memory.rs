use super::{
    ConsumerHandle, DeadLetter, Dispatch, MessageBroker, QueueDepths, ResultHandler,
    ResultMessage, TaskHandler, TaskMessage,
};
use crate::BrokerError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// Configuration for the in-process broker
#[derive(Debug, Clone)]
pub struct InMemoryBrokerConfig {
    /// Deliveries attempted before a message is dead-lettered
    pub max_deliveries: u32,
    /// When false, `connect` fails as if the broker were down
    pub reachable: bool,
}

impl Default for InMemoryBrokerConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 3,
            reachable: true,
        }
    }
}

struct Envelope {
    payload: Vec<u8>,
    deliveries: u32,
}

struct Queue {
    items: Mutex<VecDeque<Envelope>>,
    notify: Notify,
}

impl Queue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    async fn push(&self, envelope: Envelope) {
        self.items.lock().await.push_back(envelope);
        self.notify.notify_one();
    }

    async fn pop(&self, cancel: &CancellationToken) -> Option<Envelope> {
        loop {
            let notified = self.notify.notified();
            if let Some(envelope) = self.items.lock().await.pop_front() {
                return Some(envelope);
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    async fn len(&self) -> u64 {
        self.items.lock().await.len() as u64
    }
}

/// Broker living inside the current process.
///
/// Each message is handed to exactly one consumer. A failed handler puts
/// the message back at the tail of its queue until `max_deliveries` is
/// reached, after which it moves to the dead-letter list.
pub struct InMemoryBroker {
    config: InMemoryBrokerConfig,
    connected: AtomicBool,
    tasks: Arc<Queue>,
    results: Arc<Queue>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_config(InMemoryBrokerConfig::default())
    }

    pub fn with_config(config: InMemoryBrokerConfig) -> Self {
        Self {
            config,
            connected: AtomicBool::new(false),
            tasks: Arc::new(Queue::new()),
            results: Arc::new(Queue::new()),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A broker whose `connect` always fails
    pub fn unreachable() -> Self {
        Self::with_config(InMemoryBrokerConfig {
            reachable: false,
            ..InMemoryBrokerConfig::default()
        })
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    fn spawn_consumer(&self, queue: Arc<Queue>, dispatch: Dispatch) -> ConsumerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let dead_letters = self.dead_letters.clone();
        let max_deliveries = self.config.max_deliveries.max(1);

        let join = tokio::spawn(async move {
            while let Some(mut envelope) = queue.pop(&token).await {
                envelope.deliveries += 1;
                match dispatch.deliver(&envelope.payload).await {
                    Ok(()) => {}
                    Err(BrokerError::SerializationFailed(e)) => {
                        tracing::error!(queue = dispatch.queue(), "Undecodable message: {}", e);
                        dead_letters.lock().await.push(DeadLetter::new(
                            dispatch.queue(),
                            &envelope.payload,
                            e,
                            envelope.deliveries,
                        ));
                    }
                    Err(e) if envelope.deliveries >= max_deliveries => {
                        tracing::warn!(
                            queue = dispatch.queue(),
                            deliveries = envelope.deliveries,
                            "Delivery limit reached, dead-lettering: {}",
                            e
                        );
                        dead_letters.lock().await.push(DeadLetter::new(
                            dispatch.queue(),
                            &envelope.payload,
                            e.to_string(),
                            envelope.deliveries,
                        ));
                    }
                    Err(e) => {
                        tracing::debug!(
                            queue = dispatch.queue(),
                            deliveries = envelope.deliveries,
                            "Handler failed, requeueing: {}",
                            e
                        );
                        queue.push(envelope).await;
                    }
                }
            }
        });

        ConsumerHandle::new(cancel, join)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        if !self.config.reachable {
            return Err(BrokerError::ConnectionFailed(
                "in-memory broker configured as unreachable".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_task(&self, task: &TaskMessage) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        let payload = task.to_bytes()?;
        self.tasks
            .push(Envelope {
                payload,
                deliveries: 0,
            })
            .await;
        Ok(())
    }

    async fn consume_tasks(&self, handler: Arc<dyn TaskHandler>) -> Result<ConsumerHandle, BrokerError> {
        self.ensure_connected()?;
        Ok(self.spawn_consumer(self.tasks.clone(), Dispatch::Task(handler)))
    }

    async fn publish_result(&self, result: &ResultMessage) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        let payload = result.to_bytes()?;
        self.results
            .push(Envelope {
                payload,
                deliveries: 0,
            })
            .await;
        Ok(())
    }

    async fn consume_results(
        &self,
        handler: Arc<dyn ResultHandler>,
    ) -> Result<ConsumerHandle, BrokerError> {
        self.ensure_connected()?;
        Ok(self.spawn_consumer(self.results.clone(), Dispatch::Result(handler)))
    }

    async fn queue_depths(&self) -> Result<QueueDepths, BrokerError> {
        Ok(QueueDepths {
            tasks: self.tasks.len().await,
            results: self.results.len().await,
            dead_letter: self.dead_letters.lock().await.len() as u64,
        })
    }
}
