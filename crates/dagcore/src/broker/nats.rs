// crates/dagcore/src/broker/nats.rs

use async_nats::jetstream::consumer::{pull, AckPolicy, PullConsumer};
use async_nats::jetstream::stream::{self, RetentionPolicy};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{
    ConsumerHandle, DeadLetter, Dispatch, MessageBroker, QueueDepths, ResultHandler,
    ResultMessage, TaskHandler, TaskMessage, DEAD_LETTER_QUEUE, RESULT_QUEUE, TASK_QUEUE,
};
use crate::BrokerError;

/// Configuration for the NATS JetStream broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    /// Prefix for stream names and subjects
    pub stream_prefix: String,
    /// Deliveries attempted before a message is dead-lettered
    pub max_deliver: i64,
    /// How long the server waits for an ack before redelivering
    pub ack_wait: Duration,
    /// Delay requested when a handler rejects a message
    pub nak_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream_prefix: "DAGFLOW".to_string(),
            max_deliver: 5,
            ack_wait: Duration::from_secs(30),
            nak_delay: Duration::from_secs(1),
        }
    }
}

impl BrokerConfig {
    fn stream_name(&self, queue: &str) -> String {
        format!("{}_{}", self.stream_prefix, queue.to_uppercase())
    }

    fn subject(&self, queue: &str) -> String {
        format!("{}.{}", self.stream_prefix.to_lowercase(), queue)
    }

    fn durable_name(&self, queue: &str) -> String {
        format!("{}-{}", self.stream_prefix.to_lowercase(), queue.replace('_', "-"))
    }
}

struct Connection {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

/// Broker backed by NATS JetStream work-queue streams.
///
/// Tasks and results live on `WorkQueue` streams, so a message is removed
/// once one consumer acknowledges it. All workers share one durable pull
/// consumer on the task stream, which makes them compete for messages.
pub struct NatsBroker {
    config: BrokerConfig,
    connection: RwLock<Option<Arc<Connection>>>,
    connected: AtomicBool,
}

impl NatsBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    async fn connection(&self) -> Result<Arc<Connection>, BrokerError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)
    }

    /// Ensure the task, result and dead-letter streams exist
    async fn ensure_streams(&self, jetstream: &jetstream::Context) -> Result<(), BrokerError> {
        for (queue, retention) in [
            (TASK_QUEUE, RetentionPolicy::WorkQueue),
            (RESULT_QUEUE, RetentionPolicy::WorkQueue),
            (DEAD_LETTER_QUEUE, RetentionPolicy::Limits),
        ] {
            let name = self.config.stream_name(queue);
            tracing::debug!("Ensuring stream: {}", name);

            jetstream
                .get_or_create_stream(stream::Config {
                    name: name.clone(),
                    subjects: vec![self.config.subject(queue)],
                    retention,
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create stream {}: {}", name, e);
                    BrokerError::ConnectionFailed(format!("Stream setup failed for {}: {}", name, e))
                })?;
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let connection = self.connection().await?;
        let subject = self.config.subject(queue);

        tracing::debug!(subject = %subject, bytes = payload.len(), "Publishing message");

        connection
            .jetstream
            .publish(subject, payload.into())
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, queue: &'static str, dispatch: Dispatch) -> Result<ConsumerHandle, BrokerError> {
        let connection = self.connection().await?;
        let stream_name = self.config.stream_name(queue);
        let durable = self.config.durable_name(queue);

        let stream = connection
            .jetstream
            .get_stream(&stream_name)
            .await
            .map_err(|e| BrokerError::SubscribeFailed(format!("Failed to get stream {}: {}", stream_name, e)))?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_deliver: self.config.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::SubscribeFailed(format!("Failed to create consumer {}: {}", durable, e)))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BrokerError::SubscribeFailed(e.to_string()))?;

        tracing::info!(stream = %stream_name, consumer = %durable, "Consumer started");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let dead_letter_subject = self.config.subject(DEAD_LETTER_QUEUE);
        let max_deliver = self.config.max_deliver;
        let nak_delay = self.config.nak_delay;

        let join = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = messages.next() => next,
                };

                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::error!(queue, "Failed to receive message: {}", e);
                        continue;
                    }
                    None => break,
                };

                let deliveries = message.info().map(|info| info.delivered).unwrap_or(1);
                let outcome = dispatch.deliver(&message.payload).await;

                let ack = match outcome {
                    Ok(()) => message.ack().await,
                    Err(e) => {
                        let poisoned = matches!(e, BrokerError::SerializationFailed(_));
                        if poisoned || deliveries >= max_deliver {
                            tracing::warn!(queue, deliveries, "Dead-lettering message: {}", e);
                            let letter = DeadLetter::new(
                                queue,
                                &message.payload,
                                e.to_string(),
                                deliveries.max(0) as u32,
                            );
                            match serde_json::to_vec(&letter) {
                                Ok(body) => {
                                    if let Err(e) = connection
                                        .jetstream
                                        .publish(dead_letter_subject.clone(), body.into())
                                        .await
                                    {
                                        tracing::error!("Failed to publish dead letter: {}", e);
                                    }
                                }
                                Err(e) => tracing::error!("Failed to encode dead letter: {}", e),
                            }
                            message.ack_with(AckKind::Term).await
                        } else {
                            tracing::debug!(queue, deliveries, "Handler failed, requesting redelivery: {}", e);
                            message.ack_with(AckKind::Nak(Some(nak_delay))).await
                        }
                    }
                };

                if let Err(e) = ack {
                    tracing::error!(queue, "Failed to acknowledge message: {}", e);
                }
            }
            tracing::info!(queue, "Consumer stopped");
        });

        Ok(ConsumerHandle::new(cancel, join))
    }

    async fn stream_depth(&self, jetstream: &jetstream::Context, queue: &str) -> Result<u64, BrokerError> {
        let name = self.config.stream_name(queue);
        let stream = jetstream
            .get_stream(&name)
            .await
            .map_err(|e| BrokerError::SubscribeFailed(format!("Failed to get stream {}: {}", name, e)))?;
        let info = stream
            .get_info()
            .await
            .map_err(|e| BrokerError::SubscribeFailed(format!("Failed to read stream {}: {}", name, e)))?;
        Ok(info.state.messages)
    }
}

#[async_trait]
impl MessageBroker for NatsBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        tracing::info!("Connecting to NATS: {}", self.config.url);

        let client = async_nats::connect(&self.config.url).await.map_err(|e| {
            tracing::error!("Failed to connect to NATS: {}", e);
            BrokerError::ConnectionFailed(format!("Connection failed: {}", e))
        })?;
        let jetstream = jetstream::new(client.clone());

        self.ensure_streams(&jetstream).await?;

        *self.connection.write().await = Some(Arc::new(Connection { client, jetstream }));
        self.connected.store(true, Ordering::SeqCst);

        tracing::info!("Connected to NATS successfully");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let connection = self.connection.write().await.take();
        self.connected.store(false, Ordering::SeqCst);

        if let Some(connection) = connection {
            tracing::info!("Disconnecting from NATS");
            connection
                .client
                .drain()
                .await
                .map_err(|e| BrokerError::ConnectionFailed(format!("Drain failed: {}", e)))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_task(&self, task: &TaskMessage) -> Result<(), BrokerError> {
        self.publish(TASK_QUEUE, task.to_bytes()?).await
    }

    async fn consume_tasks(&self, handler: Arc<dyn TaskHandler>) -> Result<ConsumerHandle, BrokerError> {
        self.consume(TASK_QUEUE, Dispatch::Task(handler)).await
    }

    async fn publish_result(&self, result: &ResultMessage) -> Result<(), BrokerError> {
        self.publish(RESULT_QUEUE, result.to_bytes()?).await
    }

    async fn consume_results(
        &self,
        handler: Arc<dyn ResultHandler>,
    ) -> Result<ConsumerHandle, BrokerError> {
        self.consume(RESULT_QUEUE, Dispatch::Result(handler)).await
    }

    async fn queue_depths(&self) -> Result<QueueDepths, BrokerError> {
        let connection = self.connection().await?;
        Ok(QueueDepths {
            tasks: self.stream_depth(&connection.jetstream, TASK_QUEUE).await?,
            results: self.stream_depth(&connection.jetstream, RESULT_QUEUE).await?,
            dead_letter: self.stream_depth(&connection.jetstream, DEAD_LETTER_QUEUE).await?,
        })
    }
}
