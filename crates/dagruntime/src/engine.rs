use crate::config::RuntimeConfig;
use crate::direct::DirectOrchestrator;
use crate::interactive::InteractiveOrchestrator;
use crate::queued::QueuedOrchestrator;
use crate::registry::NodeRegistry;
use crate::store::ExecutionStore;
use dagcore::broker::MessageBroker;
use dagcore::{DagError, EventBus, ExecutionEvent, ExecutionStatus};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Composition root owning the orchestrators of one process
pub struct Engine {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn ExecutionStore>,
    event_bus: Arc<EventBus>,
    queued: Option<QueuedOrchestrator>,
}

impl Engine {
    /// In-process execution only
    pub fn direct(registry: Arc<NodeRegistry>, store: Arc<dyn ExecutionStore>) -> Self {
        Self::build(registry, store, &RuntimeConfig::default(), None)
    }

    /// Distributed execution through `broker`, degrading to in-process
    /// execution when the broker cannot be reached
    pub async fn connect(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn ExecutionStore>,
        broker: Arc<dyn MessageBroker>,
        config: RuntimeConfig,
    ) -> Self {
        let queued = match broker.connect().await {
            Ok(()) => {
                info!("Broker connected; using queued orchestration");
                Some(QueuedOrchestrator::new(broker, store.clone(), config.clone()))
            }
            Err(e) => {
                let e = DagError::from(e);
                warn!("{}; falling back to direct orchestration", e);
                None
            }
        };
        Self::build(registry, store, &config, queued)
    }

    fn build(
        registry: Arc<NodeRegistry>,
        store: Arc<dyn ExecutionStore>,
        config: &RuntimeConfig,
        queued: Option<QueuedOrchestrator>,
    ) -> Self {
        Self {
            registry,
            store,
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            queued,
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.queued.is_some()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn queued(&self) -> Option<&QueuedOrchestrator> {
        self.queued.as_ref()
    }

    pub fn interactive(&self) -> InteractiveOrchestrator {
        InteractiveOrchestrator::new(self.registry.clone())
    }

    /// Subscribe to events of in-process executions
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Execute a stored execution with whichever orchestrator is active.
    ///
    /// Queued executions return `Running` once dispatched; direct ones
    /// return their terminal status.
    pub async fn execute(&self, execution_id: &str) -> Result<ExecutionStatus, DagError> {
        match &self.queued {
            Some(queued) => {
                queued.execute_flow(execution_id).await?;
                Ok(ExecutionStatus::Running)
            }
            None => {
                let emitter = self.event_bus.create_emitter(execution_id);
                let report = DirectOrchestrator::new(self.registry.clone(), self.store.clone())
                    .with_observer(Arc::new(emitter))
                    .execute(execution_id)
                    .await?;
                Ok(report.status)
            }
        }
    }

    pub async fn shutdown(&self) {
        if let Some(queued) = &self.queued {
            queued.shutdown().await;
        }
    }
}
