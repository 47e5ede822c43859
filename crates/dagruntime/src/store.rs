use async_trait::async_trait;
use dagcore::{DagError, Execution, ExecutionId, FlowDefinition, FlowId, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable storage the orchestrators read from and report to.
///
/// Every operation is atomic with respect to a single execution record.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, DagError>;

    /// Graph definition of the flow version an execution runs
    async fn get_flow(&self, flow_id: &str) -> Result<Option<FlowDefinition>, DagError>;

    async fn update_execution(&self, execution: &Execution) -> Result<(), DagError>;
}

/// Store kept in process memory
#[derive(Default)]
pub struct InMemoryStore {
    flows: RwLock<HashMap<FlowId, FlowDefinition>>,
    executions: RwLock<HashMap<ExecutionId, Execution>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_flow(&self, flow: FlowDefinition) {
        self.flows.write().await.insert(flow.id.clone(), flow);
    }

    pub async fn insert_execution(&self, execution: Execution) {
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution);
    }

    /// Create a pending execution of a stored flow
    pub async fn create_execution(
        &self,
        flow_id: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<Execution, DagError> {
        if !self.flows.read().await.contains_key(flow_id) {
            return Err(DagError::NotFound(format!("flow {}", flow_id)));
        }
        let execution = Execution::new(flow_id, inputs);
        self.insert_execution(execution.clone()).await;
        Ok(execution)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, DagError> {
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn get_flow(&self, flow_id: &str) -> Result<Option<FlowDefinition>, DagError> {
        Ok(self.flows.read().await.get(flow_id).cloned())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), DagError> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(())
            }
            None => Err(DagError::NotFound(format!("execution {}", execution.id))),
        }
    }
}
