use dagcore::{DagError, Graph, NodeMetadata, NodeWorker};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available node types
pub struct NodeRegistry {
    workers: HashMap<String, Arc<dyn NodeWorker>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    /// Register a worker under its node type
    pub fn register(&mut self, worker: Arc<dyn NodeWorker>) {
        let node_type = worker.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.workers.insert(node_type, worker);
    }

    /// Resolve the worker for a node type
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeWorker>, DagError> {
        self.workers
            .get(node_type)
            .cloned()
            .ok_or_else(|| DagError::WorkerNotFound(node_type.to_string()))
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.workers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.workers.get(node_type).map(|w| w.metadata())
    }

    /// Check every node of a graph has a worker and a config it accepts
    pub fn check_graph(&self, graph: &Graph) -> Result<(), DagError> {
        for node in graph.nodes() {
            let worker = self.resolve(&node.node_type)?;
            worker.validate_config(&node.configuration).map_err(|e| {
                DagError::Validation(format!("node {} has invalid configuration: {}", node.id, e))
            })?;
        }
        Ok(())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
