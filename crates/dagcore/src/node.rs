use crate::events::{ExecutionObserver, ObserverHandle, StreamingUpdate};
use crate::{ExecutionId, FlowId, NodeError, NodeId, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Business logic behind one node type.
///
/// Workers are stateless between calls; everything they need arrives
/// through `config`, `inputs` and the execution context.
#[async_trait]
pub trait NodeWorker: Send + Sync {
    /// Type tag this worker is registered under (e.g. "transform.text")
    fn node_type(&self) -> &str;

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        ctx: &NodeContext,
    ) -> Result<Value, NodeError>;

    /// Optional: validate configuration at flow load time
    fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Execution context passed to each node worker
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub node_id: NodeId,
    pub user_id: Option<String>,
    pub node_type: String,
    pub node_label: String,

    /// Cancellation token for graceful shutdown
    pub cancellation: CancellationToken,

    observer: ObserverHandle,
    accumulated: Arc<Mutex<String>>,
}

impl NodeContext {
    pub fn new(
        execution_id: impl Into<ExecutionId>,
        flow_id: impl Into<FlowId>,
        node_id: impl Into<NodeId>,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            execution_id: execution_id.into(),
            flow_id: flow_id.into(),
            node_label: node_id.clone(),
            node_id,
            user_id: None,
            node_type: String::new(),
            cancellation: CancellationToken::new(),
            observer: ObserverHandle::none(),
            accumulated: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_node(mut self, node_type: impl Into<String>, label: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self.node_label = label.into();
        self
    }

    /// Attach the observer that receives streaming updates from this node
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = ObserverHandle::new(observer);
        self
    }

    pub fn with_observer_handle(mut self, observer: ObserverHandle) -> Self {
        self.observer = observer;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Emit an incremental chunk of streamed output
    pub fn stream(&self, delta: &str) {
        self.push_stream(delta, false);
    }

    /// Mark the streamed output as complete
    pub fn finish_stream(&self) {
        self.push_stream("", true);
    }

    /// Text streamed so far
    pub fn streamed(&self) -> String {
        self.accumulated
            .lock()
            .map(|acc| acc.clone())
            .unwrap_or_default()
    }

    fn push_stream(&self, delta: &str, is_complete: bool) {
        let accumulated = match self.accumulated.lock() {
            Ok(mut acc) => {
                acc.push_str(delta);
                acc.clone()
            }
            Err(_) => return,
        };
        if !self.observer.is_attached() {
            return;
        }
        let update = StreamingUpdate {
            node_type: self.node_type.clone(),
            node_label: self.node_label.clone(),
            delta: delta.to_string(),
            accumulated,
            is_complete,
        };
        self.observer.streaming_update(&self.node_id, &update);
    }
}

/// Get required input or return error
pub fn require_input<'a>(
    inputs: &'a HashMap<String, Value>,
    name: &str,
) -> Result<&'a Value, NodeError> {
    inputs
        .get(name)
        .ok_or_else(|| NodeError::MissingInput(name.to_string()))
}

/// Get config value or return error
pub fn require_config<'a>(
    config: &'a HashMap<String, Value>,
    name: &str,
) -> Result<&'a Value, NodeError> {
    config
        .get(name)
        .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
}

/// Get config with default
pub fn config_or(config: &HashMap<String, Value>, name: &str, default: Value) -> Value {
    config.get(name).cloned().unwrap_or(default)
}
