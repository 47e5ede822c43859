use crate::graph::NodeId;
use crate::task::TaskStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagError {
    /// Cyclic graph or malformed flow definition
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No worker registered for node type: {0}")]
    WorkerNotFound(String),

    /// A node worker raised during execution
    #[error("Node {node_id} failed: {source}")]
    ComponentExecution {
        node_id: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("Message broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Broker error: {0}")]
    Broker(BrokerError),

    #[error("Invalid task transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<BrokerError> for DagError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::ConnectionFailed(msg) => DagError::BrokerUnavailable(msg),
            other => DagError::Broker(other),
        }
    }
}

/// Error returned by a node worker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    ConnectionFailed(String),

    #[error("Broker is not connected")]
    NotConnected,

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to subscribe: {0}")]
    SubscribeFailed(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(String),

    #[error("Message handler failed: {0}")]
    Handler(String),
}
