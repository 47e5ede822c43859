//! Core abstractions for the dagflow engine
//!
//! Graph model, DAG analysis, task lifecycle, execution records, the node
//! worker contract, observer events and the message broker gateway. The
//! runtime crate builds its orchestrators on top of these types.

pub mod broker;
mod dag;
mod error;
pub mod events;
mod execution;
mod graph;
mod node;
mod task;

pub use dag::DagAnalyzer;
pub use error::{BrokerError, DagError, NodeError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, ExecutionObserver, ObserverHandle, StreamingUpdate};
pub use execution::{Execution, ExecutionId, ExecutionStatus};
pub use graph::{
    Edge, FlowDefinition, FlowId, Graph, Node, NodeId, Position, DEFAULT_INPUT_PORT,
    DEFAULT_OUTPUT_PORT,
};
pub use node::{
    config_or, require_config, require_input, NodeContext, NodeMetadata, NodeWorker,
    PortDefinition,
};
pub use task::{select_port, PortRef, Task, TaskStatus, USER_INPUT_KEY};

/// Dynamic value type for node configuration, inputs and results
pub use serde_json::Value;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, DagError>;
