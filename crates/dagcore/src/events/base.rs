use super::observer::{ExecutionObserver, ObserverResult, StreamingUpdate};
use crate::{ExecutionId, NodeId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted during flow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    NodeStarted {
        execution_id: ExecutionId,
        node_id: NodeId,
        node_type: String,
        label: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        result: Value,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    InputRequired {
        execution_id: ExecutionId,
        node_id: NodeId,
        input_schema: Value,
        timestamp: DateTime<Utc>,
    },
    Output {
        execution_id: ExecutionId,
        node_id: NodeId,
        result: Value,
        timestamp: DateTime<Utc>,
    },
    Streaming {
        execution_id: ExecutionId,
        node_id: NodeId,
        update: StreamingUpdate,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionEvent::NodeStarted { execution_id, .. }
            | ExecutionEvent::NodeCompleted { execution_id, .. }
            | ExecutionEvent::NodeFailed { execution_id, .. }
            | ExecutionEvent::InputRequired { execution_id, .. }
            | ExecutionEvent::Output { execution_id, .. }
            | ExecutionEvent::Streaming { execution_id, .. } => execution_id,
        }
    }
}

/// Observer that forwards callbacks onto a broadcast channel
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(execution_id: ExecutionId, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            execution_id,
            sender,
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl ExecutionObserver for EventEmitter {
    fn on_node_start(&self, node_id: &str, node_type: &str, label: &str) -> ObserverResult {
        self.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id.clone(),
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            label: label.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn on_node_complete(&self, node_id: &str, result: &Value) -> ObserverResult {
        self.emit(ExecutionEvent::NodeCompleted {
            execution_id: self.execution_id.clone(),
            node_id: node_id.to_string(),
            result: result.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn on_node_error(&self, node_id: &str, error: &str) -> ObserverResult {
        self.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id.clone(),
            node_id: node_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn on_input_required(&self, node_id: &str, input_schema: &Value) -> ObserverResult {
        self.emit(ExecutionEvent::InputRequired {
            execution_id: self.execution_id.clone(),
            node_id: node_id.to_string(),
            input_schema: input_schema.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn on_output(&self, node_id: &str, result: &Value) -> ObserverResult {
        self.emit(ExecutionEvent::Output {
            execution_id: self.execution_id.clone(),
            node_id: node_id.to_string(),
            result: result.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn on_streaming_update(&self, node_id: &str, update: &StreamingUpdate) -> ObserverResult {
        self.emit(ExecutionEvent::Streaming {
            execution_id: self.execution_id.clone(),
            node_id: node_id.to_string(),
            update: update.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Fan-out of execution events to any number of listeners
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: impl Into<ExecutionId>) -> EventEmitter {
        EventEmitter::new(execution_id.into(), self.sender.clone())
    }
}
