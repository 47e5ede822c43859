use crate::task::Task;
use crate::{BrokerError, ExecutionId, FlowId, NodeId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Serialized form of a task sent to workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: String,
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub node_id: NodeId,
    pub node_type: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn from_task(
        task: &Task,
        execution_id: impl Into<ExecutionId>,
        flow_id: impl Into<FlowId>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            execution_id: execution_id.into(),
            flow_id: flow_id.into(),
            node_id: task.node_id.clone(),
            node_type: task.node_type.clone(),
            config: task.config.clone(),
            inputs: task.inputs.clone(),
            dependencies: task.dependencies.clone(),
            user_id,
            created_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::SerializationFailed(e.to_string()))
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(payload).map_err(|e| BrokerError::SerializationFailed(e.to_string()))
    }
}

/// Outcome of one task, published by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub task_id: String,
    pub execution_id: ExecutionId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultMessage {
    pub fn success(task_id: impl Into<String>, execution_id: impl Into<ExecutionId>, result: Value) -> Self {
        Self {
            task_id: task_id.into(),
            execution_id: execution_id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        execution_id: impl Into<ExecutionId>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            execution_id: execution_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::SerializationFailed(e.to_string()))
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(payload).map_err(|e| BrokerError::SerializationFailed(e.to_string()))
    }
}

/// A message that exceeded its delivery limit or could not be decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub queue: String,
    pub error: String,
    pub deliveries: u32,
    pub payload: String,
    pub dead_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(queue: impl Into<String>, payload: &[u8], error: impl Into<String>, deliveries: u32) -> Self {
        Self {
            queue: queue.into(),
            error: error.into(),
            deliveries,
            payload: String::from_utf8_lossy(payload).into_owned(),
            dead_at: Utc::now(),
        }
    }
}
