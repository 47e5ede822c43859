use crate::graph::{FlowId, NodeId};
use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type ExecutionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Durable record of one run of a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub flow_id: FlowId,
    pub user_id: Option<String>,
    pub status: ExecutionStatus,
    pub inputs: HashMap<String, Value>,
    pub outputs: HashMap<NodeId, Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(flow_id: impl Into<FlowId>, inputs: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            user_id: None,
            status: ExecutionStatus::Pending,
            inputs,
            outputs: HashMap::new(),
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, outputs: HashMap<NodeId, Value>) {
        self.status = ExecutionStatus::Completed;
        self.outputs = outputs;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
