use crate::graph::{Graph, Node, NodeId, DEFAULT_OUTPUT_PORT};
use crate::{DagError, Result, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Input key under which human-provided data is handed to a node
pub const USER_INPUT_KEY: &str = "user_input";

/// Task lifecycle.
///
/// `Pending -> Running -> {Completed | Failed}`, with `Cancelled`
/// reachable from `Pending` or `Running`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
        )
    }
}

/// Source side of an input mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    pub node_id: NodeId,
    pub port: String,
}

/// One node instance scheduled within one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub node_id: NodeId,
    pub node_type: String,
    pub config: HashMap<String, Value>,
    pub inputs: HashMap<String, Value>,
    pub dependencies: Vec<NodeId>,
    /// target port -> source ports, in edge declaration order
    pub input_mappings: BTreeMap<String, Vec<PortRef>>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn from_node(node: &Node, graph: &Graph) -> Self {
        let mut input_mappings: BTreeMap<String, Vec<PortRef>> = BTreeMap::new();
        for edge in graph.incoming(&node.id) {
            input_mappings
                .entry(edge.target_port.clone())
                .or_default()
                .push(PortRef {
                    node_id: edge.source_node_id.clone(),
                    port: edge.source_port.clone(),
                });
        }

        Self {
            id: node.id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            config: node.configuration.clone(),
            inputs: HashMap::new(),
            dependencies: graph.dependencies(&node.id),
            input_mappings,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Suffix the id with a random token so queue messages stay unique across retries
    pub fn with_unique_id(mut self) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        self.id = format!("{}-{}", self.node_id, &token[..12]);
        self
    }

    pub fn with_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DagError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)
    }

    pub fn complete(&mut self, result: Value) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(TaskStatus::Cancelled)
    }

    /// Resolve predecessor results into input values keyed by target port.
    ///
    /// A port fed by several edges receives an array in edge order.
    /// Predecessors without a result are skipped.
    pub fn resolve_inputs(&self, results: &HashMap<NodeId, Value>) -> HashMap<String, Value> {
        let mut resolved = HashMap::new();
        for (target_port, sources) in &self.input_mappings {
            let mut values: Vec<Value> = sources
                .iter()
                .filter_map(|src| {
                    results
                        .get(&src.node_id)
                        .map(|result| select_port(result, &src.port))
                })
                .collect();

            match values.len() {
                0 => {}
                1 => {
                    resolved.insert(target_port.clone(), values.remove(0));
                }
                _ => {
                    resolved.insert(target_port.clone(), Value::Array(values));
                }
            }
        }
        resolved
    }

    /// Merge resolved predecessor outputs into this task's inputs
    pub fn absorb_results(&mut self, results: &HashMap<NodeId, Value>) {
        let resolved = self.resolve_inputs(results);
        self.inputs.extend(resolved);
    }
}

/// Pick a named output from a node result.
///
/// Falls back to the generic "output" key, then to the whole result.
pub fn select_port(result: &Value, port: &str) -> Value {
    if let Value::Object(map) = result {
        if let Some(value) = map.get(port) {
            return value.clone();
        }
        if let Some(value) = map.get(DEFAULT_OUTPUT_PORT) {
            return value.clone();
        }
    }
    result.clone()
}
