use crate::{DagError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type NodeId = String;
pub type FlowId = String;

/// Port name used when an edge does not name its source port
pub const DEFAULT_OUTPUT_PORT: &str = "output";
/// Port name used when an edge does not name its target port
pub const DEFAULT_INPUT_PORT: &str = "input";

fn default_output_port() -> String {
    DEFAULT_OUTPUT_PORT.to_string()
}

fn default_input_port() -> String {
    DEFAULT_INPUT_PORT.to_string()
}

/// Serialized flow version as stored and loaded from disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: FlowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<FlowId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect two named ports
    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        source_port: impl Into<String>,
        target: impl Into<NodeId>,
        target_port: impl Into<String>,
    ) {
        self.edges.push(Edge {
            id: Uuid::new_v4().to_string(),
            source_node_id: source.into(),
            source_port: source_port.into(),
            target_node_id: target.into(),
            target_port: target_port.into(),
        });
    }

    /// Connect using the implicit "output" / "input" ports
    pub fn link(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.connect(source, DEFAULT_OUTPUT_PORT, target, DEFAULT_INPUT_PORT);
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One step in a flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub configuration: HashMap<String, Value>,
    #[serde(default)]
    pub position: Option<Position>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: None,
            configuration: HashMap::new(),
            position: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    /// Label shown to observers, falling back to the node id
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// Whether this node asks a human for its value
    pub fn requires_input(&self) -> bool {
        self.configuration
            .get("requires_input")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.configuration
            .get("default_value")
            .filter(|v| !v.is_null())
    }

    pub fn input_schema(&self) -> Value {
        self.configuration
            .get("input_schema")
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Directed dependency from one node's output port to another node's input port
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source_node_id: NodeId,
    #[serde(default = "default_output_port")]
    pub source_port: String,
    pub target_node_id: NodeId,
    #[serde(default = "default_input_port")]
    pub target_port: String,
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Immutable node/edge set of one flow version.
///
/// Construction guarantees node ids are unique and every edge endpoint
/// references a node of the same graph.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<NodeId, usize>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), position).is_some() {
                return Err(DagError::Validation(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }

        for edge in &edges {
            for endpoint in [&edge.source_node_id, &edge.target_node_id] {
                if !index.contains_key(endpoint) {
                    return Err(DagError::Validation(format!(
                        "edge {} references unknown node {}",
                        edge.id, endpoint
                    )));
                }
            }
        }

        Ok(Self {
            nodes,
            edges,
            index,
        })
    }

    pub fn from_definition(definition: &FlowDefinition) -> Result<Self> {
        Self::new(definition.nodes.clone(), definition.edges.clone())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target_node_id == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source_node_id == id)
    }

    /// Distinct source node ids of the incoming edges, in edge order
    pub fn dependencies(&self, id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.incoming(id)
            .filter(|e| seen.insert(e.source_node_id.as_str()))
            .map(|e| e.source_node_id.clone())
            .collect()
    }

    /// Nodes without incoming edges; flow inputs are seeded onto these
    pub fn entry_points(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.incoming(&n.id).next().is_none())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Nodes without outgoing edges; their results are reported through `on_output`
    pub fn is_sink(&self, id: &str) -> bool {
        self.outgoing(id).next().is_none()
    }
}
