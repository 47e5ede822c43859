use async_trait::async_trait;
use dagcore::{
    NodeContext, NodeError, NodeMetadata, NodeWorker, PortDefinition, Value, USER_INPUT_KEY,
};
use std::collections::HashMap;

/// Entry value of a flow.
///
/// Resolution order: user-provided input, the configured `default_value`,
/// then flow inputs seeded under `value` or `input`.
pub struct InputNode;

#[async_trait]
impl NodeWorker for InputNode {
    fn node_type(&self) -> &str {
        "input"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        if let Some(value) = inputs.get(USER_INPUT_KEY) {
            return Ok(value.clone());
        }
        if let Some(value) = config.get("default_value").filter(|v| !v.is_null()) {
            return Ok(value.clone());
        }
        inputs
            .get("value")
            .or_else(|| inputs.get("input"))
            .cloned()
            .ok_or_else(|| NodeError::MissingInput("value".to_string()))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Provides a flow input, optionally asking the user for it".to_string(),
            category: "io".to_string(),
            inputs: vec![PortDefinition::optional("value", "Seeded flow input")],
            outputs: vec![PortDefinition::required("output", "The input value")],
        }
    }
}

/// Terminal node reporting its input as the flow output
pub struct OutputNode;

#[async_trait]
impl NodeWorker for OutputNode {
    fn node_type(&self) -> &str {
        "output"
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        if let Some(value) = inputs.get("input") {
            return Ok(value.clone());
        }
        Ok(Value::Object(
            inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Reports its input as a flow output".to_string(),
            category: "io".to_string(),
            inputs: vec![PortDefinition::required("input", "Value to report")],
            outputs: vec![],
        }
    }
}
