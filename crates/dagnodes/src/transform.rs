use crate::{first_input, type_name};
use async_trait::async_trait;
use dagcore::{config_or, NodeContext, NodeError, NodeMetadata, NodeWorker, PortDefinition, Value};
use std::collections::HashMap;

/// Wrap text with a configured prefix and suffix, optionally changing case
pub struct TextTransformNode;

#[async_trait]
impl NodeWorker for TextTransformNode {
    fn node_type(&self) -> &str {
        "transform.text"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let input = first_input(inputs, &["input", "text"])?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "input".to_string(),
            expected: "string".to_string(),
            actual: type_name(input).to_string(),
        })?;

        let prefix = config.get("prefix").and_then(Value::as_str).unwrap_or("");
        let suffix = config.get("suffix").and_then(Value::as_str).unwrap_or("");
        let body = match config_or(config, "case", Value::Null).as_str() {
            Some("upper") => text.to_uppercase(),
            Some("lower") => text.to_lowercase(),
            _ => text.to_string(),
        };

        Ok(Value::String(format!("{}{}{}", prefix, body, suffix)))
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), NodeError> {
        match config.get("case").and_then(Value::as_str) {
            None | Some("upper") | Some("lower") => Ok(()),
            Some(other) => Err(NodeError::Configuration(format!(
                "unknown case '{}', expected 'upper' or 'lower'",
                other
            ))),
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Add a prefix/suffix to text and change its case".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("input", "Text to transform")],
            outputs: vec![PortDefinition::required("output", "Transformed text")],
        }
    }
}

/// Parse JSON string to Value
pub struct JsonParseNode;

#[async_trait]
impl NodeWorker for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let value = first_input(inputs, &["json", "input"])?;
        let input = value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: type_name(value).to_string(),
        })?;

        serde_json::from_str(input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("json", "JSON text")],
            outputs: vec![PortDefinition::required("output", "Parsed value")],
        }
    }
}

/// Stringify Value to JSON
pub struct JsonStringifyNode;

#[async_trait]
impl NodeWorker for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let value = first_input(inputs, &["value", "input"])?;
        let pretty = config.get("pretty").and_then(Value::as_bool).unwrap_or(true);

        let json_str = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(Value::String(json_str))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("value", "Value to serialize")],
            outputs: vec![PortDefinition::required("output", "JSON text")],
        }
    }
}
