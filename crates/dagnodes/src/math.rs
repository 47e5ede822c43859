use crate::{first_input, type_name};
use async_trait::async_trait;
use dagcore::{NodeContext, NodeError, NodeMetadata, NodeWorker, PortDefinition, Value};
use std::collections::HashMap;

fn as_number(value: &Value, field: &str) -> Result<f64, NodeError> {
    value.as_f64().ok_or_else(|| NodeError::InvalidInputType {
        field: field.to_string(),
        expected: "number".to_string(),
        actual: type_name(value).to_string(),
    })
}

fn config_number(config: &HashMap<String, Value>, name: &str, default: f64) -> Result<f64, NodeError> {
    match config.get(name) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| NodeError::Configuration(format!("'{}' must be a number", name))),
    }
}

/// Integral results stay integers on the wire
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn math_metadata(description: &str) -> NodeMetadata {
    NodeMetadata {
        description: description.to_string(),
        category: "math".to_string(),
        inputs: vec![PortDefinition::required("input", "Number")],
        outputs: vec![PortDefinition::required("output", "Result")],
    }
}

/// Add the configured `operand` to the input
pub struct AddNode;

#[async_trait]
impl NodeWorker for AddNode {
    fn node_type(&self) -> &str {
        "math.add"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let input = as_number(first_input(inputs, &["input"])?, "input")?;
        let operand = config_number(config, "operand", 0.0)?;
        Ok(number_value(input + operand))
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), NodeError> {
        config_number(config, "operand", 0.0).map(|_| ())
    }

    fn metadata(&self) -> NodeMetadata {
        math_metadata("Add a constant to a number")
    }
}

/// Multiply the input by the configured `factor`
pub struct MultiplyNode;

#[async_trait]
impl NodeWorker for MultiplyNode {
    fn node_type(&self) -> &str {
        "math.multiply"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let input = as_number(first_input(inputs, &["input"])?, "input")?;
        let factor = config_number(config, "factor", 1.0)?;
        Ok(number_value(input * factor))
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), NodeError> {
        config_number(config, "factor", 1.0).map(|_| ())
    }

    fn metadata(&self) -> NodeMetadata {
        math_metadata("Multiply a number by a constant")
    }
}

/// Sum every number arriving on the input port
pub struct SumNode;

#[async_trait]
impl NodeWorker for SumNode {
    fn node_type(&self) -> &str {
        "math.sum"
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let total = match first_input(inputs, &["input"])? {
            Value::Array(items) => items
                .iter()
                .map(|item| as_number(item, "input"))
                .sum::<Result<f64, NodeError>>()?,
            single => as_number(single, "input")?,
        };
        Ok(number_value(total))
    }

    fn metadata(&self) -> NodeMetadata {
        math_metadata("Sum the numbers connected to the input port")
    }
}
