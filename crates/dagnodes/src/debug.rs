use async_trait::async_trait;
use dagcore::{NodeContext, NodeError, NodeMetadata, NodeWorker, PortDefinition, Value};
use std::collections::HashMap;

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl NodeWorker for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let message = config
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");

        tracing::info!(node_id = %ctx.node_id, "DEBUG: {}", message);

        // Also log all inputs for visibility
        for (key, value) in inputs {
            tracing::info!(node_id = %ctx.node_id, "  {}: {}", key, value);
        }

        Ok(inputs.get("input").cloned().unwrap_or(Value::Null))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::optional("input", "Value to log and pass on")],
            outputs: vec![PortDefinition::required("output", "The input value")],
        }
    }
}
