use async_trait::async_trait;
use dagcore::{NodeContext, NodeError, NodeMetadata, NodeWorker, PortDefinition, Value};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeWorker for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let delay_ms = config
            .get("delay_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(1000.0) as u64; // Default to 1 second if not specified

        tracing::debug!(node_id = %ctx.node_id, "Delaying for {}ms", delay_ms);

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        // Pass through the input
        Ok(inputs.get("input").cloned().unwrap_or(Value::Null))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![PortDefinition::optional("input", "Value passed through")],
            outputs: vec![PortDefinition::required("output", "The input value")],
        }
    }
}
