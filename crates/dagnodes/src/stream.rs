use crate::{first_input, type_name};
use async_trait::async_trait;
use dagcore::{NodeContext, NodeError, NodeMetadata, NodeWorker, PortDefinition, Value};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

/// Emit the input text word by word as streaming updates
pub struct StreamTextNode;

#[async_trait]
impl NodeWorker for StreamTextNode {
    fn node_type(&self) -> &str {
        "text.stream"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let input = first_input(inputs, &["input", "text"])?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "input".to_string(),
            expected: "string".to_string(),
            actual: type_name(input).to_string(),
        })?;
        let interval = config
            .get("interval_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        for (i, word) in text.split_whitespace().enumerate() {
            if ctx.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            if i > 0 {
                ctx.stream(&format!(" {}", word));
            } else {
                ctx.stream(word);
            }
            if interval > 0 {
                sleep(Duration::from_millis(interval)).await;
            }
        }
        ctx.finish_stream();

        Ok(Value::String(ctx.streamed()))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Stream text word by word".to_string(),
            category: "text".to_string(),
            inputs: vec![PortDefinition::required("input", "Text to stream")],
            outputs: vec![PortDefinition::required("output", "Full text")],
        }
    }
}
