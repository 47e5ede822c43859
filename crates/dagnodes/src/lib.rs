//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod io;
mod math;
mod stream;
mod time;
mod transform;

pub use debug::DebugNode;
pub use io::{InputNode, OutputNode};
pub use math::{AddNode, MultiplyNode, SumNode};
pub use stream::StreamTextNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode, TextTransformNode};

use dagcore::{NodeError, Value};
use dagruntime::NodeRegistry;
use std::collections::HashMap;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(InputNode));
    registry.register(Arc::new(OutputNode));
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(TextTransformNode));
    registry.register(Arc::new(JsonParseNode));
    registry.register(Arc::new(JsonStringifyNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(AddNode));
    registry.register(Arc::new(MultiplyNode));
    registry.register(Arc::new(SumNode));
    registry.register(Arc::new(StreamTextNode));
}

/// First of the named inputs that is present
pub(crate) fn first_input<'a>(
    inputs: &'a HashMap<String, Value>,
    names: &[&str],
) -> Result<&'a Value, NodeError> {
    names
        .iter()
        .find_map(|name| inputs.get(*name))
        .ok_or_else(|| NodeError::MissingInput(names.join(" | ")))
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
