#![allow(dead_code)]

use async_trait::async_trait;
use dagcore::{
    ExecutionObserver, FlowDefinition, Graph, NodeContext, NodeError, NodeWorker, Node,
    StreamingUpdate, Value, USER_INPUT_KEY,
};
use dagcore::events::ObserverResult;
use dagruntime::NodeRegistry;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

fn number(value: Option<&Value>, field: &str) -> Result<f64, NodeError> {
    value
        .and_then(Value::as_f64)
        .ok_or_else(|| NodeError::InvalidInputType {
            field: field.to_string(),
            expected: "number".to_string(),
            actual: format!("{:?}", value),
        })
}

fn integral(n: f64) -> Value {
    if n.fract() == 0.0 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Emits user input, the execution's `value` input or its config `value`
pub struct Source;

#[async_trait]
impl NodeWorker for Source {
    fn node_type(&self) -> &str {
        "source"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        inputs
            .get(USER_INPUT_KEY)
            .or_else(|| config.get("default_value"))
            .or_else(|| inputs.get("value"))
            .or_else(|| config.get("value"))
            .cloned()
            .ok_or_else(|| NodeError::MissingInput("value".to_string()))
    }
}

/// Prepends config `prefix` to its string input
pub struct Prefix;

#[async_trait]
impl NodeWorker for Prefix {
    fn node_type(&self) -> &str {
        "prefix"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let text = inputs
            .get("input")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::MissingInput("input".to_string()))?;
        let prefix = config.get("prefix").and_then(Value::as_str).unwrap_or("");
        Ok(json!(format!("{}{}", prefix, text)))
    }
}

/// Passes its input through
pub struct Sink;

#[async_trait]
impl NodeWorker for Sink {
    fn node_type(&self) -> &str {
        "sink"
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        Ok(inputs.get("input").cloned().unwrap_or(Value::Null))
    }
}

/// input + config `operand`
pub struct Add;

#[async_trait]
impl NodeWorker for Add {
    fn node_type(&self) -> &str {
        "add"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let a = number(inputs.get("input"), "input")?;
        let b = number(config.get("operand"), "operand")?;
        Ok(integral(a + b))
    }
}

/// input * config `factor`
pub struct Mul;

#[async_trait]
impl NodeWorker for Mul {
    fn node_type(&self) -> &str {
        "mul"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let a = number(inputs.get("input"), "input")?;
        let b = number(config.get("factor"), "factor")?;
        Ok(integral(a * b))
    }
}

/// Sum of the values fanned into `input`
pub struct Sum;

#[async_trait]
impl NodeWorker for Sum {
    fn node_type(&self) -> &str {
        "sum"
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let total = match inputs.get("input") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| number(Some(v), "input"))
                .sum::<Result<f64, _>>()?,
            other => number(other, "input")?,
        };
        Ok(integral(total))
    }
}

/// Always fails
pub struct Fail;

#[async_trait]
impl NodeWorker for Fail {
    fn node_type(&self) -> &str {
        "fail"
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        _inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        Err(NodeError::ExecutionFailed("boom".to_string()))
    }
}

/// Counts executions and passes its input through
#[derive(Default)]
pub struct Tally {
    pub runs: AtomicUsize,
}

impl Tally {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeWorker for Tally {
    fn node_type(&self) -> &str {
        "tally"
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        _ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.get("input").cloned().unwrap_or(Value::Null))
    }
}

/// Streams the words of its input one by one
pub struct Words;

#[async_trait]
impl NodeWorker for Words {
    fn node_type(&self) -> &str {
        "words"
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let text = inputs.get("input").and_then(Value::as_str).unwrap_or("");
        for (i, word) in text.split_whitespace().enumerate() {
            if i > 0 {
                ctx.stream(" ");
            }
            ctx.stream(word);
        }
        ctx.finish_stream();
        Ok(json!(ctx.streamed()))
    }
}

/// Sleeps for config `ms`, giving up early if its own token fires
pub struct Nap;

#[async_trait]
impl NodeWorker for Nap {
    fn node_type(&self) -> &str {
        "nap"
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        inputs: &HashMap<String, Value>,
        ctx: &NodeContext,
    ) -> Result<Value, NodeError> {
        let ms = config.get("ms").and_then(Value::as_u64).unwrap_or(100);
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }
        Ok(inputs.get("input").cloned().unwrap_or(Value::Null))
    }
}

/// Registry with every test worker; the returned tally is registered too
pub fn registry() -> (Arc<NodeRegistry>, Arc<Tally>) {
    let tally = Arc::new(Tally::default());
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(Source));
    registry.register(Arc::new(Prefix));
    registry.register(Arc::new(Sink));
    registry.register(Arc::new(Add));
    registry.register(Arc::new(Mul));
    registry.register(Arc::new(Sum));
    registry.register(Arc::new(Fail));
    registry.register(Arc::new(Words));
    registry.register(Arc::new(Nap));
    registry.register(tally.clone());
    (Arc::new(registry), tally)
}

/// in -> prefix("Transformed: ") -> out
pub fn linear_flow() -> FlowDefinition {
    let mut flow = FlowDefinition::new("linear").with_id("flow-linear");
    flow.add_node(Node::new("in", "source"));
    flow.add_node(Node::new("transform", "prefix").with_config("prefix", "Transformed: "));
    flow.add_node(Node::new("out", "sink"));
    flow.link("in", "transform");
    flow.link("transform", "out");
    flow
}

/// A(1) -> B(+1), A -> C(*2), B -> D(sum), C -> D
pub fn diamond_flow() -> FlowDefinition {
    let mut flow = FlowDefinition::new("diamond").with_id("flow-diamond");
    flow.add_node(Node::new("A", "source").with_config("value", 1));
    flow.add_node(Node::new("B", "add").with_config("operand", 1));
    flow.add_node(Node::new("C", "mul").with_config("factor", 2));
    flow.add_node(Node::new("D", "sum"));
    flow.link("A", "B");
    flow.link("A", "C");
    flow.link("B", "D");
    flow.link("C", "D");
    flow
}

pub fn graph(flow: &FlowDefinition) -> Graph {
    Graph::from_definition(flow).expect("valid graph")
}

/// Every observer callback, in order, as `(callback, node_id, payload)`
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingObserver {
    fn record(&self, callback: &str, node_id: &str, payload: Value) -> ObserverResult {
        self.events
            .lock()
            .unwrap()
            .push((callback.to_string(), node_id.to_string(), payload));
        Ok(())
    }

    pub fn calls(&self, callback: &str) -> Vec<(String, Value)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| c == callback)
            .map(|(_, node, payload)| (node.clone(), payload.clone()))
            .collect()
    }
}

impl ExecutionObserver for RecordingObserver {
    fn on_node_start(&self, node_id: &str, node_type: &str, label: &str) -> ObserverResult {
        self.record("start", node_id, json!({"type": node_type, "label": label}))
    }

    fn on_node_complete(&self, node_id: &str, result: &Value) -> ObserverResult {
        self.record("complete", node_id, result.clone())
    }

    fn on_node_error(&self, node_id: &str, error: &str) -> ObserverResult {
        self.record("error", node_id, json!(error))
    }

    fn on_input_required(&self, node_id: &str, input_schema: &Value) -> ObserverResult {
        self.record("input_required", node_id, input_schema.clone())
    }

    fn on_output(&self, node_id: &str, result: &Value) -> ObserverResult {
        self.record("output", node_id, result.clone())
    }

    fn on_streaming_update(&self, node_id: &str, update: &StreamingUpdate) -> ObserverResult {
        self.record(
            "stream",
            node_id,
            json!({"delta": update.delta, "accumulated": update.accumulated, "done": update.is_complete}),
        )
    }
}

/// Observer whose callbacks always fail
pub struct BrokenObserver;

impl ExecutionObserver for BrokenObserver {
    fn on_node_start(&self, _node_id: &str, _node_type: &str, _label: &str) -> ObserverResult {
        Err("observer offline".into())
    }

    fn on_node_complete(&self, _node_id: &str, _result: &Value) -> ObserverResult {
        Err("observer offline".into())
    }

    fn on_output(&self, _node_id: &str, _result: &Value) -> ObserverResult {
        Err("observer offline".into())
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let waited = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
