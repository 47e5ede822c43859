use crate::Value;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::sync::Arc;

pub type ObserverResult = Result<(), Box<dyn StdError + Send + Sync>>;

/// Incremental output of a streaming node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingUpdate {
    pub node_type: String,
    pub node_label: String,
    pub delta: String,
    pub accumulated: String,
    pub is_complete: bool,
}

/// Side-channel notifications emitted while a flow runs.
///
/// Every callback defaults to a no-op. Errors are logged by the
/// orchestrator and never fail the task that triggered them.
pub trait ExecutionObserver: Send + Sync {
    fn on_node_start(&self, _node_id: &str, _node_type: &str, _label: &str) -> ObserverResult {
        Ok(())
    }

    fn on_node_complete(&self, _node_id: &str, _result: &Value) -> ObserverResult {
        Ok(())
    }

    fn on_node_error(&self, _node_id: &str, _error: &str) -> ObserverResult {
        Ok(())
    }

    fn on_input_required(&self, _node_id: &str, _input_schema: &Value) -> ObserverResult {
        Ok(())
    }

    fn on_output(&self, _node_id: &str, _result: &Value) -> ObserverResult {
        Ok(())
    }

    fn on_streaming_update(&self, _node_id: &str, _update: &StreamingUpdate) -> ObserverResult {
        Ok(())
    }
}

/// Best-effort dispatcher around an optional observer
#[derive(Clone, Default)]
pub struct ObserverHandle {
    inner: Option<Arc<dyn ExecutionObserver>>,
}

impl ObserverHandle {
    pub fn new(observer: Arc<dyn ExecutionObserver>) -> Self {
        Self {
            inner: Some(observer),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    fn dispatch<F>(&self, callback: &str, node_id: &str, f: F)
    where
        F: FnOnce(&dyn ExecutionObserver) -> ObserverResult,
    {
        if let Some(observer) = &self.inner {
            if let Err(e) = f(observer.as_ref()) {
                tracing::warn!(callback, node_id, "Observer callback failed: {}", e);
            }
        }
    }

    pub fn node_start(&self, node_id: &str, node_type: &str, label: &str) {
        self.dispatch("on_node_start", node_id, |o| {
            o.on_node_start(node_id, node_type, label)
        });
    }

    pub fn node_complete(&self, node_id: &str, result: &Value) {
        self.dispatch("on_node_complete", node_id, |o| {
            o.on_node_complete(node_id, result)
        });
    }

    pub fn node_error(&self, node_id: &str, error: &str) {
        self.dispatch("on_node_error", node_id, |o| o.on_node_error(node_id, error));
    }

    pub fn input_required(&self, node_id: &str, input_schema: &Value) {
        self.dispatch("on_input_required", node_id, |o| {
            o.on_input_required(node_id, input_schema)
        });
    }

    pub fn output(&self, node_id: &str, result: &Value) {
        self.dispatch("on_output", node_id, |o| o.on_output(node_id, result));
    }

    pub fn streaming_update(&self, node_id: &str, update: &StreamingUpdate) {
        self.dispatch("on_streaming_update", node_id, |o| {
            o.on_streaming_update(node_id, update)
        });
    }
}
