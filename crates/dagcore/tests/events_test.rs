mod common;

use dagcore::events::ObserverResult;
use dagcore::{
    EventBus, ExecutionEvent, ExecutionObserver, NodeContext, ObserverHandle, StreamingUpdate,
    Value,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Observer whose callbacks all fail
struct Broken;

impl ExecutionObserver for Broken {
    fn on_node_start(&self, _node_id: &str, _node_type: &str, _label: &str) -> ObserverResult {
        Err("observer offline".into())
    }

    fn on_output(&self, _node_id: &str, _result: &Value) -> ObserverResult {
        Err("observer offline".into())
    }
}

#[derive(Default)]
struct Collect {
    updates: Mutex<Vec<StreamingUpdate>>,
}

impl ExecutionObserver for Collect {
    fn on_streaming_update(&self, _node_id: &str, update: &StreamingUpdate) -> ObserverResult {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

#[test]
fn test_observer_failures_are_swallowed() {
    common::init_tracing();
    let handle = ObserverHandle::new(Arc::new(Broken));
    assert!(handle.is_attached());
    handle.node_start("n1", "input", "Question");
    handle.output("n1", &json!("done"));
    // Callbacks without overrides are no-ops
    handle.node_error("n1", "boom");

    let detached = ObserverHandle::none();
    assert!(!detached.is_attached());
    detached.node_complete("n1", &json!(1));
}

#[tokio::test]
async fn test_event_bus_fans_out_tagged_events() {
    let bus = EventBus::new(16);
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    let emitter = bus.create_emitter("exec-1");
    emitter.on_node_start("n1", "input", "Question").unwrap();
    emitter.on_output("n1", &json!("Hello")).unwrap();

    for rx in [&mut first, &mut second] {
        match rx.recv().await.unwrap() {
            ExecutionEvent::NodeStarted { node_id, label, .. } => {
                assert_eq!(node_id, "n1");
                assert_eq!(label, "Question");
            }
            other => panic!("unexpected event {:?}", other),
        }
        let output = rx.recv().await.unwrap();
        assert_eq!(output.execution_id(), "exec-1");
        let wire = serde_json::to_value(&output).unwrap();
        assert_eq!(wire["type"], json!("Output"));
        assert_eq!(wire["result"], json!("Hello"));
    }
}

#[test]
fn test_node_context_streaming() {
    let collect = Arc::new(Collect::default());
    let ctx = NodeContext::new("exec-1", "flow-1", "writer")
        .with_node("text.stream", "Writer")
        .with_observer(collect.clone());

    ctx.stream("Hello");
    ctx.stream(" world");
    ctx.finish_stream();

    let updates = collect.updates.lock().unwrap();
    assert_eq!(updates.len(), 3);
    assert_eq!(updates[1].delta, " world");
    assert_eq!(updates[1].accumulated, "Hello world");
    assert_eq!(updates[1].node_label, "Writer");
    assert!(!updates[1].is_complete);
    assert!(updates[2].is_complete);
    assert_eq!(updates[2].accumulated, "Hello world");
    assert_eq!(ctx.streamed(), "Hello world");
}
