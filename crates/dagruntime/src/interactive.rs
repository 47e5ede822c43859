//! Interactive orchestration
//!
//! Runs a flow in-process on a spawned task and exposes a control plane
//! for a live session: nodes that ask for human input suspend the run
//! until [`SessionControl::provide_input`] resolves them, and
//! [`SessionControl::cancel`] stops the run and releases every waiter.

use crate::direct::{run_graph, ExecutionReport, RunContext};
use crate::registry::NodeRegistry;
use dagcore::{DagError, ExecutionId, ExecutionObserver, Graph, NodeId, ObserverHandle, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What a suspended node is woken with
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InputSignal {
    Data(Value),
    Cancelled,
}

#[derive(Default)]
struct GateState {
    waiters: HashMap<NodeId, oneshot::Sender<InputSignal>>,
    /// Input provided before the node asked for it
    early: HashMap<NodeId, Value>,
    cancelled: bool,
}

/// Per-node single-fire signals for nodes waiting on human input
pub(crate) struct InputGate {
    expected: HashSet<NodeId>,
    state: Mutex<GateState>,
}

impl InputGate {
    fn for_graph(graph: &Graph) -> Self {
        let expected = graph
            .nodes()
            .iter()
            .filter(|n| n.requires_input() && n.default_value().is_none())
            .map(|n| n.id.clone())
            .collect();
        Self {
            expected,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Suspend until input for `node_id` arrives or the session is cancelled.
    ///
    /// `on_input_required` fires only when the node actually has to wait.
    pub(crate) async fn wait_for(
        &self,
        node_id: &str,
        input_schema: &Value,
        observer: &ObserverHandle,
    ) -> InputSignal {
        let receiver = {
            let mut state = self.state.lock().await;
            if state.cancelled {
                return InputSignal::Cancelled;
            }
            if let Some(data) = state.early.remove(node_id) {
                return InputSignal::Data(data);
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.insert(node_id.to_string(), sender);
            receiver
        };

        info!(node_id, "Waiting for user input");
        observer.input_required(node_id, input_schema);

        // A dropped sender means the gate went away with the session
        receiver.await.unwrap_or(InputSignal::Cancelled)
    }

    async fn provide(&self, node_id: &str, data: Value) -> Result<(), DagError> {
        if !self.expected.contains(node_id) {
            return Err(DagError::NotFound(format!(
                "node {} does not accept user input",
                node_id
            )));
        }
        let mut state = self.state.lock().await;
        if state.cancelled {
            return Err(DagError::Cancelled);
        }
        match state.waiters.remove(node_id) {
            Some(sender) => {
                debug!(node_id, "Resuming node with user input");
                if let Err(InputSignal::Data(data)) = sender.send(InputSignal::Data(data)) {
                    // Waiter gone; keep the value in case the node asks again
                    state.early.insert(node_id.to_string(), data);
                }
            }
            None => {
                state.early.insert(node_id.to_string(), data);
            }
        }
        Ok(())
    }

    async fn cancel_all(&self) {
        let mut state = self.state.lock().await;
        state.cancelled = true;
        state.early.clear();
        for (node_id, sender) in state.waiters.drain() {
            debug!(node_id = %node_id, "Releasing input waiter");
            let _ = sender.send(InputSignal::Cancelled);
        }
    }

    async fn pending(&self) -> Vec<NodeId> {
        let state = self.state.lock().await;
        let mut pending: Vec<NodeId> = state.waiters.keys().cloned().collect();
        pending.sort();
        pending
    }
}

/// Clonable control plane of a running session
#[derive(Clone)]
pub struct SessionControl {
    execution_id: ExecutionId,
    gate: Arc<InputGate>,
    cancel: CancellationToken,
}

impl SessionControl {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Resolve the input request of a node; input sent before the node
    /// suspends is held until it asks
    pub async fn provide_input(&self, node_id: &str, data: Value) -> Result<(), DagError> {
        self.gate.provide(node_id, data).await
    }

    /// Stop the run before its next node and release every input waiter
    pub async fn cancel(&self) {
        info!(execution_id = %self.execution_id, "Cancelling session");
        self.cancel.cancel();
        self.gate.cancel_all().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Nodes currently suspended on user input
    pub async fn pending_inputs(&self) -> Vec<NodeId> {
        self.gate.pending().await
    }
}

/// A running interactive execution
pub struct SessionHandle {
    control: SessionControl,
    join: JoinHandle<Result<ExecutionReport, DagError>>,
}

impl SessionHandle {
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn execution_id(&self) -> &str {
        self.control.execution_id()
    }

    pub async fn provide_input(&self, node_id: &str, data: Value) -> Result<(), DagError> {
        self.control.provide_input(node_id, data).await
    }

    pub async fn cancel(&self) {
        self.control.cancel().await
    }

    pub async fn pending_inputs(&self) -> Vec<NodeId> {
        self.control.pending_inputs().await
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to finish
    pub async fn join(self) -> Result<ExecutionReport, DagError> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(DagError::Cancelled),
        }
    }
}

/// Direct orchestration with input suspension and observer events
#[derive(Clone)]
pub struct InteractiveOrchestrator {
    registry: Arc<NodeRegistry>,
}

impl InteractiveOrchestrator {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Spawn a run of `graph` and return its session handle
    pub fn start(
        &self,
        graph: Graph,
        ctx: RunContext,
        inputs: HashMap<String, Value>,
        observer: Option<Arc<dyn ExecutionObserver>>,
    ) -> SessionHandle {
        let gate = Arc::new(InputGate::for_graph(&graph));
        let cancel = CancellationToken::new();
        let control = SessionControl {
            execution_id: ctx.execution_id.clone(),
            gate: gate.clone(),
            cancel: cancel.clone(),
        };
        let observer = observer.map(ObserverHandle::new).unwrap_or_default();
        let registry = self.registry.clone();

        let join = tokio::spawn(async move {
            run_graph(
                &registry,
                &graph,
                &ctx,
                inputs,
                &observer,
                &cancel,
                Some(gate.as_ref()),
            )
            .await
        });

        SessionHandle { control, join }
    }
}
