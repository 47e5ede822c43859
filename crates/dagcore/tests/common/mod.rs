#![allow(dead_code)]

use dagcore::{FlowDefinition, Graph, Node};

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

/// Graph of `noop` nodes connected by `(source, target)` pairs
pub fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> Graph {
    let mut flow = FlowDefinition::new("test");
    for id in nodes {
        flow.add_node(Node::new(*id, "noop"));
    }
    for (source, target) in edges {
        flow.link(*source, *target);
    }
    Graph::from_definition(&flow).expect("valid graph")
}

/// A -> B, A -> C, B -> D, C -> D
pub fn diamond() -> Graph {
    graph(
        &["A", "B", "C", "D"],
        &[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")],
    )
}
