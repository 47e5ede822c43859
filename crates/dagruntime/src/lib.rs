//! Flow execution runtime
//!
//! Node registry, execution store, the direct, interactive and queued
//! orchestrators, the worker process and the engine that wires them
//! together.

mod config;
mod direct;
mod engine;
mod interactive;
mod queued;
mod registry;
mod store;
mod worker;

pub use config::{RuntimeConfig, WorkerConfig};
pub use direct::{DirectOrchestrator, ExecutionReport, RunContext};
pub use engine::Engine;
pub use interactive::{InteractiveOrchestrator, SessionControl, SessionHandle};
pub use queued::QueuedOrchestrator;
pub use registry::NodeRegistry;
pub use store::{ExecutionStore, InMemoryStore};
pub use worker::Worker;
