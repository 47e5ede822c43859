// crates/dagcore/src/events/mod.rs

mod base;
mod observer;

pub use base::{EventBus, EventEmitter, ExecutionEvent};
pub use observer::{ExecutionObserver, ObserverHandle, ObserverResult, StreamingUpdate};
