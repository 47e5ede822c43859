use std::time::Duration;

/// Configuration for the orchestrators
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Fail a distributed execution when a published task has not
    /// reported back within this window. `None` waits indefinitely.
    pub task_timeout: Option<Duration>,
    /// Capacity of the broadcast channel behind each event bus
    pub event_buffer_size: usize,
    /// Result-queue consumers started by a queued orchestrator
    pub result_consumers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            task_timeout: None,
            event_buffer_size: 1000,
            result_consumers: 1,
        }
    }
}

/// Configuration for a worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Competing consumers started by this process
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            concurrency: 4,
        }
    }
}
