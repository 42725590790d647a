//! Cooperative tasks and controllers.
//!
//! A [`Task`] is a named unit of work spawned once on the runtime. A
//! [`Controller`] is application logic run by a task with a fixed loop:
//! `on_start` once, then forever wait for an event (up to the poll
//! interval), dispatch it to `on_event`, and call `poll`.

mod controller;

pub use controller::{spawn_controller, Controller, ControllerContext, TaskRunner, DEFAULT_POLL_INTERVAL};

use std::future::Future;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, info_span, Instrument};

pub const DEFAULT_STACK_SIZE: usize = 4096;
pub const DEFAULT_PRIORITY: u8 = 1;

/// Spawn parameters for one task.
///
/// Stack size and priority are carried for diagnostics; the runtime
/// schedules all tasks alike.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    stack_size: usize,
    priority: u8,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: DEFAULT_STACK_SIZE,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the task. A task runs its future once and is never restarted.
    pub fn spawn<F>(self, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            task = %self.name,
            stack_size = self.stack_size,
            priority = self.priority,
            "task started"
        );

        let span = info_span!("task", name = %self.name);
        let join = tokio::spawn(future.instrument(span));

        TaskHandle { name: self.name, join }
    }
}

#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn abort(&self) {
        self.join.abort();
    }

    pub async fn join(self) -> Result<(), JoinError> {
        self.join.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_task_runs_to_completion() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = Task::new("once").priority(3).spawn(async move {
            let _ = tx.send(7);
        });

        assert_eq!(rx.await.unwrap(), 7);
        handle.join().await.unwrap();
    }
}
