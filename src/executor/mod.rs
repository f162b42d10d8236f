//! Action dispatch and execution.
//!
//! The dispatcher expands a matched Son into one queued task per action.
//! Workers hand each task to [`runner::ActionRunner`], which picks the
//! handler for the action's variant and records the outcome.

pub mod actions;
pub mod dispatcher;
pub mod runner;
pub mod template;
pub mod unit;

use std::sync::Mutex;

use futures::future::BoxFuture;

pub use dispatcher::Dispatcher;
pub use runner::ActionRunner;
pub use unit::ExecutionUnit;

/// Launches fire-and-forget work.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Spawns onto the ambient tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

/// Holds spawned work until [`run_pending`](Self::run_pending) is awaited.
///
/// Makes dispatch deterministic in tests.
#[derive(Default)]
pub struct DeferredSpawner {
    pending: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl DeferredSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run all held tasks in spawn order. Returns how many ran.
    pub async fn run_pending(&self) -> usize {
        let tasks: Vec<_> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return 0,
        };
        let n = tasks.len();
        for task in tasks {
            task.await;
        }
        n
    }
}

impl TaskSpawner for DeferredSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(task);
        }
    }
}
