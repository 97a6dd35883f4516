//! The timing collaborator seam.
//!
//! Refresh scheduling needs exactly one primitive: run a task once after
//! a delay, cancellable. [`TokioTimer`] is the production implementation;
//! tests drive it under `tokio::time::pause`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A boxed one-shot task.
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to a scheduled task. Dropping the handle does not cancel it.
#[derive(Debug)]
pub struct TimerHandle {
    handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancels the task if it has not fired yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

/// Schedules one-shot delayed tasks.
pub trait TimerService: Send + Sync {
    /// Runs `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: BoxedTask) -> TimerHandle;
}

/// Timer backed by the tokio runtime.
#[derive(Debug, Default)]
pub struct TokioTimer;

impl TimerService for TokioTimer {
    fn schedule(&self, delay: Duration, task: BoxedTask) -> TimerHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        TimerHandle { handle }
    }
}
